//! Handler contracts and the tagged handler union a router stores.

use crate::{Ack, Context, Request, Response, StreamCall};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The three RPC shapes the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcType {
    Unary,
    Oneway,
    Stream,
}

impl RpcType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcType::Unary => "unary",
            RpcType::Oneway => "oneway",
            RpcType::Stream => "stream",
        }
    }
}

impl fmt::Display for RpcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handles a request/response call.
#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn handle(&self, ctx: &Context, request: Request) -> crate::Result<Response>;
}

/// Handles a fire-and-forget call.
#[async_trait]
pub trait OnewayHandler: Send + Sync {
    async fn handle_oneway(&self, ctx: &Context, request: Request) -> crate::Result<Ack>;
}

/// Handles a streaming call. The handler owns the stream and drives
/// reads and writes until it returns.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle_stream(&self, stream: StreamCall) -> crate::Result<()>;
}

/// The tagged union a router maps procedures to.
#[derive(Clone)]
pub enum HandlerSpec {
    Unary(Arc<dyn UnaryHandler>),
    Oneway(Arc<dyn OnewayHandler>),
    Stream(Arc<dyn StreamHandler>),
}

impl HandlerSpec {
    pub fn rpc_type(&self) -> RpcType {
        match self {
            HandlerSpec::Unary(_) => RpcType::Unary,
            HandlerSpec::Oneway(_) => RpcType::Oneway,
            HandlerSpec::Stream(_) => RpcType::Stream,
        }
    }
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerSpec::{}", self.rpc_type())
    }
}

struct UnaryHandlerFn<F>(F);

#[async_trait]
impl<F, Fut> UnaryHandler for UnaryHandlerFn<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Response>> + Send,
{
    async fn handle(&self, ctx: &Context, request: Request) -> crate::Result<Response> {
        (self.0)(ctx.clone(), request).await
    }
}

/// Adapt an async closure into a [`UnaryHandler`].
pub fn unary_handler_fn<F, Fut>(f: F) -> Arc<dyn UnaryHandler>
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    Arc::new(UnaryHandlerFn(f))
}

struct OnewayHandlerFn<F>(F);

#[async_trait]
impl<F, Fut> OnewayHandler for OnewayHandlerFn<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Ack>> + Send,
{
    async fn handle_oneway(&self, ctx: &Context, request: Request) -> crate::Result<Ack> {
        (self.0)(ctx.clone(), request).await
    }
}

/// Adapt an async closure into an [`OnewayHandler`].
pub fn oneway_handler_fn<F, Fut>(f: F) -> Arc<dyn OnewayHandler>
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<Ack>> + Send + 'static,
{
    Arc::new(OnewayHandlerFn(f))
}

//! Interceptor chains around handlers and outbounds.
//!
//! Three RPC shapes times two directions gives six middleware traits.
//! Chains compose by right-fold: the first middleware in a list is the
//! outermost layer. Absent (`None`) entries are identities and are
//! flattened away at construction, so `[a, None, b]` builds the same
//! chain as `[a, b]`, and composition is associative.

use async_trait::async_trait;
use call::Outbound as _;
use call::{Ack, Context, Request, Response, StreamCall, Transport};
use std::sync::Arc;

/// Intercepts a unary call on its way in to a handler.
#[async_trait]
pub trait UnaryInbound: Send + Sync {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::UnaryHandler,
    ) -> call::Result<Response>;
}

/// Intercepts a oneway call on its way in to a handler.
#[async_trait]
pub trait OnewayInbound: Send + Sync {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::OnewayHandler,
    ) -> call::Result<Ack>;
}

/// Intercepts a streaming call on its way in to a handler. The
/// middleware may re-wrap the stream to interpose on reads and writes.
#[async_trait]
pub trait StreamInbound: Send + Sync {
    async fn call(&self, stream: StreamCall, next: &dyn call::StreamHandler) -> call::Result<()>;
}

/// Intercepts a unary call on its way out through an outbound.
#[async_trait]
pub trait UnaryOutbound: Send + Sync {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::UnaryOutbound,
    ) -> call::Result<Response>;
}

/// Intercepts a oneway call on its way out through an outbound.
#[async_trait]
pub trait OnewayOutbound: Send + Sync {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::OnewayOutbound,
    ) -> call::Result<Ack>;
}

/// Intercepts a stream open on its way out through an outbound.
#[async_trait]
pub trait StreamOutbound: Send + Sync {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::StreamOutbound,
    ) -> call::Result<StreamCall>;
}

/// Inbound middleware applied to every procedure a dispatcher registers.
#[derive(Clone, Default)]
pub struct InboundMiddleware {
    pub unary: Vec<Arc<dyn UnaryInbound>>,
    pub oneway: Vec<Arc<dyn OnewayInbound>>,
    pub stream: Vec<Arc<dyn StreamInbound>>,
}

/// Outbound middleware applied to every outbound a dispatcher hosts.
#[derive(Clone, Default)]
pub struct OutboundMiddleware {
    pub unary: Vec<Arc<dyn UnaryOutbound>>,
    pub oneway: Vec<Arc<dyn OnewayOutbound>>,
    pub stream: Vec<Arc<dyn StreamOutbound>>,
}

struct UnaryInboundLayer {
    mw: Arc<dyn UnaryInbound>,
    next: Arc<dyn call::UnaryHandler>,
}

#[async_trait]
impl call::UnaryHandler for UnaryInboundLayer {
    async fn handle(&self, ctx: &Context, request: Request) -> call::Result<Response> {
        self.mw.call(ctx, request, self.next.as_ref()).await
    }
}

/// Wrap `handler` in `middleware`, outermost first. `None` entries are
/// skipped.
pub fn unary_inbound_chain(
    middleware: impl IntoIterator<Item = Option<Arc<dyn UnaryInbound>>>,
    handler: Arc<dyn call::UnaryHandler>,
) -> Arc<dyn call::UnaryHandler> {
    let layers: Vec<_> = middleware.into_iter().flatten().collect();
    layers
        .into_iter()
        .rev()
        .fold(handler, |next, mw| Arc::new(UnaryInboundLayer { mw, next }))
}

struct OnewayInboundLayer {
    mw: Arc<dyn OnewayInbound>,
    next: Arc<dyn call::OnewayHandler>,
}

#[async_trait]
impl call::OnewayHandler for OnewayInboundLayer {
    async fn handle_oneway(&self, ctx: &Context, request: Request) -> call::Result<Ack> {
        self.mw.call(ctx, request, self.next.as_ref()).await
    }
}

pub fn oneway_inbound_chain(
    middleware: impl IntoIterator<Item = Option<Arc<dyn OnewayInbound>>>,
    handler: Arc<dyn call::OnewayHandler>,
) -> Arc<dyn call::OnewayHandler> {
    let layers: Vec<_> = middleware.into_iter().flatten().collect();
    layers
        .into_iter()
        .rev()
        .fold(handler, |next, mw| Arc::new(OnewayInboundLayer { mw, next }))
}

struct StreamInboundLayer {
    mw: Arc<dyn StreamInbound>,
    next: Arc<dyn call::StreamHandler>,
}

#[async_trait]
impl call::StreamHandler for StreamInboundLayer {
    async fn handle_stream(&self, stream: StreamCall) -> call::Result<()> {
        self.mw.call(stream, self.next.as_ref()).await
    }
}

pub fn stream_inbound_chain(
    middleware: impl IntoIterator<Item = Option<Arc<dyn StreamInbound>>>,
    handler: Arc<dyn call::StreamHandler>,
) -> Arc<dyn call::StreamHandler> {
    let layers: Vec<_> = middleware.into_iter().flatten().collect();
    layers
        .into_iter()
        .rev()
        .fold(handler, |next, mw| Arc::new(StreamInboundLayer { mw, next }))
}

struct UnaryOutboundLayer {
    mw: Arc<dyn UnaryOutbound>,
    next: Arc<dyn call::UnaryOutbound>,
}

#[async_trait]
impl call::Outbound for UnaryOutboundLayer {
    async fn start(&self) -> call::Result<()> {
        self.next.start().await
    }
    async fn stop(&self) -> call::Result<()> {
        self.next.stop().await
    }
    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.next.transports()
    }
}

#[async_trait]
impl call::UnaryOutbound for UnaryOutboundLayer {
    async fn call(&self, ctx: &Context, request: Request) -> call::Result<Response> {
        self.mw.call(ctx, request, self.next.as_ref()).await
    }
}

pub fn unary_outbound_chain(
    middleware: impl IntoIterator<Item = Option<Arc<dyn UnaryOutbound>>>,
    outbound: Arc<dyn call::UnaryOutbound>,
) -> Arc<dyn call::UnaryOutbound> {
    let layers: Vec<_> = middleware.into_iter().flatten().collect();
    layers
        .into_iter()
        .rev()
        .fold(outbound, |next, mw| Arc::new(UnaryOutboundLayer { mw, next }))
}

struct OnewayOutboundLayer {
    mw: Arc<dyn OnewayOutbound>,
    next: Arc<dyn call::OnewayOutbound>,
}

#[async_trait]
impl call::Outbound for OnewayOutboundLayer {
    async fn start(&self) -> call::Result<()> {
        self.next.start().await
    }
    async fn stop(&self) -> call::Result<()> {
        self.next.stop().await
    }
    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.next.transports()
    }
}

#[async_trait]
impl call::OnewayOutbound for OnewayOutboundLayer {
    async fn call_oneway(&self, ctx: &Context, request: Request) -> call::Result<Ack> {
        self.mw.call(ctx, request, self.next.as_ref()).await
    }
}

pub fn oneway_outbound_chain(
    middleware: impl IntoIterator<Item = Option<Arc<dyn OnewayOutbound>>>,
    outbound: Arc<dyn call::OnewayOutbound>,
) -> Arc<dyn call::OnewayOutbound> {
    let layers: Vec<_> = middleware.into_iter().flatten().collect();
    layers
        .into_iter()
        .rev()
        .fold(outbound, |next, mw| Arc::new(OnewayOutboundLayer { mw, next }))
}

struct StreamOutboundLayer {
    mw: Arc<dyn StreamOutbound>,
    next: Arc<dyn call::StreamOutbound>,
}

#[async_trait]
impl call::Outbound for StreamOutboundLayer {
    async fn start(&self) -> call::Result<()> {
        self.next.start().await
    }
    async fn stop(&self) -> call::Result<()> {
        self.next.stop().await
    }
    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.next.transports()
    }
}

#[async_trait]
impl call::StreamOutbound for StreamOutboundLayer {
    async fn call_stream(&self, ctx: &Context, request: Request) -> call::Result<StreamCall> {
        self.mw.call(ctx, request, self.next.as_ref()).await
    }
}

pub fn stream_outbound_chain(
    middleware: impl IntoIterator<Item = Option<Arc<dyn StreamOutbound>>>,
    outbound: Arc<dyn call::StreamOutbound>,
) -> Arc<dyn call::StreamOutbound> {
    let layers: Vec<_> = middleware.into_iter().flatten().collect();
    layers
        .into_iter()
        .rev()
        .fold(outbound, |next, mw| Arc::new(StreamOutboundLayer { mw, next }))
}

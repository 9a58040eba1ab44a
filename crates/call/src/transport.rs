//! The contracts a transport implementation must satisfy.
//!
//! A *transport* owns shared wire-level resources (listeners, connection
//! pools). An *inbound* is its listening half; an *outbound* its
//! initiating half. The dispatcher starts transports before outbounds
//! and outbounds before inbounds, and stops them in reverse.
//!
//! Lifecycle methods must be idempotent: an object registered in more
//! than one role may be started or stopped more than once.

use crate::{Ack, Context, HandlerSpec, Procedure, Request, Response, StreamCall};
use async_trait::async_trait;
use std::sync::Arc;

/// A shared wire-level resource, started before and stopped after the
/// inbounds and outbounds that ride it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short protocol name, e.g. "http" or "tchannel". Informational.
    fn name(&self) -> &str;

    async fn start(&self) -> crate::Result<()>;

    async fn stop(&self) -> crate::Result<()>;
}

/// Routes a received request to a registered handler.
///
/// Inbounds hold a router reference and consult it once per received
/// call. The table behind it is immutable after start; implementations
/// are free to use a lock-free read path.
pub trait Router: Send + Sync {
    /// Registered procedures, sorted by (service, procedure, encoding)
    /// for deterministic introspection output.
    fn procedures(&self) -> Vec<Procedure>;

    /// Select the handler for a request by (service, procedure,
    /// encoding), falling back to the procedure's encoding-wildcard
    /// registration when no exact match exists.
    fn choose(&self, ctx: &Context, request: &Request) -> crate::Result<HandlerSpec>;
}

/// The listening half of a transport.
#[async_trait]
pub trait Inbound: Send + Sync {
    /// Install the router consulted for each received call. Invoked by
    /// the dispatcher before `start`.
    fn set_router(&self, router: Arc<dyn Router>);

    async fn start(&self) -> crate::Result<()>;

    async fn stop(&self) -> crate::Result<()>;

    /// The transports this inbound rides, so the dispatcher can start
    /// them first.
    fn transports(&self) -> Vec<Arc<dyn Transport>>;
}

/// Lifecycle surface shared by the initiating halves of a transport.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn start(&self) -> crate::Result<()>;

    async fn stop(&self) -> crate::Result<()>;

    fn transports(&self) -> Vec<Arc<dyn Transport>>;
}

/// Sends request/response calls to a remote peer.
#[async_trait]
pub trait UnaryOutbound: Outbound {
    async fn call(&self, ctx: &Context, request: Request) -> crate::Result<Response>;
}

/// Sends fire-and-forget calls to a remote peer.
#[async_trait]
pub trait OnewayOutbound: Outbound {
    async fn call_oneway(&self, ctx: &Context, request: Request) -> crate::Result<Ack>;
}

/// Opens streaming calls to a remote peer.
#[async_trait]
pub trait StreamOutbound: Outbound {
    async fn call_stream(&self, ctx: &Context, request: Request) -> crate::Result<StreamCall>;
}

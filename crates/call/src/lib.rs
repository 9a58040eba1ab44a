//! Neutral request/response shapes and the contracts a transport must
//! satisfy to plug into the switchboard dispatcher.
//!
//! Callers and handlers are written once against these types; the wire
//! protocol, message encoding, and peer selection are configuration
//! concerns layered on top by other crates.

mod body;
mod context;
mod encoding;
mod errors;
mod headers;
mod lifecycle;
mod procedure;
mod request;
mod stream;

pub mod handler;
pub mod transport;
pub mod wire;

pub use body::Body;
pub use context::{Context, Deadline};
pub use encoding::Encoding;
pub use errors::{Code, Error, Fault, Result};
pub use handler::{
    oneway_handler_fn, unary_handler_fn, HandlerSpec, OnewayHandler, RpcType, StreamHandler,
    UnaryHandler,
};
pub use headers::Headers;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use procedure::Procedure;
pub use request::{Ack, ApplicationError, Request, Response};
pub use stream::{stream_pair, StreamCall, StreamConduit};
pub use transport::{
    Inbound, OnewayOutbound, Outbound, Router, StreamOutbound, Transport, UnaryOutbound,
};

//! The wire-level vocabulary transports must preserve bit-exactly.
//!
//! The core does not implement any wire protocol; these tables are the
//! contract between the dispatcher and the transport implementations it
//! hosts, so that a request relayed from one protocol to another keeps
//! its call metadata intact.

use crate::Code;
use std::time::Duration;

/// Default request TTL when a caller supplies none.
pub const DEFAULT_TTL: Duration = Duration::from_millis(30_000);

/// Application header keys may not begin with these prefixes; they are
/// reserved for the transport metadata below.
pub const RESERVED_HEADER_PREFIXES: [&str; 2] = ["rpc-", "$rpc$-"];

/// HTTP transport headers (case-insensitive on the wire).
pub mod http {
    pub const CALLER: &str = "Rpc-Caller";
    pub const SERVICE: &str = "Rpc-Service";
    pub const PROCEDURE: &str = "Rpc-Procedure";
    pub const ENCODING: &str = "Rpc-Encoding";
    pub const SHARD_KEY: &str = "Rpc-Shard-Key";
    pub const ROUTING_KEY: &str = "Rpc-Routing-Key";
    pub const ROUTING_DELEGATE: &str = "Rpc-Routing-Delegate";
    /// Milliseconds remaining until the caller's deadline.
    pub const TTL_MS: &str = "Context-TTL-MS";
    /// Set to [`STATUS_ERROR`] when the response carries an application error.
    pub const STATUS: &str = "Rpc-Status";
    pub const STATUS_ERROR: &str = "error";
    pub const ERROR_NAME: &str = "Rpc-Error";
    /// User request headers travel as `Rpc-Header-<Name>`.
    pub const HEADER_PREFIX: &str = "Rpc-Header-";
    /// Context headers (`Context-<Name>`) propagate through the call graph.
    pub const CONTEXT_PREFIX: &str = "Context-";
}

/// TChannel transport headers. The procedure travels as arg1 and user
/// headers as the arg2 key/value block; the deadline rides the frame ttl.
pub mod tchannel {
    pub const CALLER: &str = "cn";
    pub const SERVICE: &str = "sn";
    pub const ENCODING: &str = "as";
    pub const SHARD_KEY: &str = "sk";
    pub const ROUTING_KEY: &str = "rk";
    pub const ROUTING_DELEGATE: &str = "rd";
}

/// The HTTP response status a transport should emit for a failed call.
pub fn http_status(code: Code) -> u16 {
    match code {
        Code::InvalidArgument => 400,
        Code::Unauthenticated => 401,
        Code::PermissionDenied => 403,
        Code::NotFound => 404,
        Code::ResourceExhausted => 429,
        Code::Unimplemented => 501,
        Code::Unavailable | Code::DeadlineExceeded | Code::Internal => 500,
        // Codes without a dedicated mapping surface as a server error.
        _ => 500,
    }
}

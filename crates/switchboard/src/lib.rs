//! A transport- and encoding-agnostic RPC dispatcher.
//!
//! A [`Dispatcher`] hosts inbound listeners for any number of wire
//! protocols, routes received calls to registered handlers, and sends
//! calls through outbound connections to peers — over possibly
//! different protocols than those it serves. Handlers and call sites
//! speak only the neutral request/response shapes of the `call` crate;
//! wire protocol, encoding, and peer selection are configuration.
//!
//! Everything a dispatcher touches is instrumented: unless disabled,
//! each inbound and outbound chain carries the observability middleware
//! as its outermost layer, emitting per-edge metrics and structured
//! logs.

mod dispatcher;
mod router;

pub mod middleware;
pub mod observe;

pub use dispatcher::{ClientConfig, Config, Dispatcher, Outbounds, PhasedStarter};
pub use router::{MapRouter, RouterMiddleware};

use std::fmt;

/// Errors raised at configuration and lifecycle boundaries. Failures of
/// individual calls are `call::Error`s instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid service name {0:?}")]
    InvalidServiceName(String),
    #[error("service {service:?} registered a procedure with an empty name")]
    EmptyProcedureName { service: String },
    #[error(
        "service {service:?} registered procedure {procedure:?} (encoding {encoding:?}) more than once"
    )]
    DuplicateProcedure {
        service: String,
        procedure: String,
        encoding: String,
    },
    #[error("dispatcher {name:?} cannot register procedures after start")]
    RegisterAfterStart { name: String },
    #[error("{phase} invoked out of order: dispatcher is {actual}, expected {expected}")]
    PhaseOrder {
        phase: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Call(#[from] call::Error),
    #[error("errors while stopping dispatcher members: {0}")]
    Aggregate(ErrorList),
}

/// Every member error collected during a stop pass.
#[derive(Debug)]
pub struct ErrorList(pub Vec<call::Error>);

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

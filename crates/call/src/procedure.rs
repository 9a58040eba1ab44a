use crate::{Encoding, HandlerSpec};
use std::fmt;
use std::sync::Arc;

/// A registered procedure: the (service, name, encoding) address of a
/// handler.
///
/// `encoding: None` registers an encoding wildcard, matched only when no
/// encoding-specific registration exists for the same (service, name).
/// An empty `service` defaults to the registering dispatcher's own
/// service name.
#[derive(Clone)]
pub struct Procedure {
    pub service: String,
    pub name: String,
    pub encoding: Option<Encoding>,
    pub spec: HandlerSpec,
}

impl Procedure {
    pub fn unary(name: impl Into<String>, handler: Arc<dyn crate::UnaryHandler>) -> Self {
        Self {
            service: String::new(),
            name: name.into(),
            encoding: None,
            spec: HandlerSpec::Unary(handler),
        }
    }

    pub fn oneway(name: impl Into<String>, handler: Arc<dyn crate::OnewayHandler>) -> Self {
        Self {
            service: String::new(),
            name: name.into(),
            encoding: None,
            spec: HandlerSpec::Oneway(handler),
        }
    }

    pub fn stream(name: impl Into<String>, handler: Arc<dyn crate::StreamHandler>) -> Self {
        Self {
            service: String::new(),
            name: name.into(),
            encoding: None,
            spec: HandlerSpec::Stream(handler),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// The encoding as it appears in listings: the wildcard is the
    /// empty string.
    pub fn encoding_label(&self) -> &str {
        self.encoding.as_ref().map(Encoding::as_str).unwrap_or("")
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{} ({})",
            self.spec.rpc_type(),
            self.service,
            self.name,
            self.encoding_label(),
        )
    }
}

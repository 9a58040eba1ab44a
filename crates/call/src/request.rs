use crate::{Body, Encoding, Error, Headers};

/// The neutral request shape every inbound and outbound speaks.
///
/// Transports translate their wire format into this struct on receipt
/// and back out of it on send; handlers and middleware never see wire
/// details.
#[derive(Debug, Default)]
pub struct Request {
    /// Name of the originating service.
    pub caller: String,
    /// Name of the target service.
    pub service: String,
    /// Name of the transport that carried the request. Informational.
    pub transport: String,
    /// Serialisation format of `body`.
    pub encoding: Encoding,
    /// Name of the procedure being called.
    pub procedure: String,
    /// Application headers.
    pub headers: Headers,
    /// Key for shard-addressed peer selection, if any.
    pub shard_key: Option<String>,
    /// Opaque routing key, carried verbatim.
    pub routing_key: Option<String>,
    /// Opaque routing delegate, carried verbatim. Does not suppress
    /// `routing_key`; interpretation belongs to router middleware.
    pub routing_delegate: Option<String>,
    /// Message payload, readable exactly once.
    pub body: Body,
}

impl Request {
    pub fn new(
        caller: impl Into<String>,
        service: impl Into<String>,
        procedure: impl Into<String>,
        encoding: Encoding,
    ) -> Self {
        Self {
            caller: caller.into(),
            service: service.into(),
            procedure: procedure.into(),
            encoding,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_shard_key(mut self, key: impl Into<String>) -> Self {
        self.shard_key = Some(key.into());
        self
    }

    /// Check the invariants every request must satisfy before dispatch:
    /// caller, service, and procedure are non-empty, and no application
    /// header uses a reserved transport prefix.
    pub fn validate(&self) -> crate::Result<()> {
        let mut missing = Vec::new();
        if self.caller.is_empty() {
            missing.push("caller name");
        }
        if self.service.is_empty() {
            missing.push("service name");
        }
        if self.procedure.is_empty() {
            missing.push("procedure name");
        }
        if !missing.is_empty() {
            return Err(Error::invalid_argument(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        if let Some(key) = self.headers.reserved_key() {
            return Err(Error::invalid_argument(format!(
                "application header {key:?} uses a reserved transport prefix"
            )));
        }
        Ok(())
    }
}

/// Details of a handler-level failure delivered inside a well-formed
/// response. An application error is a successful *call*: the transport
/// completed its job, the handler's answer happens to be a domain error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationError {
    /// Short name of the error, e.g. a Thrift exception type.
    pub name: String,
    /// Codec-specific rendering of the error, if any.
    pub details: Option<String>,
}

/// The neutral response shape.
#[derive(Debug, Default)]
pub struct Response {
    pub headers: Headers,
    pub body: Body,
    /// Present when the handler reported a domain-level failure. The
    /// body is still well-formed for the encoding in that case.
    pub application_error: Option<ApplicationError>,
    /// Echo of the service that handled the request.
    pub service: String,
}

impl Response {
    pub fn with_body(body: impl Into<Body>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn is_application_error(&self) -> bool {
        self.application_error.is_some()
    }
}

/// Acknowledgment of a fire-and-forget call: the transport accepted the
/// request for delivery. Carries an optional transport-specific token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub token: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Code;

    fn request() -> Request {
        Request::new("caller", "service", "procedure", Encoding::Json)
    }

    #[test]
    fn validate_accepts_complete_requests() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn validate_lists_all_missing_fields() {
        let req = Request {
            caller: String::new(),
            procedure: String::new(),
            ..request()
        };
        let err = req.validate().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "missing caller name, procedure name");
    }

    #[test]
    fn validate_rejects_reserved_headers() {
        let mut req = request();
        req.headers.insert("Rpc-Encoding", "json");
        let err = req.validate().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(err.message().contains("rpc-encoding"));
    }
}

use std::fmt;

/// Encoding tags the serialisation format of a message body. The core
/// never inspects bodies; the tag exists so routers can distinguish
/// registrations and transports can round-trip the wire header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Encoding {
    #[default]
    Raw,
    Json,
    Thrift,
    Protobuf,
    /// An encoding the core has no built-in name for, carried verbatim.
    Other(String),
}

impl Encoding {
    pub fn as_str(&self) -> &str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Json => "json",
            Encoding::Thrift => "thrift",
            Encoding::Protobuf => "protobuf",
            Encoding::Other(name) => name,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Encoding {
    fn from(name: &str) -> Self {
        match name {
            "raw" => Encoding::Raw,
            "json" => Encoding::Json,
            "thrift" => Encoding::Thrift,
            "protobuf" => Encoding::Protobuf,
            other => Encoding::Other(other.to_string()),
        }
    }
}

impl From<String> for Encoding {
    fn from(name: String) -> Self {
        Encoding::from(name.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::Encoding;

    #[test]
    fn round_trips_names() {
        for name in ["raw", "json", "thrift", "protobuf", "msgpack"] {
            assert_eq!(Encoding::from(name).as_str(), name);
        }
    }
}

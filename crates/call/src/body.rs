use bytes::{Bytes, BytesMut};
use futures::Stream;
use futures::StreamExt;
use std::fmt;
use std::pin::Pin;

/// A boxed chunk stream that is both `Send` and `Sync`, so that a `Body`
/// can be held across await points inside `Send` futures built from `&Request`.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + Sync + 'a>>;

/// An opaque, readable-exactly-once message body.
///
/// Bodies arrive either fully buffered or as a stream of chunks from the
/// transport. Consuming the body (via [`Body::bytes`] or [`Body::into_stream`])
/// takes ownership; there is no rewind.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

impl Body {
    pub fn from_stream(stream: BoxStream<'static, std::io::Result<Bytes>>) -> Self {
        Body::Stream(stream)
    }

    /// Read the entire body into one contiguous buffer.
    pub async fn bytes(self) -> crate::Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// View the body as a chunk stream regardless of its variant.
    pub fn into_stream(self) -> BoxStream<'static, std::io::Result<Bytes>> {
        match self {
            Body::Empty => Box::pin(futures::stream::empty()),
            Body::Bytes(bytes) => Box::pin(futures::stream::once(async move { Ok(bytes) })),
            Body::Stream(stream) => stream,
        }
    }

    /// True only for the `Empty` variant; a `Stream` body may still turn
    /// out to be empty once read.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty) || matches!(self, Body::Bytes(b) if b.is_empty())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes.into())
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Bytes(s.into_bytes().into())
    }
}

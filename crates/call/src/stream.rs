//! Stream call handles.
//!
//! A transport supplies the [`StreamConduit`] half: an ordered,
//! bidirectional channel of message payloads for one call. The core
//! wraps it in a [`StreamCall`] that carries the call [`Context`], so
//! reads and writes honour the deadline and cancellation signal.

use crate::{Context, Error, Request};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// The transport-owned half of a streaming call.
///
/// `recv` returning `Ok(None)` is the clean end of the remote's message
/// stream. Messages on a single conduit are ordered; nothing is promised
/// across conduits.
#[async_trait]
pub trait StreamConduit: Send {
    /// The call metadata this stream was opened with. The request body
    /// is always empty for streams; payloads travel as messages.
    fn request(&self) -> &Request;

    async fn send(&mut self, message: Bytes) -> crate::Result<()>;

    async fn recv(&mut self) -> crate::Result<Option<Bytes>>;

    /// Close the local send half, optionally conveying a terminal error.
    async fn close(&mut self, error: Option<Error>) -> crate::Result<()>;
}

/// One end of a streaming call, held by a handler (server side) or
/// returned to a caller (client side).
pub struct StreamCall {
    ctx: Context,
    conduit: Box<dyn StreamConduit>,
}

impl StreamCall {
    pub fn new(ctx: Context, conduit: Box<dyn StreamConduit>) -> Self {
        Self { ctx, conduit }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn request(&self) -> &Request {
        self.conduit.request()
    }

    pub async fn send(&mut self, message: Bytes) -> crate::Result<()> {
        let conduit = &mut self.conduit;
        self.ctx.run(conduit.send(message)).await
    }

    pub async fn recv(&mut self) -> crate::Result<Option<Bytes>> {
        let conduit = &mut self.conduit;
        self.ctx.run(conduit.recv()).await
    }

    pub async fn close(&mut self, error: Option<Error>) -> crate::Result<()> {
        let conduit = &mut self.conduit;
        self.ctx.run(conduit.close(error)).await
    }

    /// Re-wrap the underlying conduit, e.g. to interpose instrumentation.
    pub fn map_conduit(
        self,
        f: impl FnOnce(Box<dyn StreamConduit>) -> Box<dyn StreamConduit>,
    ) -> Self {
        Self {
            ctx: self.ctx,
            conduit: f(self.conduit),
        }
    }
}

impl std::fmt::Debug for StreamCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCall")
            .field("procedure", &self.request().procedure)
            .field("service", &self.request().service)
            .finish()
    }
}

/// An in-process conduit pair, for transports that loop back locally and
/// for tests. Messages sent on one end arrive at the other; dropping an
/// end or closing it ends the peer's receive stream.
pub fn stream_pair(ctx: &Context, request: Request) -> (StreamCall, StreamCall) {
    // The remote end sees the same call metadata.
    let mirror = Request {
        caller: request.caller.clone(),
        service: request.service.clone(),
        transport: request.transport.clone(),
        encoding: request.encoding.clone(),
        procedure: request.procedure.clone(),
        headers: request.headers.clone(),
        shard_key: request.shard_key.clone(),
        routing_key: request.routing_key.clone(),
        routing_delegate: request.routing_delegate.clone(),
        body: crate::Body::Empty,
    };

    let (client_tx, server_rx) = mpsc::channel(16);
    let (server_tx, client_rx) = mpsc::channel(16);

    let client = StreamCall::new(
        ctx.clone(),
        Box::new(PairConduit {
            request,
            tx: Some(client_tx),
            rx: client_rx,
        }),
    );
    let server = StreamCall::new(
        ctx.clone(),
        Box::new(PairConduit {
            request: mirror,
            tx: Some(server_tx),
            rx: server_rx,
        }),
    );
    (client, server)
}

struct PairConduit {
    request: Request,
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl StreamConduit for PairConduit {
    fn request(&self) -> &Request {
        &self.request
    }

    async fn send(&mut self, message: Bytes) -> crate::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("send on closed stream"))?;
        tx.send(message)
            .await
            .map_err(|_| Error::unavailable("stream peer is gone"))
    }

    async fn recv(&mut self) -> crate::Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self, _error: Option<Error>) -> crate::Result<()> {
        self.tx = None;
        Ok(())
    }
}

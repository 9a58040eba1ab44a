//! The built-in observability middleware: per-edge metrics and
//! structured logs for every call that traverses a dispatcher.
//!
//! The dispatcher installs this as the outermost layer of every inbound
//! and outbound chain unless auto-observability is disabled. Metrics go
//! through the `metrics` facade; logs through `tracing`. Neither binds a
//! backend: the embedding process installs whatever exporter and
//! subscriber it wants.

mod edge;
mod scrub;

pub(crate) use scrub::is_valid_service_name;

use crate::middleware;
use async_trait::async_trait;
use call::{
    OnewayHandler as _, OnewayOutbound as _, StreamHandler as _, StreamOutbound as _,
    UnaryHandler as _, UnaryOutbound as _,
};
use call::{Ack, Context, Error, Fault, Request, Response, RpcType, StreamCall, StreamConduit};
use edge::{Direction, Edge, Graph};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Level;

/// Log level per call outcome.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeLevels {
    pub success: Level,
    pub application_error: Level,
    pub client_error: Level,
    pub server_error: Level,
}

impl Default for OutcomeLevels {
    fn default() -> Self {
        Self {
            success: Level::DEBUG,
            application_error: Level::ERROR,
            client_error: Level::ERROR,
            server_error: Level::ERROR,
        }
    }
}

/// Observability configuration, per dispatcher.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub inbound_levels: OutcomeLevels,
    pub outbound_levels: OutcomeLevels,
    /// Label dimensions dropped from every emitted metric.
    pub blocked_labels: Vec<String>,
}

// tracing requires a const level per event site; dispatch on the
// configured level instead.
macro_rules! dyn_event {
    ($lvl:expr, $($arg:tt)+) => {{
        let lvl = $lvl;
        if lvl == Level::ERROR {
            tracing::event!(Level::ERROR, $($arg)+)
        } else if lvl == Level::WARN {
            tracing::event!(Level::WARN, $($arg)+)
        } else if lvl == Level::INFO {
            tracing::event!(Level::INFO, $($arg)+)
        } else if lvl == Level::DEBUG {
            tracing::event!(Level::DEBUG, $($arg)+)
        } else {
            tracing::event!(Level::TRACE, $($arg)+)
        }
    }};
}

/// The middleware itself. One instance per dispatcher; cloned into every
/// chain it instruments.
pub struct Middleware {
    graph: Graph,
    inbound_levels: OutcomeLevels,
    outbound_levels: OutcomeLevels,
}

impl Middleware {
    pub fn new(config: Config) -> Self {
        Self {
            graph: Graph::new(config.blocked_labels),
            inbound_levels: config.inbound_levels,
            outbound_levels: config.outbound_levels,
        }
    }

    fn levels(&self, direction: Direction) -> OutcomeLevels {
        match direction {
            Direction::Inbound => self.inbound_levels,
            Direction::Outbound => self.outbound_levels,
        }
    }

    fn emit(edge: &Edge, level: Level, outcome: &'static str, elapsed: Duration, error: Option<&str>) {
        let meta = &edge.meta;
        dyn_event!(
            level,
            caller = %meta.caller,
            service = %meta.service,
            transport = %meta.transport,
            procedure = %meta.procedure,
            encoding = %meta.encoding,
            direction = meta.direction.as_str(),
            rpc_type = meta.rpc_type.as_str(),
            latency_ms = elapsed.as_millis() as u64,
            outcome = outcome,
            error = error.unwrap_or(""),
            "handled call"
        );
    }

    fn record_panic(edge: &Edge, elapsed: Duration, payload: &(dyn Any + Send)) -> Error {
        let message = panic_message(payload);
        edge.panics.increment(1);
        edge.record_server_failure(elapsed);
        tracing::error!(
            caller = %edge.meta.caller,
            service = %edge.meta.service,
            procedure = %edge.meta.procedure,
            panic = %message,
            stack = %std::backtrace::Backtrace::force_capture(),
            "handler panicked"
        );
        Error::internal(format!("handler panicked: {message}"))
    }

    fn record_error(edge: &Edge, levels: OutcomeLevels, elapsed: Duration, err: &Error) {
        let rendered = err.to_string();
        match err.code().fault() {
            Fault::Client => {
                edge.record_caller_failure(elapsed);
                Self::emit(
                    edge,
                    levels.client_error,
                    "client_error",
                    elapsed,
                    Some(&rendered),
                );
            }
            Fault::Server => {
                edge.record_server_failure(elapsed);
                Self::emit(
                    edge,
                    levels.server_error,
                    "server_error",
                    elapsed,
                    Some(&rendered),
                );
            }
        }
    }

    fn finish_response(
        edge: &Edge,
        levels: OutcomeLevels,
        elapsed: Duration,
        result: call::Result<Response>,
    ) -> call::Result<Response> {
        match result {
            Ok(response) => {
                if let Some(app_err) = &response.application_error {
                    edge.record_application_error(elapsed);
                    Self::emit(
                        edge,
                        levels.application_error,
                        "application_error",
                        elapsed,
                        Some(app_err.name.as_str()),
                    );
                } else {
                    edge.record_success(elapsed);
                    Self::emit(edge, levels.success, "success", elapsed, None);
                }
                Ok(response)
            }
            Err(err) => {
                Self::record_error(edge, levels, elapsed, &err);
                Err(err)
            }
        }
    }

    fn finish_simple<T>(
        edge: &Edge,
        levels: OutcomeLevels,
        elapsed: Duration,
        result: call::Result<T>,
    ) -> call::Result<T> {
        match result {
            Ok(value) => {
                edge.record_success(elapsed);
                Self::emit(edge, levels.success, "success", elapsed, None);
                Ok(value)
            }
            // End-of-stream counts as success; the marker still rides
            // the error field so operators can tell the two apart.
            Err(err) if err.is_eof() => {
                edge.record_success(elapsed);
                Self::emit(edge, levels.success, "success", elapsed, Some("EOF"));
                Err(err)
            }
            Err(err) => {
                Self::record_error(edge, levels, elapsed, &err);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl middleware::UnaryInbound for Middleware {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::UnaryHandler,
    ) -> call::Result<Response> {
        let edge = self.graph.edge(Direction::Inbound, RpcType::Unary, &request);
        let levels = self.levels(Direction::Inbound);
        edge.calls.increment(1);
        let start = Instant::now();

        let outcome = AssertUnwindSafe(next.handle(ctx, request)).catch_unwind().await;
        let elapsed = start.elapsed();
        match outcome {
            Ok(result) => Self::finish_response(&edge, levels, elapsed, result),
            Err(payload) => Err(Self::record_panic(&edge, elapsed, payload.as_ref())),
        }
    }
}

#[async_trait]
impl middleware::OnewayInbound for Middleware {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::OnewayHandler,
    ) -> call::Result<Ack> {
        let edge = self.graph.edge(Direction::Inbound, RpcType::Oneway, &request);
        let levels = self.levels(Direction::Inbound);
        edge.calls.increment(1);
        let start = Instant::now();

        let outcome = AssertUnwindSafe(next.handle_oneway(ctx, request))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();
        match outcome {
            Ok(result) => Self::finish_simple(&edge, levels, elapsed, result),
            Err(payload) => Err(Self::record_panic(&edge, elapsed, payload.as_ref())),
        }
    }
}

#[async_trait]
impl middleware::StreamInbound for Middleware {
    async fn call(
        &self,
        stream: StreamCall,
        next: &dyn call::StreamHandler,
    ) -> call::Result<()> {
        let edge = self.graph.edge(Direction::Inbound, RpcType::Stream, stream.request());
        let levels = self.levels(Direction::Inbound);
        edge.calls.increment(1);
        let start = Instant::now();

        let stream = instrument_stream(stream, edge.clone(), levels);
        let outcome = AssertUnwindSafe(next.handle_stream(stream)).catch_unwind().await;
        let elapsed = start.elapsed();
        match outcome {
            Ok(result) => Self::finish_simple(&edge, levels, elapsed, result),
            Err(payload) => Err(Self::record_panic(&edge, elapsed, payload.as_ref())),
        }
    }
}

#[async_trait]
impl middleware::UnaryOutbound for Middleware {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::UnaryOutbound,
    ) -> call::Result<Response> {
        let edge = self.graph.edge(Direction::Outbound, RpcType::Unary, &request);
        let levels = self.levels(Direction::Outbound);
        edge.calls.increment(1);
        let start = Instant::now();

        let result = next.call(ctx, request).await;
        Self::finish_response(&edge, levels, start.elapsed(), result)
    }
}

#[async_trait]
impl middleware::OnewayOutbound for Middleware {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::OnewayOutbound,
    ) -> call::Result<Ack> {
        let edge = self.graph.edge(Direction::Outbound, RpcType::Oneway, &request);
        let levels = self.levels(Direction::Outbound);
        edge.calls.increment(1);
        let start = Instant::now();

        let result = next.call_oneway(ctx, request).await;
        Self::finish_simple(&edge, levels, start.elapsed(), result)
    }
}

#[async_trait]
impl middleware::StreamOutbound for Middleware {
    async fn call(
        &self,
        ctx: &Context,
        request: Request,
        next: &dyn call::StreamOutbound,
    ) -> call::Result<StreamCall> {
        let edge = self.graph.edge(Direction::Outbound, RpcType::Stream, &request);
        let levels = self.levels(Direction::Outbound);
        edge.calls.increment(1);
        let start = Instant::now();

        let result = next.call_stream(ctx, request).await;
        let elapsed = start.elapsed();
        match result {
            Ok(stream) => {
                edge.record_success(elapsed);
                Self::emit(&edge, levels.success, "success", elapsed, None);
                Ok(instrument_stream(stream, edge.clone(), levels))
            }
            Err(err) => {
                Self::record_error(&edge, levels, elapsed, &err);
                Err(err)
            }
        }
    }
}

fn instrument_stream(stream: StreamCall, edge: Arc<Edge>, levels: OutcomeLevels) -> StreamCall {
    stream.map_conduit(move |inner| {
        Box::new(InstrumentedConduit {
            inner,
            edge,
            levels,
            eof_seen: false,
        })
    })
}

/// Counts stream messages and reports end-of-stream as a success log
/// carrying the EOF marker in the error field.
struct InstrumentedConduit {
    inner: Box<dyn StreamConduit>,
    edge: Arc<Edge>,
    levels: OutcomeLevels,
    eof_seen: bool,
}

impl InstrumentedConduit {
    fn log_eof(&mut self) {
        if self.eof_seen {
            return;
        }
        self.eof_seen = true;
        Middleware::emit(
            &self.edge,
            self.levels.success,
            "success",
            Duration::ZERO,
            Some("EOF"),
        );
    }
}

#[async_trait]
impl StreamConduit for InstrumentedConduit {
    fn request(&self) -> &Request {
        self.inner.request()
    }

    async fn send(&mut self, message: bytes::Bytes) -> call::Result<()> {
        self.inner.send(message).await?;
        self.edge.stream_sends.increment(1);
        Ok(())
    }

    async fn recv(&mut self) -> call::Result<Option<bytes::Bytes>> {
        match self.inner.recv().await {
            Ok(Some(message)) => {
                self.edge.stream_receives.increment(1);
                Ok(Some(message))
            }
            Ok(None) => {
                self.log_eof();
                Ok(None)
            }
            // Transports that surface end-of-stream as an error are
            // normalised to the clean EOF shape.
            Err(err) if err.is_eof() => {
                self.log_eof();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn close(&mut self, error: Option<Error>) -> call::Result<()> {
        self.inner.close(error).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod test;

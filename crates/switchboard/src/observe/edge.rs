//! The per-edge statistics cache.
//!
//! An edge is one unique (caller, service, procedure, encoding,
//! shard key, routing key, routing delegate) tuple per direction and
//! RPC type. Edges are created lazily on first traffic and live for the
//! dispatcher's lifetime, so the metric handles they hold are registered
//! once and incremented without further lookups.

use super::scrub::{is_valid_metric_name, scrub_label_value};
use call::{Request, RpcType};
use metrics::{Counter, Histogram};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Raw (unscrubbed) values identifying an edge, used for log fields.
pub(crate) struct EdgeMeta {
    pub(crate) caller: String,
    pub(crate) service: String,
    pub(crate) transport: String,
    pub(crate) procedure: String,
    pub(crate) encoding: String,
    pub(crate) shard_key: String,
    pub(crate) routing_key: String,
    pub(crate) routing_delegate: String,
    pub(crate) direction: Direction,
    pub(crate) rpc_type: RpcType,
}

const CALLS: &str = "rpc_calls";
const SUCCESSES: &str = "rpc_successes";
const CALLER_FAILURES: &str = "rpc_caller_failures";
const SERVER_FAILURES: &str = "rpc_server_failures";
const APPLICATION_ERRORS: &str = "rpc_application_errors";
const PANICS: &str = "rpc_panics";
const SUCCESS_LATENCY: &str = "rpc_success_latency_seconds";
const CALLER_FAILURE_LATENCY: &str = "rpc_caller_failure_latency_seconds";
const SERVER_FAILURE_LATENCY: &str = "rpc_server_failure_latency_seconds";
const APPLICATION_ERROR_LATENCY: &str = "rpc_application_error_latency_seconds";
const STREAM_RECEIVES: &str = "rpc_stream_receives";
const STREAM_SENDS: &str = "rpc_stream_sends";

const ALL_METRIC_NAMES: [&str; 12] = [
    CALLS,
    SUCCESSES,
    CALLER_FAILURES,
    SERVER_FAILURES,
    APPLICATION_ERRORS,
    PANICS,
    SUCCESS_LATENCY,
    CALLER_FAILURE_LATENCY,
    SERVER_FAILURE_LATENCY,
    APPLICATION_ERROR_LATENCY,
    STREAM_RECEIVES,
    STREAM_SENDS,
];

/// Cached counters and latency histograms for one edge. Exactly one
/// outcome counter and one latency sample are recorded per call.
pub(crate) struct Edge {
    pub(crate) meta: EdgeMeta,
    pub(crate) calls: Counter,
    pub(crate) successes: Counter,
    pub(crate) caller_failures: Counter,
    pub(crate) server_failures: Counter,
    pub(crate) application_errors: Counter,
    pub(crate) panics: Counter,
    success_latency: Histogram,
    caller_failure_latency: Histogram,
    server_failure_latency: Histogram,
    application_error_latency: Histogram,
    pub(crate) stream_receives: Counter,
    pub(crate) stream_sends: Counter,
}

impl Edge {
    fn new(meta: EdgeMeta, blocked_labels: &[String]) -> Self {
        debug_assert!(ALL_METRIC_NAMES.iter().all(|name| is_valid_metric_name(name)));

        let mut labels: Vec<metrics::Label> = Vec::with_capacity(10);
        let mut push = |name: &'static str, value: &str| {
            if value.is_empty() {
                return;
            }
            if blocked_labels.iter().any(|blocked| blocked == name) {
                return;
            }
            labels.push(metrics::Label::new(
                name,
                scrub_label_value(value).to_string(),
            ));
        };
        push("caller", &meta.caller);
        push("service", &meta.service);
        push("transport", &meta.transport);
        push("procedure", &meta.procedure);
        push("encoding", &meta.encoding);
        push("shard_key", &meta.shard_key);
        push("routing_key", &meta.routing_key);
        push("routing_delegate", &meta.routing_delegate);
        push("direction", meta.direction.as_str());
        push("rpc_type", meta.rpc_type.as_str());

        Self {
            calls: metrics::counter!(CALLS, labels.clone()),
            successes: metrics::counter!(SUCCESSES, labels.clone()),
            caller_failures: metrics::counter!(CALLER_FAILURES, labels.clone()),
            server_failures: metrics::counter!(SERVER_FAILURES, labels.clone()),
            application_errors: metrics::counter!(APPLICATION_ERRORS, labels.clone()),
            panics: metrics::counter!(PANICS, labels.clone()),
            success_latency: metrics::histogram!(SUCCESS_LATENCY, labels.clone()),
            caller_failure_latency: metrics::histogram!(CALLER_FAILURE_LATENCY, labels.clone()),
            server_failure_latency: metrics::histogram!(SERVER_FAILURE_LATENCY, labels.clone()),
            application_error_latency: metrics::histogram!(
                APPLICATION_ERROR_LATENCY,
                labels.clone()
            ),
            stream_receives: metrics::counter!(STREAM_RECEIVES, labels.clone()),
            stream_sends: metrics::counter!(STREAM_SENDS, labels),
            meta,
        }
    }

    pub(crate) fn record_success(&self, elapsed: Duration) {
        self.successes.increment(1);
        self.success_latency.record(elapsed.as_secs_f64());
    }

    pub(crate) fn record_caller_failure(&self, elapsed: Duration) {
        self.caller_failures.increment(1);
        self.caller_failure_latency.record(elapsed.as_secs_f64());
    }

    pub(crate) fn record_server_failure(&self, elapsed: Duration) {
        self.server_failures.increment(1);
        self.server_failure_latency.record(elapsed.as_secs_f64());
    }

    pub(crate) fn record_application_error(&self, elapsed: Duration) {
        self.application_errors.increment(1);
        self.application_error_latency.record(elapsed.as_secs_f64());
    }
}

/// The edge cache: read-locked lookup on the hot path, write-locked
/// double-checked insertion on first traffic over an edge.
///
/// One graph exists per dispatcher; nothing here is process-global, so
/// multiple dispatchers coexist in one process.
pub(crate) struct Graph {
    edges: RwLock<HashMap<String, Arc<Edge>>>,
    blocked_labels: Vec<String>,
}

impl Graph {
    pub(crate) fn new(blocked_labels: Vec<String>) -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            blocked_labels,
        }
    }

    pub(crate) fn edge(
        &self,
        direction: Direction,
        rpc_type: RpcType,
        request: &Request,
    ) -> Arc<Edge> {
        let key = edge_key(direction, rpc_type, request);
        if let Some(edge) = self
            .edges
            .read()
            .expect("edge cache lock is never poisoned")
            .get(&key)
        {
            return edge.clone();
        }

        let mut edges = self
            .edges
            .write()
            .expect("edge cache lock is never poisoned");
        // Double-checked: another call may have created it while we
        // waited for the write lock.
        if let Some(edge) = edges.get(&key) {
            return edge.clone();
        }
        let edge = Arc::new(Edge::new(
            EdgeMeta {
                caller: request.caller.clone(),
                service: request.service.clone(),
                transport: request.transport.clone(),
                procedure: request.procedure.clone(),
                encoding: request.encoding.as_str().to_string(),
                shard_key: request.shard_key.clone().unwrap_or_default(),
                routing_key: request.routing_key.clone().unwrap_or_default(),
                routing_delegate: request.routing_delegate.clone().unwrap_or_default(),
                direction,
                rpc_type,
            },
            &self.blocked_labels,
        ));
        edges.insert(key, edge.clone());
        edge
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.edges
            .read()
            .expect("edge cache lock is never poisoned")
            .len()
    }
}

fn edge_key(direction: Direction, rpc_type: RpcType, request: &Request) -> String {
    [
        request.caller.as_str(),
        request.service.as_str(),
        request.procedure.as_str(),
        request.encoding.as_str(),
        request.shard_key.as_deref().unwrap_or(""),
        request.routing_key.as_deref().unwrap_or(""),
        request.routing_delegate.as_deref().unwrap_or(""),
        direction.as_str(),
        rpc_type.as_str(),
    ]
    .join("\0")
}

#[cfg(test)]
mod test {
    use super::*;
    use call::Encoding;

    #[test]
    fn identical_requests_share_an_edge() {
        let graph = Graph::new(Vec::new());
        let req = Request::new("a", "b", "Get", Encoding::Json);
        let first = graph.edge(Direction::Inbound, RpcType::Unary, &req);
        let second = graph.edge(Direction::Inbound, RpcType::Unary, &req);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn distinct_tuples_get_distinct_edges() {
        let graph = Graph::new(Vec::new());
        let req = Request::new("a", "b", "Get", Encoding::Json);
        graph.edge(Direction::Inbound, RpcType::Unary, &req);
        graph.edge(Direction::Outbound, RpcType::Unary, &req);

        let mut sharded = Request::new("a", "b", "Get", Encoding::Json);
        sharded.shard_key = Some("s1".to_string());
        graph.edge(Direction::Inbound, RpcType::Unary, &sharded);

        assert_eq!(graph.len(), 3);
    }
}

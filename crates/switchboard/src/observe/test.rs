use super::*;
use crate::middleware::{OnewayInbound, StreamInbound, UnaryInbound};
use call::{oneway_handler_fn, stream_pair, unary_handler_fn, ApplicationError, Encoding};
use futures::future::LocalBoxFuture;
use futures::FutureExt as _;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    counters: HashMap<String, u64>,
    histograms: HashMap<String, Vec<f64>>,
}

/// Captures counters and histograms keyed by "name{label=value,...}".
#[derive(Clone, Default)]
struct TestRecorder {
    state: Arc<Mutex<State>>,
}

fn format_key(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|label| format!("{}={}", label.key(), label.value()))
        .collect();
    format!("{}{{{}}}", key.name(), labels.join(","))
}

struct CounterHandle {
    key: String,
    state: Arc<Mutex<State>>,
}

impl metrics::CounterFn for CounterHandle {
    fn increment(&self, value: u64) {
        *self
            .state
            .lock()
            .unwrap()
            .counters
            .entry(self.key.clone())
            .or_default() += value;
    }

    fn absolute(&self, value: u64) {
        self.state
            .lock()
            .unwrap()
            .counters
            .insert(self.key.clone(), value);
    }
}

struct HistogramHandle {
    key: String,
    state: Arc<Mutex<State>>,
}

impl metrics::HistogramFn for HistogramHandle {
    fn record(&self, value: f64) {
        self.state
            .lock()
            .unwrap()
            .histograms
            .entry(self.key.clone())
            .or_default()
            .push(value);
    }
}

impl Recorder for TestRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CounterHandle {
            key: format_key(key),
            state: self.state.clone(),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(HistogramHandle {
            key: format_key(key),
            state: self.state.clone(),
        }))
    }
}

impl TestRecorder {
    /// Sum of a counter across every label combination.
    fn counter(&self, name: &str) -> u64 {
        let state = self.state.lock().unwrap();
        state
            .counters
            .iter()
            .filter(|(key, _)| key.starts_with(&format!("{name}{{")))
            .map(|(_, value)| value)
            .sum()
    }

    /// Total histogram samples across every label combination.
    fn samples(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .histograms
            .iter()
            .filter(|(key, _)| key.starts_with(&format!("{name}{{")))
            .map(|(_, samples)| samples.len())
            .sum()
    }

    fn counter_keys(&self, name: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state
            .counters
            .keys()
            .filter(|key| key.starts_with(&format!("{name}{{")))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Exactly one outcome counter incremented, exactly one latency
    /// sample recorded, and it is the expected one.
    fn assert_exactly_one_outcome(&self, expected: &str) {
        let outcomes = [
            ("rpc_successes", "rpc_success_latency_seconds"),
            ("rpc_caller_failures", "rpc_caller_failure_latency_seconds"),
            ("rpc_server_failures", "rpc_server_failure_latency_seconds"),
            (
                "rpc_application_errors",
                "rpc_application_error_latency_seconds",
            ),
        ];
        for (counter, latency) in outcomes {
            let want = u64::from(counter.contains(expected));
            assert_eq!(self.counter(counter), want, "{counter}");
            assert_eq!(self.samples(latency), want as usize, "{latency}");
        }
    }
}

/// Run `f` on a current-thread runtime with a local metrics recorder
/// installed, handing it a fresh observability middleware.
fn observed<T>(f: impl FnOnce(Arc<Middleware>) -> LocalBoxFuture<'static, T>) -> (TestRecorder, T) {
    observed_with(Config::default(), f)
}

fn observed_with<T>(
    config: Config,
    f: impl FnOnce(Arc<Middleware>) -> LocalBoxFuture<'static, T>,
) -> (TestRecorder, T) {
    let recorder = TestRecorder::default();
    let out = metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime builds");
        let mw = Arc::new(Middleware::new(config));
        runtime.block_on(f(mw))
    });
    (recorder, out)
}

fn request(service: &str) -> Request {
    Request::new("cli", service, "Get", Encoding::Json)
}

fn echo() -> Arc<dyn call::UnaryHandler> {
    unary_handler_fn(|_ctx, req: Request| async move {
        Ok(Response::with_body(req.body.bytes().await?))
    })
}

#[test]
fn success_increments_exactly_one_outcome() {
    let (recorder, body) = observed(|mw| {
        async move {
            let ctx = Context::with_default_ttl();
            let resp = UnaryInbound::call(
                mw.as_ref(),
                &ctx,
                request("kv").with_body("hello"),
                echo().as_ref(),
            )
            .await
            .unwrap();
            resp.body.bytes().await.unwrap()
        }
        .boxed_local()
    });
    assert_eq!(&body[..], b"hello");
    assert_eq!(recorder.counter("rpc_calls"), 1);
    recorder.assert_exactly_one_outcome("successes");

    // Labels identify the edge.
    let keys = recorder.counter_keys("rpc_successes");
    assert_eq!(keys.len(), 1);
    for fragment in [
        "caller=cli",
        "service=kv",
        "procedure=Get",
        "encoding=json",
        "direction=inbound",
        "rpc_type=unary",
    ] {
        assert!(keys[0].contains(fragment), "{} missing {fragment}", keys[0]);
    }
}

#[test]
fn client_errors_count_against_the_caller() {
    let (recorder, err) = observed(|mw| {
        async move {
            let handler = unary_handler_fn(|_ctx, _req: Request| async move {
                Err::<Response, _>(Error::invalid_argument("bad key"))
            });
            let ctx = Context::with_default_ttl();
            UnaryInbound::call(mw.as_ref(), &ctx, request("kv"), handler.as_ref())
                .await
                .unwrap_err()
        }
        .boxed_local()
    });
    assert_eq!(err.code(), call::Code::InvalidArgument);
    assert_eq!(recorder.counter("rpc_calls"), 1);
    recorder.assert_exactly_one_outcome("caller_failures");
}

#[test]
fn server_errors_count_against_the_server() {
    let (recorder, _) = observed(|mw| {
        async move {
            let handler = unary_handler_fn(|_ctx, _req: Request| async move {
                Err::<Response, _>(Error::unavailable("backend down"))
            });
            let ctx = Context::with_default_ttl();
            UnaryInbound::call(mw.as_ref(), &ctx, request("kv"), handler.as_ref())
                .await
                .unwrap_err()
        }
        .boxed_local()
    });
    recorder.assert_exactly_one_outcome("server_failures");
}

#[test]
fn application_errors_are_their_own_outcome() {
    let (recorder, resp) = observed(|mw| {
        async move {
            let handler = unary_handler_fn(|_ctx, _req: Request| async move {
                Ok(Response {
                    application_error: Some(ApplicationError {
                        name: "KeyTooLong".to_string(),
                        details: None,
                    }),
                    ..Response::with_body("still well-formed")
                })
            });
            let ctx = Context::with_default_ttl();
            UnaryInbound::call(mw.as_ref(), &ctx, request("kv"), handler.as_ref())
                .await
                .unwrap()
        }
        .boxed_local()
    });
    // The call itself succeeded; the response carries the domain error.
    assert!(resp.is_application_error());
    recorder.assert_exactly_one_outcome("application_errors");
}

#[test]
fn panics_are_contained_and_counted() {
    let (recorder, err) = observed(|mw| {
        async move {
            let handler = unary_handler_fn(|_ctx, _req: Request| async move {
                if true {
                    panic!("handler exploded");
                }
                Ok(Response::default())
            });
            let ctx = Context::with_default_ttl();
            UnaryInbound::call(mw.as_ref(), &ctx, request("kv"), handler.as_ref())
                .await
                .unwrap_err()
        }
        .boxed_local()
    });
    assert_eq!(err.code(), call::Code::Internal);
    assert!(err.message().contains("handler exploded"));
    assert_eq!(recorder.counter("rpc_panics"), 1);
    recorder.assert_exactly_one_outcome("server_failures");
}

#[test]
fn oneway_success_counts_once() {
    let (recorder, ack) = observed(|mw| {
        async move {
            let handler =
                oneway_handler_fn(|_ctx, _req: Request| async move { Ok(Ack::default()) });
            let ctx = Context::with_default_ttl();
            OnewayInbound::call(mw.as_ref(), &ctx, request("kv"), handler.as_ref())
                .await
                .unwrap()
        }
        .boxed_local()
    });
    assert_eq!(ack, Ack::default());
    assert_eq!(recorder.counter("rpc_calls"), 1);
    recorder.assert_exactly_one_outcome("successes");
}

#[test]
fn stream_counts_messages_and_completion() {
    struct EchoStream;
    #[async_trait]
    impl call::StreamHandler for EchoStream {
        async fn handle_stream(&self, mut stream: StreamCall) -> call::Result<()> {
            while let Some(message) = stream.recv().await? {
                stream.send(message).await?;
            }
            Ok(())
        }
    }

    let (recorder, ()) = observed(|mw| {
        async move {
            let ctx = Context::with_default_ttl();
            let (mut client, server) = stream_pair(&ctx, request("kv"));
            let handler: Arc<dyn call::StreamHandler> = Arc::new(EchoStream);

            let serve = tokio::spawn(async move {
                StreamInbound::call(mw.as_ref(), server, handler.as_ref()).await
            });

            client.send(bytes::Bytes::from_static(b"one")).await.unwrap();
            assert_eq!(client.recv().await.unwrap().unwrap(), &b"one"[..]);
            client.close(None).await.unwrap();
            assert_eq!(client.recv().await.unwrap(), None);

            serve.await.expect("serve task").unwrap();
        }
        .boxed_local()
    });
    assert_eq!(recorder.counter("rpc_calls"), 1);
    assert_eq!(recorder.counter("rpc_stream_receives"), 1);
    assert_eq!(recorder.counter("rpc_stream_sends"), 1);
    recorder.assert_exactly_one_outcome("successes");
}

#[test]
fn blocked_labels_are_dropped_and_values_scrubbed() {
    let config = Config {
        blocked_labels: vec!["routing_key".to_string()],
        ..Config::default()
    };
    let (recorder, _) = observed_with(config, |mw| {
        async move {
            let ctx = Context::with_default_ttl();
            let mut req = request("kv");
            req.procedure = "Get Value".to_string(); // not identifier-safe
            req.routing_key = Some("secret".to_string());
            UnaryInbound::call(mw.as_ref(), &ctx, req, echo().as_ref())
                .await
                .unwrap()
        }
        .boxed_local()
    });
    let keys = recorder.counter_keys("rpc_successes");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].contains("procedure=__scrubbed__"), "{}", keys[0]);
    assert!(!keys[0].contains("routing_key"), "{}", keys[0]);
}

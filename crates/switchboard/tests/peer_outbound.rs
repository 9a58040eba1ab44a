//! An outbound backed by a peer list, wired through the dispatcher:
//! the dispatcher's outbound phase starts the list, calls choose a
//! peer per request, and stop releases every peer.

use async_trait::async_trait;
use call::{Context, Encoding, Request, Response, Transport};
use peers::{List, ListOptions, PeerId, Registry, RoundRobin};
use std::collections::HashMap;
use std::sync::Arc;
use switchboard::{Config, Dispatcher, Outbounds};

struct ListOutbound {
    registry: Arc<Registry>,
    list: Arc<List<RoundRobin>>,
}

impl ListOutbound {
    fn new() -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let list = List::new(
            "round-robin",
            RoundRobin::seeded(17),
            registry.clone(),
            ListOptions::default(),
        );
        Arc::new(Self { registry, list })
    }

    fn add_peers(&self, ids: &[&str]) {
        self.list
            .update(ids.iter().map(|id| PeerId::new(id)).collect(), Vec::new())
            .unwrap();
        for id in ids {
            self.registry.get(&PeerId::new(id)).unwrap().connected();
        }
    }
}

#[async_trait]
impl call::Outbound for ListOutbound {
    async fn start(&self) -> call::Result<()> {
        self.list.start().await
    }

    async fn stop(&self) -> call::Result<()> {
        self.list.stop().await
    }

    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        Vec::new()
    }
}

#[async_trait]
impl call::UnaryOutbound for ListOutbound {
    async fn call(&self, ctx: &Context, request: Request) -> call::Result<Response> {
        let (peer, permit) = self.list.choose(ctx, &request).await?;
        // A real transport would send on the peer's connection here.
        let response = Response::with_body(peer.id().as_str().to_string());
        permit.finish();
        Ok(response)
    }
}

fn dispatcher_with(outbound: &Arc<ListOutbound>) -> anyhow::Result<Dispatcher> {
    let mut config = Config::new("frontend");
    config.outbounds.insert(
        "kv".to_string(),
        Outbounds {
            service: None,
            unary: Some(outbound.clone()),
            oneway: None,
            stream: None,
        },
    );
    Ok(Dispatcher::new(config)?)
}

#[tokio::test]
async fn dispatcher_runs_a_list_backed_outbound() -> anyhow::Result<()> {
    let outbound = ListOutbound::new();
    let dispatcher = dispatcher_with(&outbound)?;
    dispatcher.start().await?;

    outbound.add_peers(&["a", "b", "c"]);

    let client = dispatcher.client_config("kv");
    let ctx = Context::with_default_ttl();
    let mut picks: HashMap<String, usize> = HashMap::new();
    for _ in 0..6 {
        let response = client
            .call(&ctx, Request::new("", "", "Get", Encoding::Raw))
            .await?;
        let body = response.body.bytes().await?;
        *picks.entry(String::from_utf8(body.to_vec())?).or_default() += 1;
    }
    // Round-robin over three peers: each serves exactly twice.
    assert_eq!(picks.len(), 3);
    assert!(picks.values().all(|&count| count == 2), "{picks:?}");

    dispatcher.stop().await?;
    assert!(outbound.registry.is_empty());

    // Calls after stop observe the lifecycle.
    let err = client
        .call(&ctx, Request::new("", "", "Get", Encoding::Raw))
        .await
        .unwrap_err();
    assert_eq!(err.code(), call::Code::FailedPrecondition);
    Ok(())
}

#[tokio::test]
async fn unavailable_peers_do_not_serve() -> anyhow::Result<()> {
    let outbound = ListOutbound::new();
    let dispatcher = dispatcher_with(&outbound)?;
    dispatcher.start().await?;

    outbound.add_peers(&["a", "b"]);
    outbound
        .registry
        .get(&PeerId::new("a"))
        .expect("peer a is retained")
        .disconnected();

    let client = dispatcher.client_config("kv");
    let ctx = Context::with_default_ttl();
    for _ in 0..4 {
        let response = client
            .call(&ctx, Request::new("", "", "Get", Encoding::Raw))
            .await?;
        assert_eq!(&response.body.bytes().await?[..], b"b");
    }

    dispatcher.stop().await?;
    Ok(())
}

//! In-process fakes for exercising dispatcher wiring without a real
//! wire protocol.

use async_trait::async_trait;
use call::{Ack, Context, Request, Response, Router as _, Transport, UnaryHandler as _};
use std::sync::{Arc, Mutex};

/// Records lifecycle events as "kind:name:event" strings.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub struct FakeTransport {
    pub name: String,
    pub journal: Journal,
    pub fail_start: bool,
}

impl FakeTransport {
    pub fn new(name: &str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            fail_start: false,
        })
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> call::Result<()> {
        if self.fail_start {
            return Err(call::Error::internal(format!(
                "transport {} refused to start",
                self.name
            )));
        }
        record(&self.journal, format!("transport:{}:start", self.name));
        Ok(())
    }

    async fn stop(&self) -> call::Result<()> {
        record(&self.journal, format!("transport:{}:stop", self.name));
        Ok(())
    }
}

pub struct FakeInbound {
    pub name: String,
    pub journal: Journal,
    pub fail_start: bool,
    pub transports: Vec<Arc<dyn Transport>>,
    router: Mutex<Option<Arc<dyn call::Router>>>,
}

impl FakeInbound {
    pub fn new(name: &str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            fail_start: false,
            transports: Vec::new(),
            router: Mutex::new(None),
        })
    }

    pub fn with_transport(name: &str, journal: &Journal, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            fail_start: false,
            transports: vec![transport],
            router: Mutex::new(None),
        })
    }

    /// Simulate receipt of a unary request from the wire.
    pub async fn receive(&self, ctx: &Context, request: Request) -> call::Result<Response> {
        let router = self
            .router
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| call::Error::unavailable("inbound has no router"))?;
        match router.choose(ctx, &request)? {
            call::HandlerSpec::Unary(handler) => handler.handle(ctx, request).await,
            other => Err(call::Error::unimplemented(format!(
                "procedure is registered as {}",
                other.rpc_type()
            ))),
        }
    }
}

#[async_trait]
impl call::Inbound for FakeInbound {
    fn set_router(&self, router: Arc<dyn call::Router>) {
        *self.router.lock().unwrap() = Some(router);
    }

    async fn start(&self) -> call::Result<()> {
        if self.fail_start {
            return Err(call::Error::internal(format!(
                "inbound {} refused to start",
                self.name
            )));
        }
        record(&self.journal, format!("inbound:{}:start", self.name));
        Ok(())
    }

    async fn stop(&self) -> call::Result<()> {
        record(&self.journal, format!("inbound:{}:stop", self.name));
        Ok(())
    }

    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.transports.clone()
    }
}

pub struct FakeOutbound {
    pub name: String,
    pub journal: Journal,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub transports: Vec<Arc<dyn Transport>>,
}

impl FakeOutbound {
    pub fn new(name: &str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            fail_start: false,
            fail_stop: false,
            transports: Vec::new(),
        })
    }

    pub fn failing_start(name: &str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            fail_start: true,
            fail_stop: false,
            transports: Vec::new(),
        })
    }
}

#[async_trait]
impl call::Outbound for FakeOutbound {
    async fn start(&self) -> call::Result<()> {
        if self.fail_start {
            return Err(call::Error::internal(format!(
                "outbound {} refused to start",
                self.name
            )));
        }
        record(&self.journal, format!("outbound:{}:start", self.name));
        Ok(())
    }

    async fn stop(&self) -> call::Result<()> {
        if self.fail_stop {
            return Err(call::Error::internal(format!(
                "outbound {} refused to stop",
                self.name
            )));
        }
        record(&self.journal, format!("outbound:{}:stop", self.name));
        Ok(())
    }

    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.transports.clone()
    }
}

#[async_trait]
impl call::UnaryOutbound for FakeOutbound {
    async fn call(&self, _ctx: &Context, request: Request) -> call::Result<Response> {
        let body = request.body.bytes().await?;
        let mut reply = Vec::from(format!("{}:", self.name).into_bytes());
        reply.extend_from_slice(&body);
        Ok(Response::with_body(reply))
    }
}

#[async_trait]
impl call::OnewayOutbound for FakeOutbound {
    async fn call_oneway(&self, _ctx: &Context, _request: Request) -> call::Result<Ack> {
        Ok(Ack {
            token: Some(self.name.clone()),
        })
    }
}

//! The composition root: aggregates transports, inbounds, outbounds,
//! middleware, and the router for one logical service, and coordinates
//! ordered startup and shutdown across them.

use crate::router::{RoutedTable, RouterCell, RouterMiddleware};
use crate::{middleware, observe, Error, ErrorList};
use async_trait::async_trait;
use call::{
    Inbound as _, OnewayOutbound as _, Outbound as _, StreamOutbound as _, UnaryOutbound as _,
};
use call::{Ack, Context, HandlerSpec, Procedure, Request, Response, StreamCall, Transport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The outbound capabilities configured under one outbound key.
#[derive(Clone, Default)]
pub struct Outbounds {
    /// Target service name; defaults to the outbound key.
    pub service: Option<String>,
    pub unary: Option<Arc<dyn call::UnaryOutbound>>,
    pub oneway: Option<Arc<dyn call::OnewayOutbound>>,
    pub stream: Option<Arc<dyn call::StreamOutbound>>,
}

/// Dispatcher configuration.
pub struct Config {
    /// This service's name. Must be non-empty and identifier-safe.
    pub name: String,
    pub inbounds: Vec<Arc<dyn call::Inbound>>,
    /// Outbounds keyed by a local outbound key, which defaults to (but
    /// may differ from) the target service name.
    pub outbounds: HashMap<String, Outbounds>,
    pub inbound_middleware: middleware::InboundMiddleware,
    pub outbound_middleware: middleware::OutboundMiddleware,
    pub router_middleware: Option<Arc<dyn RouterMiddleware>>,
    pub observability: observe::Config,
    /// Leave every chain un-instrumented. Off by default.
    pub disable_auto_observability: bool,
}

impl Config {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inbounds: Vec::new(),
            outbounds: HashMap::new(),
            inbound_middleware: middleware::InboundMiddleware::default(),
            outbound_middleware: middleware::OutboundMiddleware::default(),
            router_middleware: None,
            observability: observe::Config::default(),
            disable_auto_observability: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    TransportsStarted,
    OutboundsStarted,
    Running,
    InboundsStopped,
    OutboundsStopped,
    Stopped,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "initialized",
            Phase::TransportsStarted => "transports started",
            Phase::OutboundsStarted => "outbounds started",
            Phase::Running => "running",
            Phase::InboundsStopped => "inbounds stopped",
            Phase::OutboundsStopped => "outbounds stopped",
            Phase::Stopped => "stopped",
        }
    }
}

enum Member {
    Transport(Arc<dyn Transport>),
    Inbound(Arc<dyn call::Inbound>),
    Unary(Arc<dyn call::UnaryOutbound>),
    Oneway(Arc<dyn call::OnewayOutbound>),
    Stream(Arc<dyn call::StreamOutbound>),
}

impl Member {
    async fn start(&self) -> call::Result<()> {
        match self {
            Member::Transport(t) => t.start().await,
            Member::Inbound(i) => i.start().await,
            Member::Unary(o) => o.start().await,
            Member::Oneway(o) => o.start().await,
            Member::Stream(o) => o.start().await,
        }
    }

    async fn stop(&self) -> call::Result<()> {
        match self {
            Member::Transport(t) => t.stop().await,
            Member::Inbound(i) => i.stop().await,
            Member::Unary(o) => o.stop().await,
            Member::Oneway(o) => o.stop().await,
            Member::Stream(o) => o.stop().await,
        }
    }
}

struct OutboundEntry {
    service: String,
    unary: Option<Arc<dyn call::UnaryOutbound>>,
    oneway: Option<Arc<dyn call::OnewayOutbound>>,
    stream: Option<Arc<dyn call::StreamOutbound>>,
}

/// Hosts inbound listeners, routes received calls to registered
/// handlers, and sends calls through configured outbounds.
///
/// Start order is Transports, then Outbounds, then Inbounds: an inbound
/// may receive a call that immediately triggers an outbound, so
/// everything an inbound can reach must already be running. Stop is the
/// exact reverse. Both are idempotent, and concurrent callers serialize
/// on the same transition.
pub struct Dispatcher {
    name: String,
    router: Arc<RouterCell>,
    routed: Arc<dyn call::Router>,
    inbounds: Vec<Arc<dyn call::Inbound>>,
    outbounds: HashMap<String, OutboundEntry>,
    transport_members: Vec<Member>,
    outbound_members: Vec<Member>,
    inbound_members: Vec<Member>,
    observer: Option<Arc<observe::Middleware>>,
    inbound_middleware: middleware::InboundMiddleware,
    phase: tokio::sync::Mutex<Phase>,
    sealed: AtomicBool,
    outbounds_ready: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(config: Config) -> Result<Self, Error> {
        if !observe::is_valid_service_name(&config.name) {
            return Err(Error::InvalidServiceName(config.name));
        }

        let observer = if config.disable_auto_observability {
            None
        } else {
            Some(Arc::new(observe::Middleware::new(config.observability)))
        };

        let outbounds_ready = Arc::new(AtomicBool::new(false));
        let mut outbounds = HashMap::new();
        let mut outbound_members = Vec::new();
        for (key, configured) in config.outbounds {
            let service = configured.service.unwrap_or_else(|| key.clone());

            let unary = configured.unary.map(|raw| {
                let guarded: Arc<dyn call::UnaryOutbound> = Arc::new(OutboundGuard {
                    ready: outbounds_ready.clone(),
                    key: key.clone(),
                    inner: raw,
                });
                let chain = middleware::unary_outbound_chain(
                    config.outbound_middleware.unary.iter().cloned().map(Some),
                    guarded,
                );
                middleware::unary_outbound_chain(
                    [observer
                        .clone()
                        .map(|o| o as Arc<dyn middleware::UnaryOutbound>)],
                    chain,
                )
            });
            let oneway = configured.oneway.map(|raw| {
                let guarded: Arc<dyn call::OnewayOutbound> = Arc::new(OutboundGuard {
                    ready: outbounds_ready.clone(),
                    key: key.clone(),
                    inner: raw,
                });
                let chain = middleware::oneway_outbound_chain(
                    config.outbound_middleware.oneway.iter().cloned().map(Some),
                    guarded,
                );
                middleware::oneway_outbound_chain(
                    [observer
                        .clone()
                        .map(|o| o as Arc<dyn middleware::OnewayOutbound>)],
                    chain,
                )
            });
            let stream = configured.stream.map(|raw| {
                let guarded: Arc<dyn call::StreamOutbound> = Arc::new(OutboundGuard {
                    ready: outbounds_ready.clone(),
                    key: key.clone(),
                    inner: raw,
                });
                let chain = middleware::stream_outbound_chain(
                    config.outbound_middleware.stream.iter().cloned().map(Some),
                    guarded,
                );
                middleware::stream_outbound_chain(
                    [observer
                        .clone()
                        .map(|o| o as Arc<dyn middleware::StreamOutbound>)],
                    chain,
                )
            });

            if let Some(outbound) = &unary {
                outbound_members.push(Member::Unary(outbound.clone()));
            }
            if let Some(outbound) = &oneway {
                outbound_members.push(Member::Oneway(outbound.clone()));
            }
            if let Some(outbound) = &stream {
                outbound_members.push(Member::Stream(outbound.clone()));
            }
            outbounds.insert(
                key,
                OutboundEntry {
                    service,
                    unary,
                    oneway,
                    stream,
                },
            );
        }

        let inbound_members: Vec<Member> = config
            .inbounds
            .iter()
            .map(|inbound| Member::Inbound(inbound.clone()))
            .collect();

        // Transports are shared by inbounds and outbounds; collect them
        // once, deduplicated by identity.
        let mut transport_members = Vec::new();
        let mut seen = Vec::new();
        let mut collect = |transports: Vec<Arc<dyn Transport>>| {
            for transport in transports {
                let identity = Arc::as_ptr(&transport) as *const () as usize;
                if !seen.contains(&identity) {
                    seen.push(identity);
                    transport_members.push(Member::Transport(transport));
                }
            }
        };
        for inbound in &config.inbounds {
            collect(inbound.transports());
        }
        for entry in outbounds.values() {
            if let Some(outbound) = &entry.unary {
                collect(outbound.transports());
            }
            if let Some(outbound) = &entry.oneway {
                collect(outbound.transports());
            }
            if let Some(outbound) = &entry.stream {
                collect(outbound.transports());
            }
        }

        let router = Arc::new(RouterCell::new(config.name.clone()));
        let routed: Arc<dyn call::Router> = Arc::new(RoutedTable {
            cell: router.clone(),
            middleware: config.router_middleware,
        });

        Ok(Self {
            name: config.name,
            router,
            routed,
            inbounds: config.inbounds,
            outbounds,
            transport_members,
            outbound_members,
            inbound_members,
            observer,
            inbound_middleware: config.inbound_middleware,
            phase: tokio::sync::Mutex::new(Phase::Init),
            sealed: AtomicBool::new(false),
            outbounds_ready,
            cancel: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The router handed to inbounds, for introspection.
    pub fn router(&self) -> Arc<dyn call::Router> {
        self.routed.clone()
    }

    /// Cancelled when the dispatcher stops; transports derive request
    /// contexts from it so suspended work wakes during shutdown.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Register procedures, wrapping each handler in the dispatcher's
    /// inbound middleware (observability outermost). Must happen before
    /// start.
    pub fn register(&self, procedures: Vec<Procedure>) -> Result<(), Error> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(Error::RegisterAfterStart {
                name: self.name.clone(),
            });
        }
        let wrapped = procedures
            .into_iter()
            .map(|mut procedure| {
                procedure.spec = match procedure.spec {
                    HandlerSpec::Unary(handler) => {
                        HandlerSpec::Unary(middleware::unary_inbound_chain(
                            std::iter::once(
                                self.observer
                                    .clone()
                                    .map(|o| o as Arc<dyn middleware::UnaryInbound>),
                            )
                            .chain(self.inbound_middleware.unary.iter().cloned().map(Some)),
                            handler,
                        ))
                    }
                    HandlerSpec::Oneway(handler) => {
                        HandlerSpec::Oneway(middleware::oneway_inbound_chain(
                            std::iter::once(
                                self.observer
                                    .clone()
                                    .map(|o| o as Arc<dyn middleware::OnewayInbound>),
                            )
                            .chain(self.inbound_middleware.oneway.iter().cloned().map(Some)),
                            handler,
                        ))
                    }
                    HandlerSpec::Stream(handler) => {
                        HandlerSpec::Stream(middleware::stream_inbound_chain(
                            std::iter::once(
                                self.observer
                                    .clone()
                                    .map(|o| o as Arc<dyn middleware::StreamInbound>),
                            )
                            .chain(self.inbound_middleware.stream.iter().cloned().map(Some)),
                            handler,
                        ))
                    }
                };
                procedure
            })
            .collect();
        self.router.register(wrapped)
    }

    /// Start everything: transports, then outbounds, then inbounds.
    /// On failure, every member already started is stopped again and
    /// the dispatcher lands in the stopped state.
    #[tracing::instrument(level = "info", skip(self), fields(dispatcher = %self.name))]
    pub async fn start(&self) -> Result<(), Error> {
        let mut phase = self.phase.lock().await;
        loop {
            match *phase {
                Phase::Init => self.phase_transports(&mut phase).await?,
                Phase::TransportsStarted => self.phase_outbounds(&mut phase).await?,
                Phase::OutboundsStarted => self.phase_inbounds(&mut phase).await?,
                Phase::Running => return Ok(()),
                _ => {
                    return Err(Error::Call(call::Error::failed_precondition(format!(
                        "dispatcher {:?} has already stopped",
                        self.name
                    ))))
                }
            }
        }
    }

    /// Expose the three start phases individually. Phases must run in
    /// order; out-of-order invocation fails without side effects.
    pub fn phased_start(&self) -> PhasedStarter<'_> {
        PhasedStarter { dispatcher: self }
    }

    /// Stop everything: inbounds, then outbounds, then transports.
    /// Member errors are collected and returned in aggregate; every
    /// member is stopped regardless.
    #[tracing::instrument(level = "info", skip(self), fields(dispatcher = %self.name))]
    pub async fn stop(&self) -> Result<(), Error> {
        let mut phase = self.phase.lock().await;
        self.cancel.cancel();
        let mut errors = Vec::new();
        loop {
            match *phase {
                Phase::Running => {
                    stop_members(&self.inbound_members, &mut errors).await;
                    *phase = Phase::InboundsStopped;
                }
                // Partial starts skip the phases that never ran.
                Phase::OutboundsStarted => *phase = Phase::InboundsStopped,
                Phase::TransportsStarted => *phase = Phase::OutboundsStopped,
                Phase::InboundsStopped => {
                    stop_members(&self.outbound_members, &mut errors).await;
                    self.outbounds_ready.store(false, Ordering::SeqCst);
                    *phase = Phase::OutboundsStopped;
                }
                Phase::OutboundsStopped => {
                    stop_members(&self.transport_members, &mut errors).await;
                    *phase = Phase::Stopped;
                }
                Phase::Init => *phase = Phase::Stopped,
                Phase::Stopped => break,
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(ErrorList(errors)))
        }
    }

    /// A handle for making calls through the outbound configured under
    /// `key`.
    ///
    /// # Panics
    ///
    /// Panics if no outbound is configured under `key`: an unknown key
    /// is a configuration error, caught at startup by convention.
    pub fn client_config(&self, key: &str) -> ClientConfig {
        let Some(entry) = self.outbounds.get(key) else {
            panic!("no outbound set for outbound key {key:?} in dispatcher");
        };
        ClientConfig {
            caller: self.name.clone(),
            service: entry.service.clone(),
            unary: entry.unary.clone(),
            oneway: entry.oneway.clone(),
            stream: entry.stream.clone(),
        }
    }

    async fn phase_transports(&self, phase: &mut Phase) -> Result<(), Error> {
        self.sealed.store(true, Ordering::SeqCst);
        match start_members(&self.transport_members).await {
            Ok(()) => {
                *phase = Phase::TransportsStarted;
                Ok(())
            }
            Err(err) => {
                *phase = Phase::Stopped;
                Err(err.into())
            }
        }
    }

    async fn phase_outbounds(&self, phase: &mut Phase) -> Result<(), Error> {
        match start_members(&self.outbound_members).await {
            Ok(()) => {
                self.outbounds_ready.store(true, Ordering::SeqCst);
                *phase = Phase::OutboundsStarted;
                Ok(())
            }
            Err(err) => {
                let mut rollback = Vec::new();
                stop_members_reverse(&self.transport_members, &mut rollback).await;
                log_rollback_errors(&rollback);
                *phase = Phase::Stopped;
                Err(err.into())
            }
        }
    }

    async fn phase_inbounds(&self, phase: &mut Phase) -> Result<(), Error> {
        for inbound in &self.inbounds {
            inbound.set_router(self.routed.clone());
        }
        match start_members(&self.inbound_members).await {
            Ok(()) => {
                *phase = Phase::Running;
                Ok(())
            }
            Err(err) => {
                let mut rollback = Vec::new();
                stop_members_reverse(&self.outbound_members, &mut rollback).await;
                self.outbounds_ready.store(false, Ordering::SeqCst);
                stop_members_reverse(&self.transport_members, &mut rollback).await;
                log_rollback_errors(&rollback);
                *phase = Phase::Stopped;
                Err(err.into())
            }
        }
    }
}

/// Phase-by-phase start, for processes that need control between
/// phases (e.g. to warm peer lists before accepting traffic).
pub struct PhasedStarter<'a> {
    dispatcher: &'a Dispatcher,
}

impl PhasedStarter<'_> {
    pub async fn start_transports(&self) -> Result<(), Error> {
        self.advance("start_transports", Phase::Init).await
    }

    pub async fn start_outbounds(&self) -> Result<(), Error> {
        self.advance("start_outbounds", Phase::TransportsStarted)
            .await
    }

    pub async fn start_inbounds(&self) -> Result<(), Error> {
        self.advance("start_inbounds", Phase::OutboundsStarted).await
    }

    async fn advance(&self, what: &'static str, expected: Phase) -> Result<(), Error> {
        let mut phase = self.dispatcher.phase.lock().await;
        if *phase != expected {
            return Err(Error::PhaseOrder {
                phase: what,
                expected: expected.as_str(),
                actual: phase.as_str(),
            });
        }
        match expected {
            Phase::Init => self.dispatcher.phase_transports(&mut phase).await,
            Phase::TransportsStarted => self.dispatcher.phase_outbounds(&mut phase).await,
            Phase::OutboundsStarted => self.dispatcher.phase_inbounds(&mut phase).await,
            _ => unreachable!("phased start only covers start phases"),
        }
    }
}

/// A handle whose caller is the dispatcher's service and whose target is
/// the outbound's configured service. Requests sent through it have
/// caller and service stamped on.
#[derive(Clone)]
pub struct ClientConfig {
    caller: String,
    service: String,
    unary: Option<Arc<dyn call::UnaryOutbound>>,
    oneway: Option<Arc<dyn call::OnewayOutbound>>,
    stream: Option<Arc<dyn call::StreamOutbound>>,
}

impl ClientConfig {
    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn unary_outbound(&self) -> Option<Arc<dyn call::UnaryOutbound>> {
        self.unary.clone()
    }

    pub fn oneway_outbound(&self) -> Option<Arc<dyn call::OnewayOutbound>> {
        self.oneway.clone()
    }

    pub fn stream_outbound(&self) -> Option<Arc<dyn call::StreamOutbound>> {
        self.stream.clone()
    }

    pub async fn call(&self, ctx: &Context, mut request: Request) -> call::Result<Response> {
        request.caller = self.caller.clone();
        request.service = self.service.clone();
        let outbound = self.unary.as_ref().ok_or_else(|| {
            call::Error::unimplemented(format!(
                "service {:?} has no unary outbound",
                self.service
            ))
        })?;
        outbound.call(ctx, request).await
    }

    pub async fn call_oneway(&self, ctx: &Context, mut request: Request) -> call::Result<Ack> {
        request.caller = self.caller.clone();
        request.service = self.service.clone();
        let outbound = self.oneway.as_ref().ok_or_else(|| {
            call::Error::unimplemented(format!(
                "service {:?} has no oneway outbound",
                self.service
            ))
        })?;
        outbound.call_oneway(ctx, request).await
    }

    pub async fn call_stream(&self, ctx: &Context, mut request: Request) -> call::Result<StreamCall> {
        request.caller = self.caller.clone();
        request.service = self.service.clone();
        let outbound = self.stream.as_ref().ok_or_else(|| {
            call::Error::unimplemented(format!(
                "service {:?} has no stream outbound",
                self.service
            ))
        })?;
        outbound.call_stream(ctx, request).await
    }
}

async fn start_members(members: &[Member]) -> call::Result<()> {
    let results = futures::future::join_all(members.iter().map(Member::start)).await;
    let mut started = Vec::new();
    let mut first_err = None;
    for (member, result) in members.iter().zip(results) {
        match result {
            Ok(()) => started.push(member),
            Err(err) => {
                first_err.get_or_insert(err);
            }
        }
    }
    let Some(err) = first_err else {
        return Ok(());
    };
    // Unwind this phase's successful starts, most recent first.
    for member in started.iter().rev() {
        if let Err(stop_err) = member.stop().await {
            tracing::warn!(error = %stop_err, "failed to stop member during start rollback");
        }
    }
    Err(err)
}

async fn stop_members(members: &[Member], errors: &mut Vec<call::Error>) {
    let results = futures::future::join_all(members.iter().map(Member::stop)).await;
    errors.extend(results.into_iter().filter_map(Result::err));
}

async fn stop_members_reverse(members: &[Member], errors: &mut Vec<call::Error>) {
    for member in members.iter().rev() {
        if let Err(err) = member.stop().await {
            errors.push(err);
        }
    }
}

fn log_rollback_errors(errors: &[call::Error]) {
    for err in errors {
        tracing::warn!(error = %err, "failed to stop member during start rollback");
    }
}

/// Rejects calls while the dispatcher's outbounds are not between their
/// start and stop phases.
struct OutboundGuard<T: ?Sized> {
    ready: Arc<AtomicBool>,
    key: String,
    inner: Arc<T>,
}

impl<T: ?Sized> OutboundGuard<T> {
    fn check(&self) -> call::Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(call::Error::failed_precondition(format!(
                "outbound for key {:?} is not running",
                self.key
            )))
        }
    }
}

#[async_trait]
impl<T: call::Outbound + ?Sized> call::Outbound for OutboundGuard<T> {
    async fn start(&self) -> call::Result<()> {
        self.inner.start().await
    }
    async fn stop(&self) -> call::Result<()> {
        self.inner.stop().await
    }
    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.inner.transports()
    }
}

#[async_trait]
impl<T: call::UnaryOutbound + ?Sized> call::UnaryOutbound for OutboundGuard<T> {
    async fn call(&self, ctx: &Context, request: Request) -> call::Result<Response> {
        self.check()?;
        self.inner.call(ctx, request).await
    }
}

#[async_trait]
impl<T: call::OnewayOutbound + ?Sized> call::OnewayOutbound for OutboundGuard<T> {
    async fn call_oneway(&self, ctx: &Context, request: Request) -> call::Result<Ack> {
        self.check()?;
        self.inner.call_oneway(ctx, request).await
    }
}

#[async_trait]
impl<T: call::StreamOutbound + ?Sized> call::StreamOutbound for OutboundGuard<T> {
    async fn call_stream(&self, ctx: &Context, request: Request) -> call::Result<StreamCall> {
        self.check()?;
        self.inner.call_stream(ctx, request).await
    }
}

//! The procedure table and its optional dynamic-routing hook.

use crate::Error;
use call::{Context, Encoding, HandlerSpec, Procedure, Request, Router};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// May intercept handler selection, e.g. for traffic shifting. Receives
/// the underlying table and must produce a handler or an error.
pub trait RouterMiddleware: Send + Sync {
    fn choose(
        &self,
        ctx: &Context,
        request: &Request,
        next: &dyn Router,
    ) -> call::Result<HandlerSpec>;

    fn procedures(&self, next: &dyn Router) -> Vec<Procedure> {
        next.procedures()
    }
}

type ExactKey = (String, String, Encoding);
type WildcardKey = (String, String);

/// An in-memory procedure index: one map for encoding-exact
/// registrations, one for encoding wildcards, consulted in that order.
///
/// Writes happen only before the dispatcher starts; reads are the hot
/// path and take no exclusive lock.
pub struct MapRouter {
    default_service: String,
    exact: HashMap<ExactKey, HandlerSpec>,
    wildcard: HashMap<WildcardKey, HandlerSpec>,
    procedures: Vec<Procedure>,
}

impl MapRouter {
    /// `default_service` fills registrations that leave service unset.
    pub fn new(default_service: impl Into<String>) -> Self {
        Self {
            default_service: default_service.into(),
            exact: HashMap::new(),
            wildcard: HashMap::new(),
            procedures: Vec::new(),
        }
    }

    /// Insert a batch of procedures atomically: either every procedure
    /// registers, or none do and the first problem is reported.
    pub fn register(&mut self, procedures: Vec<Procedure>) -> Result<(), Error> {
        let mut staged: Vec<Procedure> = Vec::with_capacity(procedures.len());
        for mut procedure in procedures {
            if procedure.service.is_empty() {
                procedure.service = self.default_service.clone();
            }
            if procedure.name.is_empty() {
                return Err(Error::EmptyProcedureName {
                    service: procedure.service,
                });
            }
            let registered = match &procedure.encoding {
                Some(encoding) => self.exact.contains_key(&(
                    procedure.service.clone(),
                    procedure.name.clone(),
                    encoding.clone(),
                )),
                None => self
                    .wildcard
                    .contains_key(&(procedure.service.clone(), procedure.name.clone())),
            };
            let staged_twice = staged.iter().any(|other| {
                other.service == procedure.service
                    && other.name == procedure.name
                    && other.encoding == procedure.encoding
            });
            let duplicate = registered || staged_twice;
            if duplicate {
                let encoding = procedure.encoding_label().to_string();
                return Err(Error::DuplicateProcedure {
                    service: procedure.service,
                    procedure: procedure.name,
                    encoding,
                });
            }
            staged.push(procedure);
        }

        for procedure in staged {
            match &procedure.encoding {
                Some(encoding) => {
                    self.exact.insert(
                        (
                            procedure.service.clone(),
                            procedure.name.clone(),
                            encoding.clone(),
                        ),
                        procedure.spec.clone(),
                    );
                }
                None => {
                    self.wildcard.insert(
                        (procedure.service.clone(), procedure.name.clone()),
                        procedure.spec.clone(),
                    );
                }
            }
            self.procedures.push(procedure);
        }
        Ok(())
    }
}

impl Router for MapRouter {
    fn procedures(&self) -> Vec<Procedure> {
        let mut procedures = self.procedures.clone();
        procedures.sort_by(|a, b| {
            (&a.service, &a.name, a.encoding_label()).cmp(&(
                &b.service,
                &b.name,
                b.encoding_label(),
            ))
        });
        procedures
    }

    fn choose(&self, _ctx: &Context, request: &Request) -> call::Result<HandlerSpec> {
        let exact_key = (
            request.service.clone(),
            request.procedure.clone(),
            request.encoding.clone(),
        );
        if let Some(spec) = self.exact.get(&exact_key) {
            return Ok(spec.clone());
        }
        if let Some(spec) = self
            .wildcard
            .get(&(request.service.clone(), request.procedure.clone()))
        {
            return Ok(spec.clone());
        }
        Err(call::Error::unimplemented(format!(
            "unrecognized procedure {:?} for service {:?}",
            request.procedure, request.service
        )))
    }
}

/// Interior-mutable holder for the table: writable while the dispatcher
/// is idle, effectively read-only once it runs.
pub(crate) struct RouterCell {
    inner: RwLock<MapRouter>,
}

impl RouterCell {
    pub(crate) fn new(default_service: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(MapRouter::new(default_service)),
        }
    }

    pub(crate) fn register(&self, procedures: Vec<Procedure>) -> Result<(), Error> {
        self.inner
            .write()
            .expect("router lock is never poisoned")
            .register(procedures)
    }
}

impl Router for RouterCell {
    fn procedures(&self) -> Vec<Procedure> {
        self.inner
            .read()
            .expect("router lock is never poisoned")
            .procedures()
    }

    fn choose(&self, ctx: &Context, request: &Request) -> call::Result<HandlerSpec> {
        self.inner
            .read()
            .expect("router lock is never poisoned")
            .choose(ctx, request)
    }
}

/// The router handed to inbounds: validates each request, then routes
/// through the optional router middleware into the table.
pub(crate) struct RoutedTable {
    pub(crate) cell: Arc<RouterCell>,
    pub(crate) middleware: Option<Arc<dyn RouterMiddleware>>,
}

impl Router for RoutedTable {
    fn procedures(&self) -> Vec<Procedure> {
        match &self.middleware {
            Some(mw) => mw.procedures(self.cell.as_ref()),
            None => self.cell.procedures(),
        }
    }

    fn choose(&self, ctx: &Context, request: &Request) -> call::Result<HandlerSpec> {
        request.validate()?;
        match &self.middleware {
            Some(mw) => mw.choose(ctx, request, self.cell.as_ref()),
            None => self.cell.choose(ctx, request),
        }
    }
}

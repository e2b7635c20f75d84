//! Service registrations, the two registry scopes, and locator resolution.
//!
//! Lookup order is fixed: the peer's local registry, then the process-wide
//! registry shared by every peer in the process. Predicate filtering is
//! applied at both steps, and a predicate mismatch is indistinguishable
//! from absence. Proxy fallback lives one level up, in the engine.

use async_trait::async_trait;
use dashmap::DashMap;
use palaver_types::PalaverError;
use palaver_wire::{Kwargs, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Caller attributes the authentication backend vouches for, matched
/// against registration requirements.
pub type PredicateArgs = HashMap<String, Value>;

/// An invocable endpoint.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, PalaverError>;
}

/// Adapter for plain synchronous closures, which cover most handlers.
struct FnHandler<F>(F);

#[async_trait]
impl<F> ServiceHandler for FnHandler<F>
where
    F: Fn(Vec<Value>, Kwargs) -> Result<Value, PalaverError> + Send + Sync,
{
    async fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, PalaverError> {
        (self.0)(args, kwargs)
    }
}

/// One registered callable: dotted name, handler, visibility predicates,
/// and whether it wants the caller identity prepended to its arguments.
#[derive(Clone)]
pub struct ServiceRegistration {
    name: String,
    handler: Arc<dyn ServiceHandler>,
    required: PredicateArgs,
    with_identity: bool,
}

impl ServiceRegistration {
    /// Register a plain closure under a dotted name.
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>, Kwargs) -> Result<Value, PalaverError> + Send + Sync + 'static,
    {
        Self::with_handler(name, Arc::new(FnHandler(handler)))
    }

    /// Register a full [`ServiceHandler`] (async or stateful).
    pub fn with_handler(name: impl Into<String>, handler: Arc<dyn ServiceHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            required: PredicateArgs::new(),
            with_identity: false,
        }
    }

    /// Require a caller attribute for this registration to be visible.
    pub fn require(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.required.insert(key.into(), value.into());
        self
    }

    /// Ask for the caller identity as the first positional argument.
    pub fn with_identity(mut self) -> Self {
        self.with_identity = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expects_identity(&self) -> bool {
        self.with_identity
    }

    pub fn handler(&self) -> &Arc<dyn ServiceHandler> {
        &self.handler
    }

    /// A registration is visible only to callers whose attributes carry
    /// every required key with the required value.
    fn visible_to(&self, attrs: &PredicateArgs) -> bool {
        self.required
            .iter()
            .all(|(key, value)| attrs.get(key) == Some(value))
    }
}

/// One registry scope: dotted name → registration.
pub struct Registry {
    label: String,
    entries: DashMap<String, ServiceRegistration>,
}

impl Registry {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: DashMap::new(),
        }
    }

    /// Insert a registration. Within a scope names stay unique; a repeat
    /// registration replaces the previous one.
    pub fn register(&self, registration: ServiceRegistration) {
        let name = registration.name.clone();
        if self.entries.insert(name.clone(), registration).is_some() {
            warn!(registry = %self.label, %name, "replaced existing registration");
        } else {
            debug!(registry = %self.label, %name, "registered rpc");
        }
    }

    /// Exact dotted-name lookup with predicate filtering.
    pub fn lookup(&self, name: &str, attrs: &PredicateArgs) -> Option<ServiceRegistration> {
        self.entries
            .get(name)
            .filter(|entry| entry.visible_to(attrs))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The process-wide registry, shared by every peer in the process.
///
/// Registrations are additive and expected to happen during setup, before
/// steady-state traffic.
pub fn global_registry() -> &'static Registry {
    static GLOBAL: OnceLock<Registry> = OnceLock::new();
    GLOBAL.get_or_init(|| Registry::new("global"))
}

/// Register into the process-wide scope.
pub fn register_global(registration: ServiceRegistration) {
    global_registry().register(registration);
}

/// Resolve a locator through a peer's local scope, then the process-wide
/// scope. Predicate mismatches read as not-found.
pub fn resolve(
    name: &str,
    attrs: &PredicateArgs,
    local: &Registry,
) -> Result<ServiceRegistration, PalaverError> {
    local
        .lookup(name, attrs)
        .or_else(|| global_registry().lookup(name, attrs))
        .ok_or_else(|| PalaverError::ServiceNotFound(name.to_string()))
}

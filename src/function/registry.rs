//! Handler resolution and invocation.
//!
//! Handler locations are data: a route carries a dotted reference string
//! (`"<module-path>.<callable-name>"`), and the embedding runtime supplies
//! the dynamic-load mechanism behind the [`HandlerProvider`] seam.
//! [`HandlerResolver`] pays the load cost at most once per distinct
//! reference and isolates every invocation fault behind an opaque 500.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::function::event::{InvocationEvent, InvocationResult};
use crate::function::handler::{Handler, HandlerContext, HandlerError};

/// A parsed handler reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerReference {
    pub module_path: String,
    pub name: String,
}

impl HandlerReference {
    /// Split `"<module-path>.<callable-name>"` on the last dot.
    pub fn parse(reference: &str) -> Result<Self, HandlerError> {
        let (module_path, name) = reference.rsplit_once('.').ok_or_else(|| {
            HandlerError::new(format!(
                "handler reference '{reference}' is not in <module-path>.<callable-name> form"
            ))
        })?;
        if module_path.is_empty() || name.is_empty() {
            return Err(HandlerError::new(format!(
                "handler reference '{reference}' has an empty module path or callable name"
            )));
        }
        Ok(Self {
            module_path: module_path.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for HandlerReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module_path, self.name)
    }
}

/// The host's dynamic-load mechanism: turn a parsed reference into a live
/// callable.
pub trait HandlerProvider: Send + Sync {
    fn load(&self, reference: &HandlerReference) -> Result<Arc<dyn Handler>, HandlerError>;
}

type HandlerFactory = Box<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// In-process provider: the host registers a factory per reference string.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: std::sync::RwLock<HashMap<String, HandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a reference.
    pub fn register<F>(&self, reference: impl Into<String>, factory: F) -> Result<(), HandlerError>
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        let reference = reference.into();
        HandlerReference::parse(&reference)?;

        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if factories.contains_key(&reference) {
            return Err(HandlerError::new(format!(
                "handler '{reference}' is already registered"
            )));
        }
        factories.insert(reference.clone(), Box::new(factory));
        info!(%reference, "registered handler");
        Ok(())
    }

    /// Register an already constructed handler.
    pub fn register_handler(
        &self,
        reference: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), HandlerError> {
        self.register(reference, move || handler.clone())
    }
}

impl HandlerProvider for HandlerRegistry {
    fn load(&self, reference: &HandlerReference) -> Result<Arc<dyn Handler>, HandlerError> {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let factory = factories.get(&reference.to_string()).ok_or_else(|| {
            HandlerError::new(format!("handler '{reference}' is not registered"))
        })?;
        Ok(factory())
    }
}

/// Caching resolver and fault-isolating invoker.
pub struct HandlerResolver {
    provider: Arc<dyn HandlerProvider>,
    cache: RwLock<HashMap<String, Arc<dyn Handler>>>,
    env: HashMap<String, String>,
}

impl HandlerResolver {
    pub fn new(provider: Arc<dyn HandlerProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            env: HashMap::new(),
        }
    }

    /// Environment variables propagated into every handler context.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Resolve a reference, caching the result.
    ///
    /// Resolution is a pure function of the reference string, so a race to
    /// resolve the same reference twice is harmless; the first entry written
    /// wins and later loads are discarded.
    pub async fn resolve(&self, reference: &str) -> Result<Arc<dyn Handler>, HandlerError> {
        if let Some(handler) = self.cache.read().await.get(reference) {
            return Ok(handler.clone());
        }

        let parsed = HandlerReference::parse(reference)?;
        let loaded = self.provider.load(&parsed)?;
        debug!(%reference, "resolved handler");

        let mut cache = self.cache.write().await;
        Ok(cache
            .entry(reference.to_string())
            .or_insert(loaded)
            .clone())
    }

    /// Invoke the handler behind `reference`.
    ///
    /// Never fails: faults, panics, and deadline overruns all collapse into
    /// the opaque 500 result so one bad request cannot take down the
    /// request-handling path for others.
    pub async fn invoke(
        &self,
        reference: &str,
        event: InvocationEvent,
        request_id: &str,
        deadline: Option<Duration>,
    ) -> InvocationResult {
        let handler = match self.resolve(reference).await {
            Ok(handler) => handler,
            Err(e) => {
                error!(%reference, request_id, error = %e, "handler resolution failed");
                return InvocationResult::internal_error();
            }
        };

        let ctx = HandlerContext {
            env: self.env.clone(),
            function_name: reference.to_string(),
            request_id: request_id.to_string(),
            deadline,
        };

        // The handler runs on its own task so a panic is contained as a
        // JoinError instead of unwinding through the connection task.
        let task = tokio::spawn(async move { handler.invoke(event, ctx).await });
        let abort = task.abort_handle();

        let joined = match deadline {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(%reference, request_id, ?limit, "handler timed out");
                    abort.abort();
                    return InvocationResult::internal_error();
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(%reference, request_id, error = %e, "handler fault");
                InvocationResult::internal_error()
            }
            Err(e) => {
                error!(%reference, request_id, error = %e, "handler panicked");
                InvocationResult::internal_error()
            }
        }
    }
}

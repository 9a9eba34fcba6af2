//! The host boundary: route registration and request dispatch.
//!
//! [`Router::bind`] is the registration call — it takes the frozen
//! [`RouteTable`], eagerly resolves every handler reference (a missing
//! handler aborts startup, never a request), and captures the per-API stage
//! names. [`Router::dispatch`] is the per-request call — adapt, invoke,
//! adapt back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::function::registry::HandlerProvider;
use crate::function::{build_event, HandlerError, HandlerResolver};
use crate::gateway::{extract_api_documents, CompiledRoute, GatewayError, RouteTable};
use crate::http::{ApiRequest, ApiResponse, StatusCode};
use crate::identity::IdentityProvider;
use crate::template::{CloudformationTemplate, TemplateError};

/// Errors that can abort gateway construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("handler binding failed: {0}")]
    Handler(#[from] HandlerError),
}

/// Immutable request dispatcher built once at startup.
pub struct Router {
    table: RouteTable,
    resolver: HandlerResolver,
    stages: IndexMap<String, String>,
    default_stage: String,
    identity: Option<Arc<dyn IdentityProvider>>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("table", &self.table)
            .field("stages", &self.stages)
            .field("default_stage", &self.default_stage)
            .field("identity", &self.identity.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Register a route table against a handler provider.
    ///
    /// Every handler reference is resolved here so that a template pointing
    /// at an unregistered handler refuses to start instead of failing its
    /// first request.
    pub async fn bind(
        table: RouteTable,
        provider: Arc<dyn HandlerProvider>,
        env: HashMap<String, String>,
    ) -> Result<Self, BuildError> {
        let resolver = HandlerResolver::new(provider).with_env(env);
        for route in table.routes() {
            resolver.resolve(&route.handler_reference).await?;
            debug!(
                method = %route.method,
                path = %route.path,
                handler = %route.handler_reference,
                "bound route"
            );
        }

        Ok(Self {
            table,
            resolver,
            stages: IndexMap::new(),
            default_stage: "v1".to_string(),
            identity: None,
            request_timeout: None,
        })
    }

    /// Extract, build, and bind everything a template declares.
    pub async fn from_template(
        template: &CloudformationTemplate,
        provider: Arc<dyn HandlerProvider>,
    ) -> Result<Self, BuildError> {
        let documents = extract_api_documents(template)?;
        let table = RouteTable::build(&documents)?;

        let mut stages = IndexMap::new();
        for (api_id, _) in template.apis() {
            if let Some(stage) = template.stage_name(api_id) {
                stages.insert(api_id.clone(), stage.to_string());
            }
        }

        let env = template.environment().into_iter().collect();
        let mut router = Self::bind(table, provider, env).await?;
        router.stages = stages;
        Ok(router)
    }

    /// Plug an identity provider in front of every dispatch.
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    /// Deadline applied to each handler invocation.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Stage name reported when an API declares none.
    pub fn with_default_stage(mut self, stage: impl Into<String>) -> Self {
        self.default_stage = stage.into();
        self
    }

    /// The bound routes, for registration with an external dispatcher.
    pub fn routes(&self) -> &[CompiledRoute] {
        self.table.routes()
    }

    /// Adapt an inbound request, invoke the target handler, and adapt its
    /// result back; never fails.
    pub async fn dispatch(&self, request: ApiRequest) -> ApiResponse {
        let request_id = generate_request_id();

        let Some(matched) = self.table.find(request.method, &request.path) else {
            debug!(method = %request.method, path = %request.path, "no route matched");
            return ApiResponse::not_found();
        };

        let authorizer = match &self.identity {
            Some(provider) => match provider.authenticate(&request).await {
                Ok(claims) => Some(claims.into_authorizer()),
                Err(rejection) => {
                    debug!(request_id, reason = %rejection, "request rejected by identity provider");
                    return ApiResponse::message(StatusCode::UNAUTHORIZED, "Unauthorized");
                }
            },
            None => None,
        };

        let stage = self
            .stages
            .get(&matched.route.source_api_id)
            .unwrap_or(&self.default_stage)
            .clone();

        let event = build_event(&request, &matched, &stage, &request_id, authorizer);
        let reference = matched.route.handler_reference.clone();

        let result = self
            .resolver
            .invoke(&reference, event, &request_id, self.request_timeout)
            .await;

        match result.into_response() {
            Ok(response) => response,
            Err(invalid) => {
                warn!(request_id, handler = %reference, error = %invalid, "unusable handler result");
                ApiResponse::internal_error()
            }
        }
    }
}

/// Request ID from the monotonic-ish nanosecond clock, hex encoded.
fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{timestamp:x}")
}

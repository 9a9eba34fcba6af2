//! Gantry demo server.
//!
//! Serves the bundled demo template (`demos/template.yml`, or a path given
//! as the first argument) with a few in-process handlers registered under
//! the references the template points at.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing_subscriber::EnvFilter;

use gantry::function::FnHandler;
use gantry::prelude::*;

fn hello_handler(
    event: InvocationEvent,
    ctx: HandlerContext,
) -> Result<InvocationResult, HandlerError> {
    let name = event
        .query_string_parameters
        .get("name")
        .cloned()
        .unwrap_or_else(|| "World".to_string());

    let body = serde_json::json!({
        "message": format!("Hello, {name}!"),
        "stage": event.request_context.stage,
        "logLevel": ctx.get_env("LOG_LEVEL"),
        "requestId": ctx.request_id,
    });

    InvocationResult::json(&body).map_err(HandlerError::from)
}

fn echo_handler(
    event: InvocationEvent,
    _ctx: HandlerContext,
) -> Result<InvocationResult, HandlerError> {
    Ok(InvocationResult::ok(event.body))
}

fn user_handler(
    event: InvocationEvent,
    _ctx: HandlerContext,
) -> Result<InvocationResult, HandlerError> {
    let id = event
        .path_parameters
        .get("id")
        .cloned()
        .unwrap_or_default();
    InvocationResult::json(&serde_json::json!({ "id": id })).map_err(HandlerError::from)
}

/// Template parameter bindings from `GANTRY_PARAM_<NAME>` variables.
fn parameters_from_env() -> IndexMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix("GANTRY_PARAM_")
                .map(|name| (name.to_string(), value))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let template_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/template.yml".to_string());

    tracing::info!("starting gantry with template {template_path}");

    let template =
        CloudformationTemplate::from_file(Some(&template_path), parameters_from_env())?;

    let registry = Arc::new(HandlerRegistry::new());
    registry.register_handler(
        "handlers.hello.handle",
        Arc::new(FnHandler::new(hello_handler)),
    )?;
    registry.register_handler(
        "handlers.echo.handle",
        Arc::new(FnHandler::new(echo_handler)),
    )?;
    registry.register_handler(
        "handlers.users.get",
        Arc::new(FnHandler::new(user_handler)),
    )?;

    let router = Router::from_template(&template, registry).await?;
    for route in router.routes() {
        tracing::info!(
            "route {} {} -> {}",
            route.method,
            route.path,
            route.handler_reference
        );
    }

    let host = std::env::var("GANTRY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("GANTRY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let config = GatewayConfig::new().host(host).port(port);

    tracing::info!("try: curl http://localhost:{port}/hello?name=gantry");
    tracing::info!("try: curl -X POST -d 'ping' http://localhost:{port}/echo");
    tracing::info!("routes: curl http://localhost:{port}/_routes");

    let server = GatewayServer::new(config, router);
    server.run().await
}

//! Handler trait and invocation context.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::function::event::{InvocationEvent, InvocationResult};

/// Execution context passed to a handler alongside the event.
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    /// Environment variables collected from the template.
    pub env: HashMap<String, String>,
    /// The handler reference this invocation resolved to.
    pub function_name: String,
    /// Request ID for tracing.
    pub request_id: String,
    /// Deadline the invoker enforces, when configured.
    pub deadline: Option<Duration>,
}

impl HandlerContext {
    pub fn new(function_name: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            env: HashMap::new(),
            function_name: function_name.into(),
            request_id: request_id.into(),
            deadline: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn get_env(&self, key: &str) -> Option<&String> {
        self.env.get(key)
    }
}

/// A routed callable.
///
/// Implementations receive the provider-shaped event and return the
/// structured result; any error escaping this boundary is converted to an
/// opaque 500 by the invoker, never propagated to other requests.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(
        &self,
        event: InvocationEvent,
        ctx: HandlerContext,
    ) -> Result<InvocationResult, HandlerError>;
}

/// Adapter turning a plain closure of `(event, ctx)` into a [`Handler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(InvocationEvent, HandlerContext) -> Result<InvocationResult, HandlerError>
        + Send
        + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(InvocationEvent, HandlerContext) -> Result<InvocationResult, HandlerError>
        + Send
        + Sync,
{
    async fn invoke(
        &self,
        event: InvocationEvent,
        ctx: HandlerContext,
    ) -> Result<InvocationResult, HandlerError> {
        (self.func)(event, ctx)
    }
}

/// Handler fault.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_handler_adapts_a_closure() {
        let handler = FnHandler::new(|event: InvocationEvent, _ctx| {
            Ok(InvocationResult::ok(event.http_method))
        });

        let event: InvocationEvent = serde_json::from_value(serde_json::json!({
            "httpMethod": "GET",
            "path": "/x",
            "resource": "/x",
            "pathParameters": {},
            "queryStringParameters": {},
            "multiValueQueryStringParameters": {},
            "headers": {},
            "multiValueHeaders": {},
            "body": "",
            "isBase64Encoded": false,
            "requestContext": {
                "stage": "v1",
                "requestId": "r",
                "requestTime": "",
                "requestTimeEpoch": 0,
                "resourcePath": "/x",
                "httpMethod": "GET",
                "path": "/x",
                "protocol": "HTTP/1.1",
                "identity": {"sourceIp": null, "userAgent": null}
            }
        }))
        .unwrap();

        let result = handler
            .invoke(event, HandlerContext::new("test", "r"))
            .await
            .unwrap();
        assert_eq!(result.body, "GET");
    }

    #[test]
    fn test_context_env() {
        let ctx = HandlerContext::new("handlers.test.handle", "req-1")
            .with_env("LOG_LEVEL", "WARNING");
        assert_eq!(ctx.get_env("LOG_LEVEL"), Some(&"WARNING".to_string()));
        assert_eq!(ctx.get_env("MISSING"), None);
    }
}

//! Pluggable identity providers.
//!
//! A provider inspects the raw request and either returns a claims
//! structure, which the dispatcher places under `requestContext.authorizer`,
//! or rejects the request, which maps to a 401 before any handler runs.

use async_trait::async_trait;

use crate::http::ApiRequest;

/// Identity established for a request.
#[derive(Debug, Clone, Default)]
pub struct Claims {
    pub subject: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            context: serde_json::Map::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// The `requestContext.authorizer` value handlers see.
    pub fn into_authorizer(self) -> serde_json::Value {
        let mut authorizer = self.context;
        if let Some(subject) = self.subject {
            authorizer.insert("principalId".to_string(), serde_json::Value::String(subject));
        }
        serde_json::Value::Object(authorizer)
    }
}

/// Rejection returned by a provider.
#[derive(Debug, Clone)]
pub struct AuthError {
    pub message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AuthError {}

/// Interface for authentication providers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, request: &ApiRequest) -> Result<Claims, AuthError>;
}

/// Provider accepting a single static bearer token.
///
/// Suitable for local development; real deployments plug their own provider
/// behind the trait.
pub struct BearerTokenProvider {
    token: String,
}

impl BearerTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for BearerTokenProvider {
    async fn authenticate(&self, request: &ApiRequest) -> Result<Claims, AuthError> {
        let token = request
            .header_value("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AuthError::new("missing bearer token"))?;

        if token != self.token {
            return Err(AuthError::new("invalid bearer token"));
        }

        Ok(Claims::new("bearer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let provider = BearerTokenProvider::new("s3cret");
        let request =
            ApiRequest::new(Method::Get, "/").header("Authorization", "Bearer s3cret");

        let claims = provider.authenticate(&request).await.unwrap();
        assert_eq!(claims.subject.as_deref(), Some("bearer"));
    }

    #[tokio::test]
    async fn test_bearer_token_rejected() {
        let provider = BearerTokenProvider::new("s3cret");

        let missing = ApiRequest::new(Method::Get, "/");
        assert!(provider.authenticate(&missing).await.is_err());

        let wrong = ApiRequest::new(Method::Get, "/").header("Authorization", "Bearer nope");
        assert!(provider.authenticate(&wrong).await.is_err());
    }

    #[test]
    fn test_claims_into_authorizer() {
        let authorizer = Claims::new("user-1")
            .with_claim("scope", serde_json::json!("read"))
            .into_authorizer();
        assert_eq!(authorizer["principalId"], "user-1");
        assert_eq!(authorizer["scope"], "read");
    }
}

//! The provider-shaped invocation contract and the HTTP adaptation layer.
//!
//! [`InvocationEvent`] and [`InvocationResult`] reproduce the aws_proxy wire
//! shapes byte-for-byte where handlers depend on them: camelCase field
//! names, single- and multi-value header/query maps, and the base64 body
//! flag for binary payloads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::gateway::RouteMatch;
use crate::http::{ApiRequest, ApiResponse};

/// Caller identity fields within the request context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Request metadata handed to the handler alongside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub stage: String,
    pub request_id: String,
    pub request_time: String,
    pub request_time_epoch: i64,
    pub resource_path: String,
    pub http_method: String,
    pub path: String,
    pub protocol: String,
    pub identity: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<serde_json::Value>,
}

/// The event structure passed to a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    pub http_method: String,
    pub path: String,
    pub resource: String,
    pub path_parameters: IndexMap<String, String>,
    pub query_string_parameters: IndexMap<String, String>,
    pub multi_value_query_string_parameters: IndexMap<String, Vec<String>>,
    pub headers: IndexMap<String, String>,
    pub multi_value_headers: IndexMap<String, Vec<String>>,
    pub body: String,
    pub is_base64_encoded: bool,
    pub request_context: RequestContext,
}

/// The structured value a handler returns.
///
/// `status_code` is optional on purpose: a result without one is malformed
/// and must be rejected, not silently defaulted to 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub multi_value_headers: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl InvocationResult {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            headers: IndexMap::new(),
            multi_value_headers: IndexMap::new(),
            body: String::new(),
            is_base64_encoded: false,
        }
    }

    /// A 200 result with a text body.
    pub fn ok(body: impl Into<String>) -> Self {
        let mut result = Self::new(200);
        result.body = body.into();
        result
    }

    /// A 200 result with a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let mut result = Self::new(200);
        result.body = serde_json::to_string(value)?;
        result
            .headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(result)
    }

    /// The opaque result standing in for a handler fault.
    pub fn internal_error() -> Self {
        let mut result = Self::new(500);
        result.body = serde_json::json!({ "message": "Internal Server Error" }).to_string();
        result
            .headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        result
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Carry raw bytes as a base64 body.
    pub fn binary_body(mut self, bytes: &[u8]) -> Self {
        self.body = BASE64.encode(bytes);
        self.is_base64_encoded = true;
        self
    }

    /// Translate into the HTTP response shape.
    pub fn into_response(self) -> Result<ApiResponse, InvalidInvocationResult> {
        let status = self
            .status_code
            .ok_or_else(|| InvalidInvocationResult::new("missing statusCode"))?;

        let body = if self.is_base64_encoded {
            BASE64
                .decode(self.body.as_bytes())
                .map_err(|e| InvalidInvocationResult::new(format!("invalid base64 body: {e}")))?
        } else {
            self.body.into_bytes()
        };

        let mut response = ApiResponse::new(status).body(body);
        for (name, values) in self.multi_value_headers {
            for value in values {
                response = response.header(name.clone(), value);
            }
        }
        for (name, value) in self.headers {
            let already_present = response
                .headers
                .iter()
                .any(|(n, v)| *n == name && *v == value);
            if !already_present {
                response = response.header(name, value);
            }
        }
        Ok(response)
    }
}

/// A handler returned a result the response transform cannot honor.
#[derive(Debug, Clone)]
pub struct InvalidInvocationResult {
    pub reason: String,
}

impl InvalidInvocationResult {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for InvalidInvocationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid invocation result: {}", self.reason)
    }
}

impl std::error::Error for InvalidInvocationResult {}

/// Build the invocation event for a matched request.
pub fn build_event(
    request: &ApiRequest,
    matched: &RouteMatch<'_>,
    stage: &str,
    request_id: &str,
    authorizer: Option<serde_json::Value>,
) -> InvocationEvent {
    let now = Utc::now();
    let (query, multi_query) = parse_query(&request.query);
    let (headers, multi_headers) = collect_headers(request);
    let (body, is_base64_encoded) = encode_body(request);

    InvocationEvent {
        http_method: request.method.to_string(),
        path: request.path.clone(),
        resource: matched.route.path.clone(),
        path_parameters: matched.path_parameters.clone(),
        query_string_parameters: query,
        multi_value_query_string_parameters: multi_query,
        headers,
        multi_value_headers: multi_headers,
        body,
        is_base64_encoded,
        request_context: RequestContext {
            stage: stage.to_string(),
            request_id: request_id.to_string(),
            request_time: now.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
            request_time_epoch: now.timestamp(),
            resource_path: matched.route.path.clone(),
            http_method: request.method.to_string(),
            path: request.path.clone(),
            protocol: "HTTP/1.1".to_string(),
            identity: Identity {
                source_ip: request.source_ip.clone(),
                user_agent: request.header_value("user-agent").map(str::to_string),
            },
            authorizer,
        },
    }
}

/// Split a raw query string into single-value (last occurrence wins) and
/// multi-value (all occurrences, insertion order) maps.
fn parse_query(raw: &str) -> (IndexMap<String, String>, IndexMap<String, Vec<String>>) {
    let mut single = IndexMap::new();
    let mut multi: IndexMap<String, Vec<String>> = IndexMap::new();

    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = decode_component(name);
        let value = decode_component(value);
        multi.entry(name.clone()).or_default().push(value.clone());
        single.insert(name, value);
    }

    (single, multi)
}

fn decode_component(component: &str) -> String {
    let with_spaces = component.replace('+', " ");
    urlencoding::decode(&with_spaces)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(with_spaces)
}

fn collect_headers(
    request: &ApiRequest,
) -> (IndexMap<String, String>, IndexMap<String, Vec<String>>) {
    let mut single = IndexMap::new();
    let mut multi: IndexMap<String, Vec<String>> = IndexMap::new();

    for (name, value) in &request.headers {
        let name = name.to_ascii_lowercase();
        multi.entry(name.clone()).or_default().push(value.clone());
        single.insert(name, value.clone());
    }

    (single, multi)
}

/// Encode the request body for the event: binary content travels base64
/// encoded with the flag set, text passes through.
fn encode_body(request: &ApiRequest) -> (String, bool) {
    if request.body.is_empty() {
        return (String::new(), false);
    }

    let textual_type = match request.content_type() {
        Some(ct) => is_textual_media_type(ct),
        None => true,
    };

    if textual_type {
        if let Ok(text) = std::str::from_utf8(&request.body) {
            return (text.to_string(), false);
        }
    }

    (BASE64.encode(&request.body), true)
}

fn is_textual_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/x-www-form-urlencoded"
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ApiDocument, Operation, RouteTable};
    use crate::http::Method;

    fn route_table(path: &str) -> RouteTable {
        let mut paths: IndexMap<String, IndexMap<Method, Operation>> = IndexMap::new();
        paths.entry(path.to_string()).or_default().insert(
            Method::Post,
            Operation {
                integration_target: "handlers.test.handle".to_string(),
                parameters: Vec::new(),
            },
        );
        RouteTable::build(&[ApiDocument {
            source_api_id: "ApiGateway".to_string(),
            paths,
        }])
        .unwrap()
    }

    fn build(request: &ApiRequest, pattern: &str) -> InvocationEvent {
        let table = route_table(pattern);
        let matched = table.find(request.method, &request.path).unwrap();
        build_event(request, &matched, "v1", "req-1", None)
    }

    #[test]
    fn test_event_basic_fields() {
        let request = ApiRequest::new(Method::Post, "/users/42")
            .header("User-Agent", "gantry/test")
            .source_ip("127.0.0.1")
            .body("hello");
        let event = build(&request, "/users/{id}");

        assert_eq!(event.http_method, "POST");
        assert_eq!(event.path, "/users/42");
        assert_eq!(event.resource, "/users/{id}");
        assert_eq!(event.path_parameters["id"], "42");
        assert_eq!(event.body, "hello");
        assert!(!event.is_base64_encoded);
        assert_eq!(event.request_context.stage, "v1");
        assert_eq!(event.request_context.resource_path, "/users/{id}");
        assert_eq!(
            event.request_context.identity.source_ip.as_deref(),
            Some("127.0.0.1")
        );
        assert_eq!(
            event.request_context.identity.user_agent.as_deref(),
            Some("gantry/test")
        );
    }

    #[test]
    fn test_event_serializes_with_provider_field_names() {
        let request = ApiRequest::new(Method::Post, "/users/42");
        let event = build(&request, "/users/{id}");
        let json = serde_json::to_value(&event).unwrap();

        assert!(json.get("httpMethod").is_some());
        assert!(json.get("isBase64Encoded").is_some());
        assert!(json.get("multiValueQueryStringParameters").is_some());
        assert!(json["requestContext"].get("resourcePath").is_some());
        assert!(json["requestContext"]["identity"].get("sourceIp").is_some());
    }

    #[test]
    fn test_query_single_and_multi_value() {
        let request = ApiRequest::new(Method::Post, "/users/42")
            .query("tag=a&tag=b&q=hello%20world&flag");
        let event = build(&request, "/users/{id}");

        assert_eq!(event.query_string_parameters["tag"], "b");
        assert_eq!(
            event.multi_value_query_string_parameters["tag"],
            vec!["a", "b"]
        );
        assert_eq!(event.query_string_parameters["q"], "hello world");
        assert_eq!(event.query_string_parameters["flag"], "");
    }

    #[test]
    fn test_headers_single_and_multi_value() {
        let request = ApiRequest::new(Method::Post, "/users/42")
            .header("X-Tag", "one")
            .header("X-Tag", "two");
        let event = build(&request, "/users/{id}");

        assert_eq!(event.headers["x-tag"], "two");
        assert_eq!(event.multi_value_headers["x-tag"], vec!["one", "two"]);
    }

    #[test]
    fn test_binary_body_is_base64_encoded() {
        let payload = [0u8, 159, 146, 150];
        let request = ApiRequest::new(Method::Post, "/users/42")
            .header("Content-Type", "application/octet-stream")
            .body(payload.to_vec());
        let event = build(&request, "/users/{id}");

        assert!(event.is_base64_encoded);
        assert_eq!(BASE64.decode(event.body.as_bytes()).unwrap(), payload);
    }

    #[test]
    fn test_non_utf8_text_body_falls_back_to_base64() {
        let payload = [0xffu8, 0xfe, 0x00];
        let request = ApiRequest::new(Method::Post, "/users/42")
            .header("Content-Type", "text/plain")
            .body(payload.to_vec());
        let event = build(&request, "/users/{id}");

        assert!(event.is_base64_encoded);
        assert_eq!(BASE64.decode(event.body.as_bytes()).unwrap(), payload);
    }

    #[test]
    fn test_result_into_response() {
        let response = InvocationResult::ok("ok")
            .header("Content-Type", "text/plain")
            .into_response()
            .unwrap();

        assert_eq!(u16::from(response.status), 200);
        assert_eq!(response.text_body(), "ok");
        assert_eq!(
            response.headers,
            vec![("Content-Type".to_string(), "text/plain".to_string())]
        );
    }

    #[test]
    fn test_result_base64_body_is_decoded() {
        let payload = b"\x00\x01binary";
        let response = InvocationResult::new(200)
            .binary_body(payload)
            .into_response()
            .unwrap();
        assert_eq!(&response.body[..], payload);
    }

    #[test]
    fn test_result_invalid_base64_is_rejected() {
        let mut result = InvocationResult::new(200);
        result.body = "not base64!!!".to_string();
        result.is_base64_encoded = true;
        assert!(result.into_response().is_err());
    }

    #[test]
    fn test_result_missing_status_code_is_rejected() {
        let result: InvocationResult = serde_json::from_str(r#"{"body": "ok"}"#).unwrap();
        let err = result.into_response().unwrap_err();
        assert!(err.reason.contains("statusCode"));
    }

    #[test]
    fn test_result_multi_value_headers_are_emitted() {
        let mut result = InvocationResult::ok("");
        result.multi_value_headers.insert(
            "Set-Cookie".to_string(),
            vec!["a=1".to_string(), "b=2".to_string()],
        );
        let response = result.into_response().unwrap();
        let cookies: Vec<_> = response
            .headers
            .iter()
            .filter(|(n, _)| n == "Set-Cookie")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }
}

//! API extraction and route-table construction.
//!
//! This layer turns a resolved template into an ordered, immutable
//! [`RouteTable`]: API documents are pulled out of the template (embedded
//! OpenAPI definitions, or synthesized from function event declarations),
//! then compiled into routes with duplicate detection and path-parameter
//! validation.

pub mod openapi;
pub mod routing;

pub use openapi::{
    extract_api_documents, ApiDocument, Operation, ParameterLocation, ParameterSpec,
};
pub use routing::{CompiledRoute, RouteMatch, RouteTable, Segment};

/// Errors raised while extracting API documents or building the route table.
///
/// All of them abort startup: a partially built routing table must never
/// serve traffic.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// An operation lacks the integration vendor extension.
    #[error("operation {method} {path} in {api_id} has no integration")]
    MissingIntegration {
        api_id: String,
        path: String,
        method: String,
    },

    /// An integration URI does not name a function resource present in the
    /// template.
    #[error("integration for {method} {path} does not name a known function: {uri}")]
    UnknownFunction {
        path: String,
        method: String,
        uri: String,
    },

    /// Declared path parameters and the pattern's captured segments differ.
    #[error(
        "path parameters for {method} {path} do not match: declared [{declared}], captured [{captured}]"
    )]
    PathParameterMismatch {
        method: String,
        path: String,
        declared: String,
        captured: String,
    },

    /// Two operations compile to the same (method, pattern shape).
    #[error("duplicate route {method} {path}")]
    DuplicateRoute { method: String, path: String },

    /// The API document structure is not what the extractor expects.
    #[error("malformed API document in {api_id}: {reason}")]
    MalformedDocument { api_id: String, reason: String },
}

//! API document extraction.
//!
//! Pulls the canonical routing structure out of a resolved template: for
//! each API resource, either its embedded OpenAPI definition (the
//! `DefinitionBody`, with fragment inclusion already resolved upstream) or a
//! document synthesized from function `Api` event declarations. Operations
//! carry the handler reference derived from the integration URI and the
//! owning function's `CodeUri`/`Handler` properties.

use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use crate::gateway::GatewayError;
use crate::http::Method;
use crate::template::{CloudformationTemplate, TemplateNode};

/// Vendor extension key carrying integration metadata.
pub const INTEGRATION_KEY: &str = "x-amazon-apigateway-integration";

/// Logical ID used when function events declare routes without any API
/// resource in the template.
pub const IMPLICIT_API_ID: &str = "ServerlessRestApi";

/// Matches an apigateway invocation ARN and captures the function logical
/// ID, in both the resolved (`.../Fn.Arn/invocations`) and the raw
/// substitution (`.../${Fn.Arn}/invocations`) spelling.
const INTEGRATION_URI_PATTERN: &str = r"^arn:aws:apigateway.*?\$?\{?(\w+)\.Arn\}?/invocations$";

/// Where an operation parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
}

impl ParameterLocation {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            _ => None,
        }
    }
}

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
}

/// One routed operation.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Handler reference in `<module-path>.<callable-name>` form.
    pub integration_target: String,
    pub parameters: Vec<ParameterSpec>,
}

/// Canonical API structure extracted from one API resource.
#[derive(Debug, Clone)]
pub struct ApiDocument {
    pub source_api_id: String,
    pub paths: IndexMap<String, IndexMap<Method, Operation>>,
}

/// Extract every API document from the template.
///
/// API resources with a `DefinitionBody` contribute their OpenAPI paths;
/// those without one collect the function `Api` events that target them.
/// When the template has function `Api` events but no API resource at all,
/// an implicit document is synthesized under [`IMPLICIT_API_ID`].
pub fn extract_api_documents(
    template: &CloudformationTemplate,
) -> Result<Vec<ApiDocument>, GatewayError> {
    let mut documents = Vec::new();
    let mut has_api_resource = false;

    for (api_id, api) in template.apis() {
        has_api_resource = true;
        let document = match api.property("DefinitionBody") {
            Some(body) => from_definition_body(api_id, body, template)?,
            None => from_function_events(template, api_id, Some(api_id))?,
        };
        debug!(api_id = %api_id, paths = document.paths.len(), "extracted API document");
        documents.push(document);
    }

    if !has_api_resource {
        let implicit = from_function_events(template, IMPLICIT_API_ID, None)?;
        if !implicit.paths.is_empty() {
            debug!(paths = implicit.paths.len(), "extracted implicit API document");
            documents.push(implicit);
        }
    }

    Ok(documents)
}

fn from_definition_body(
    api_id: &str,
    body: &TemplateNode,
    template: &CloudformationTemplate,
) -> Result<ApiDocument, GatewayError> {
    let malformed = |reason: &str| GatewayError::MalformedDocument {
        api_id: api_id.to_string(),
        reason: reason.to_string(),
    };

    let paths = body
        .get("paths")
        .and_then(TemplateNode::as_mapping)
        .ok_or_else(|| malformed("definition body has no paths"))?;

    let uri_pattern = Regex::new(INTEGRATION_URI_PATTERN)
        .unwrap_or_else(|_| unreachable!("invalid integration URI pattern"));

    let mut document = ApiDocument {
        source_api_id: api_id.to_string(),
        paths: IndexMap::new(),
    };

    for (path, item) in paths {
        let item = item
            .as_mapping()
            .ok_or_else(|| malformed("path item must be a mapping"))?;
        let shared_parameters = item
            .get("parameters")
            .map(|p| parse_parameters(api_id, p))
            .transpose()?
            .unwrap_or_default();

        let mut operations = IndexMap::new();
        for (key, operation) in item {
            let Some(method) = Method::parse(key) else {
                // Non-operation path item fields: parameters, summary, ...
                continue;
            };

            let integration = operation.get(INTEGRATION_KEY).ok_or_else(|| {
                GatewayError::MissingIntegration {
                    api_id: api_id.to_string(),
                    path: path.clone(),
                    method: method.to_string(),
                }
            })?;
            let uri = integration
                .get("uri")
                .and_then(TemplateNode::as_str)
                .ok_or_else(|| malformed("integration uri must be a string"))?;

            let target = uri_pattern
                .captures(uri)
                .and_then(|captures| captures.get(1))
                .and_then(|id| template.handler_reference(id.as_str()))
                .ok_or_else(|| GatewayError::UnknownFunction {
                    path: path.clone(),
                    method: method.to_string(),
                    uri: uri.to_string(),
                })?;

            let mut parameters = shared_parameters.clone();
            if let Some(own) = operation.get("parameters") {
                merge_parameters(&mut parameters, parse_parameters(api_id, own)?);
            }

            operations.insert(
                method,
                Operation {
                    integration_target: target,
                    parameters,
                },
            );
        }

        document.paths.insert(path.clone(), operations);
    }

    Ok(document)
}

/// Build a document from function `Api` event declarations.
///
/// With `gateway_id` set, only events whose resolved `RestApiId` names that
/// gateway are collected; without it (the implicit API case) only events
/// that name no gateway are.
fn from_function_events(
    template: &CloudformationTemplate,
    api_id: &str,
    gateway_id: Option<&str>,
) -> Result<ApiDocument, GatewayError> {
    let mut document = ApiDocument {
        source_api_id: api_id.to_string(),
        paths: IndexMap::new(),
    };

    for (function_id, function) in template.functions() {
        let Some(events) = function.property("Events").and_then(TemplateNode::as_mapping) else {
            continue;
        };

        for (event_name, event) in events {
            if event.get("Type").and_then(TemplateNode::as_str) != Some("Api") {
                continue;
            }

            let malformed = |reason: String| GatewayError::MalformedDocument {
                api_id: api_id.to_string(),
                reason,
            };

            let properties = event.get("Properties").ok_or_else(|| {
                malformed(format!("event {event_name} on {function_id} has no Properties"))
            })?;

            let rest_api_id = properties.get("RestApiId").and_then(TemplateNode::as_str);
            if rest_api_id != gateway_id {
                continue;
            }

            let path = properties
                .get("Path")
                .and_then(TemplateNode::as_str)
                .ok_or_else(|| {
                    malformed(format!("event {event_name} on {function_id} has no Path"))
                })?;
            let method = properties
                .get("Method")
                .and_then(TemplateNode::as_str)
                .and_then(Method::parse)
                .ok_or_else(|| {
                    malformed(format!("event {event_name} on {function_id} has no usable Method"))
                })?;

            let target = template.handler_reference(function_id).ok_or_else(|| {
                malformed(format!("function {function_id} declares no Handler"))
            })?;

            let operations = document.paths.entry(path.to_string()).or_default();
            if operations.contains_key(&method) {
                return Err(GatewayError::DuplicateRoute {
                    method: method.to_string(),
                    path: path.to_string(),
                });
            }
            operations.insert(
                method,
                Operation {
                    integration_target: target,
                    parameters: Vec::new(),
                },
            );
        }
    }

    Ok(document)
}

fn parse_parameters(
    api_id: &str,
    node: &TemplateNode,
) -> Result<Vec<ParameterSpec>, GatewayError> {
    let items = node.as_sequence().ok_or_else(|| GatewayError::MalformedDocument {
        api_id: api_id.to_string(),
        reason: "parameters must be a sequence".to_string(),
    })?;

    let mut specs = Vec::new();
    for item in items {
        let Some(name) = item.get("name").and_then(TemplateNode::as_str) else {
            continue;
        };
        let Some(location) = item
            .get("in")
            .and_then(TemplateNode::as_str)
            .and_then(ParameterLocation::parse)
        else {
            // Locations outside the routed set (cookie, body) are not ours.
            continue;
        };
        let required = matches!(
            item.get("required"),
            Some(TemplateNode::Scalar(crate::template::Scalar::Bool(true)))
        );
        specs.push(ParameterSpec {
            name: name.to_string(),
            location,
            required,
        });
    }
    Ok(specs)
}

/// Operation-level parameters override path-level ones with the same name
/// and location.
fn merge_parameters(base: &mut Vec<ParameterSpec>, own: Vec<ParameterSpec>) {
    for spec in own {
        if let Some(existing) = base
            .iter_mut()
            .find(|b| b.name == spec.name && b.location == spec.location)
        {
            *existing = spec;
        } else {
            base.push(spec);
        }
    }
}

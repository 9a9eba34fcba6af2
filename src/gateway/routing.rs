//! Route table construction and matching.
//!
//! Compiles API documents into an ordered collection of routes. The table
//! is built once at startup and never mutated afterwards; request handling
//! reads it concurrently without locking.

use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::info;

use crate::gateway::openapi::{ApiDocument, Operation, ParameterLocation};
use crate::gateway::GatewayError;
use crate::http::Method;

/// One segment of a compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled route: method, pattern, and handler reference.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub method: Method,
    pub path: String,
    pub segments: Vec<Segment>,
    pub param_names: Vec<String>,
    pub handler_reference: String,
    pub source_api_id: String,
}

impl CompiledRoute {
    fn compile(
        method: Method,
        path: &str,
        operation: &Operation,
        source_api_id: &str,
    ) -> Result<Self, GatewayError> {
        let segments: Vec<Segment> = split_path(path)
            .map(|segment| {
                segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .filter(|name| !name.is_empty())
                    .map(|name| Segment::Param(name.to_string()))
                    .unwrap_or_else(|| Segment::Literal(segment.to_string()))
            })
            .collect();

        let param_names: Vec<String> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Param(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect();

        let declared: HashSet<&str> = operation
            .parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Path)
            .map(|p| p.name.as_str())
            .collect();
        if !declared.is_empty() {
            let captured: HashSet<&str> = param_names.iter().map(String::as_str).collect();
            if declared != captured {
                let mut declared: Vec<_> = declared.into_iter().collect();
                let mut captured: Vec<_> = captured.into_iter().collect();
                declared.sort_unstable();
                captured.sort_unstable();
                return Err(GatewayError::PathParameterMismatch {
                    method: method.to_string(),
                    path: path.to_string(),
                    declared: declared.join(", "),
                    captured: captured.join(", "),
                });
            }
        }

        Ok(Self {
            method,
            path: path.to_string(),
            segments,
            param_names,
            handler_reference: operation.integration_target.clone(),
            source_api_id: source_api_id.to_string(),
        })
    }

    /// The pattern with parameter names erased; two routes with the same
    /// shape would be ambiguous at match time.
    fn shape(&self) -> String {
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(literal) => shape.push_str(literal),
                Segment::Param(_) => shape.push_str("{}"),
            }
        }
        if shape.is_empty() {
            shape.push('/');
        }
        shape
    }

    /// Match a concrete request path, returning captured path parameters.
    pub fn matches(&self, path: &str) -> Option<IndexMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captures = IndexMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = urlencoding::decode(part)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| part.to_string());
                    captures.insert(name.clone(), value);
                }
            }
        }
        Some(captures)
    }

    /// Positional parameter mask, used to prefer literal segments over
    /// captures when several routes match.
    fn specificity(&self) -> Vec<bool> {
        self.segments
            .iter()
            .map(|segment| matches!(segment, Segment::Param(_)))
            .collect()
    }
}

/// A successful route lookup.
pub struct RouteMatch<'a> {
    pub route: &'a CompiledRoute,
    pub path_parameters: IndexMap<String, String>,
}

/// Ordered, write-once collection of compiled routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compile every operation in the given documents.
    ///
    /// Fails fast on duplicate `(method, pattern shape)` pairs, within and
    /// across documents; ambiguous routing is an authoring error, never a
    /// runtime tie-break.
    pub fn build(documents: &[ApiDocument]) -> Result<Self, GatewayError> {
        let mut routes = Vec::new();
        let mut seen: HashSet<(Method, String)> = HashSet::new();

        for document in documents {
            for (path, operations) in &document.paths {
                for (method, operation) in operations {
                    let route =
                        CompiledRoute::compile(*method, path, operation, &document.source_api_id)?;

                    if !seen.insert((route.method, route.shape())) {
                        return Err(GatewayError::DuplicateRoute {
                            method: route.method.to_string(),
                            path: route.path.clone(),
                        });
                    }
                    routes.push(route);
                }
            }
        }

        info!(routes = routes.len(), "route table built");
        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[CompiledRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the route for a request.
    ///
    /// When several patterns match, the one with a literal segment at the
    /// earliest position wins, so `/users/me` prefers a literal route over
    /// `/users/{id}`.
    pub fn find(&self, method: Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .filter(|route| route.method == method)
            .filter_map(|route| {
                route.matches(path).map(|path_parameters| RouteMatch {
                    route,
                    path_parameters,
                })
            })
            .min_by(|a, b| a.route.specificity().cmp(&b.route.specificity()))
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

//! Template engine: loading, intrinsic resolution, and normalization.
//!
//! [`CloudformationTemplate`] is the facade the rest of the crate consumes:
//! it loads a CloudFormation/SAM-style document, resolves every intrinsic
//! against a [`ResolutionContext`], and normalizes the result into a
//! [`ResolvedTemplate`] keyed by logical resource ID.

pub mod error;
pub mod node;
pub mod normalize;
pub mod resolver;

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::info;

pub use error::TemplateError;
pub use node::{Scalar, TemplateNode};
pub use normalize::{ResolvedTemplate, ResourceDefinition, API_TYPE, FUNCTION_TYPE};
pub use resolver::{
    default_pseudo_parameters, resolve, FileFragmentLoader, FragmentLoader, MemoryFragmentLoader,
    ResolutionContext,
};

use crate::cache::Cache;

/// Default template file names probed when no path is given.
const DEFAULT_TEMPLATES: [&str; 2] = ["template.yml", "template.yaml"];

/// A loaded, fully resolved, normalized template.
#[derive(Debug)]
pub struct CloudformationTemplate {
    resolved: ResolvedTemplate,
}

impl CloudformationTemplate {
    /// Load a template from a file.
    ///
    /// When `path` is `None`, `template.yml` then `template.yaml` are probed
    /// in the current directory. Fragment locations are resolved relative to
    /// the template's directory.
    pub fn from_file(
        path: Option<&str>,
        parameters: IndexMap<String, String>,
    ) -> Result<Self, TemplateError> {
        let path = match path {
            Some(p) => {
                let p = Path::new(p);
                if !p.is_file() {
                    return Err(TemplateError::TemplateNotFound(p.display().to_string()));
                }
                p.to_path_buf()
            }
            None => DEFAULT_TEMPLATES
                .iter()
                .map(Path::new)
                .find(|p| p.is_file())
                .map(Path::to_path_buf)
                .ok_or_else(|| {
                    TemplateError::TemplateNotFound(format!("[{}]", DEFAULT_TEMPLATES.join(", ")))
                })?,
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let source = std::fs::read_to_string(&path)?;
        info!(template = %path.display(), "loading template");

        Self::from_str(&source, parameters, Arc::new(FileFragmentLoader::new(base_dir)))
    }

    /// Load a template from source, resolving fragments through `loader`.
    pub fn from_str(
        source: &str,
        parameters: IndexMap<String, String>,
        loader: Arc<dyn FragmentLoader>,
    ) -> Result<Self, TemplateError> {
        let root = TemplateNode::from_yaml_str(source)?;
        let ctx = build_context(&root, parameters, loader)?;
        let resolved_root = resolve(&root, &ctx)?;
        let resolved = normalize::normalize(&resolved_root, &ctx.conditions)?;
        Ok(Self { resolved })
    }

    /// Load a template through the cache collaborator, memoizing the
    /// resolved form across restarts.
    pub async fn from_file_cached(
        path: Option<&str>,
        parameters: IndexMap<String, String>,
        cache: &dyn Cache,
    ) -> Result<Self, TemplateError> {
        let key = cache_key(path, &parameters);

        if let Some(cached) = cache.get(&key).await {
            if let Ok(resolved) = serde_json::from_str::<ResolvedTemplate>(&cached) {
                info!(%key, "resolved template loaded from cache");
                return Ok(Self { resolved });
            }
            cache.invalidate(&key).await;
        }

        let template = Self::from_file(path, parameters)?;
        if let Ok(serialized) = serde_json::to_string(&template.resolved) {
            cache.set(&key, serialized, None).await;
        }
        Ok(template)
    }

    /// Wrap an already resolved template.
    pub fn from_resolved(resolved: ResolvedTemplate) -> Self {
        Self { resolved }
    }

    /// The normalized resource table.
    pub fn resolved(&self) -> &ResolvedTemplate {
        &self.resolved
    }

    /// Serverless function resources, in declaration order.
    pub fn functions(&self) -> impl Iterator<Item = (&String, &ResourceDefinition)> {
        self.resolved.of_type(FUNCTION_TYPE)
    }

    /// API definition resources, in declaration order.
    pub fn apis(&self) -> impl Iterator<Item = (&String, &ResourceDefinition)> {
        self.resolved.of_type(API_TYPE)
    }

    /// The handler reference of a function resource: `CodeUri` joined with
    /// `Handler` by a dot, path separators stripped.
    pub fn handler_reference(&self, logical_id: &str) -> Option<String> {
        let function = self.resolved.get(logical_id)?;
        let handler = function.property_str("Handler")?;
        let code_uri = function.property_str("CodeUri").unwrap_or_default();
        if code_uri.is_empty() {
            Some(handler.to_string())
        } else {
            Some(format!("{code_uri}.{handler}").replace('/', ""))
        }
    }

    /// Environment variables declared on function resources (globals already
    /// merged during normalization); later declarations win.
    pub fn environment(&self) -> IndexMap<String, String> {
        let mut env = IndexMap::new();
        for (_, function) in self.functions() {
            let variables = function
                .property("Environment")
                .and_then(|e| e.get("Variables"))
                .and_then(TemplateNode::as_mapping);
            if let Some(variables) = variables {
                for (key, value) in variables {
                    if let TemplateNode::Scalar(s) = value {
                        env.insert(key.clone(), s.to_display_string());
                    }
                }
            }
        }
        env
    }

    /// The stage name declared on an API resource.
    pub fn stage_name(&self, api_id: &str) -> Option<&str> {
        self.resolved.get(api_id)?.property_str("StageName")
    }
}

/// Build the resolution context from the template's own sections plus
/// external parameter bindings.
fn build_context(
    root: &TemplateNode,
    bindings: IndexMap<String, String>,
    loader: Arc<dyn FragmentLoader>,
) -> Result<ResolutionContext, TemplateError> {
    let mut ctx = ResolutionContext::new(loader);

    if let Some(declared) = root.get("Parameters").and_then(TemplateNode::as_mapping) {
        for (name, declaration) in declared {
            if let Some(TemplateNode::Scalar(default)) = declaration.get("Default") {
                ctx.parameters.insert(name.clone(), default.clone());
            }
        }
    }
    for (name, value) in bindings {
        ctx.parameters.insert(name, Scalar::String(value));
    }

    if let Some(mappings) = root.get("Mappings").and_then(TemplateNode::as_mapping) {
        ctx.mappings = mappings.clone();
    }

    if let Some(resources) = root.get("Resources").and_then(TemplateNode::as_mapping) {
        ctx.logical_ids = resources.keys().cloned().collect();
    }

    // Conditions are evaluated in declaration order; a `Condition` intrinsic
    // may reference any entry evaluated before it.
    if let Some(conditions) = root.get("Conditions").and_then(TemplateNode::as_mapping) {
        for (name, expression) in conditions {
            let value = resolve(expression, &ctx)?;
            let truth = condition_bool(&value).ok_or_else(|| {
                TemplateError::MalformedIntrinsic {
                    name: "Condition".to_string(),
                    reason: format!("condition {name} must resolve to a boolean"),
                }
            })?;
            ctx.conditions.insert(name.clone(), truth);
        }
    }

    Ok(ctx)
}

/// Boolean reading of a resolved condition value.
fn condition_bool(node: &TemplateNode) -> Option<bool> {
    match node {
        TemplateNode::Scalar(Scalar::Bool(b)) => Some(*b),
        TemplateNode::Scalar(Scalar::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn cache_key(path: Option<&str>, parameters: &IndexMap<String, String>) -> String {
    let bindings = parameters
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("template::{}::{bindings}", path.unwrap_or("<default>"))
}

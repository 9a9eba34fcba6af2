//! Intrinsic-function resolution.
//!
//! [`resolve`] walks a template tree depth-first, bottom-up, and replaces
//! every intrinsic node with its value under a [`ResolutionContext`].
//! Children are resolved before their parent intrinsic consumes them, so
//! intrinsics nest arbitrarily (`Fn::Sub` over a `Fn::FindInMap` result).
//!
//! Fragment inclusion (`Fn::Transform`) goes through a [`FragmentLoader`]
//! capability; the include stack is threaded through the recursion so a
//! fragment that transitively includes its own source is reported as a
//! cycle instead of looping.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::template::error::TemplateError;
use crate::template::node::{Scalar, TemplateNode};

/// Capability for resolving an external fragment location into a parsed
/// template tree.
pub trait FragmentLoader: Send + Sync {
    /// Fetch and parse the document at `location`.
    fn load(&self, location: &str) -> Result<TemplateNode, TemplateError>;

    /// Stable identity of a location, used for include-cycle detection.
    fn canonical_key(&self, location: &str) -> String {
        location.to_string()
    }
}

/// Loads fragments from the filesystem, relative to a base directory
/// (normally the directory containing the top-level template).
pub struct FileFragmentLoader {
    base_dir: PathBuf,
}

impl FileFragmentLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn full_path(&self, location: &str) -> PathBuf {
        let path = PathBuf::from(location);
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }
}

impl FragmentLoader for FileFragmentLoader {
    fn load(&self, location: &str) -> Result<TemplateNode, TemplateError> {
        let path = self.full_path(location);
        debug!(location = %path.display(), "loading fragment");
        let source = std::fs::read_to_string(&path).map_err(|source| {
            TemplateError::FragmentIo {
                location: path.clone(),
                source,
            }
        })?;
        TemplateNode::from_yaml_str(&source)
    }

    fn canonical_key(&self, location: &str) -> String {
        let path = self.full_path(location);
        path.canonicalize()
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

/// In-memory fragment source keyed by location string.
///
/// Useful for embedding templates without touching the filesystem, and for
/// tests.
#[derive(Default)]
pub struct MemoryFragmentLoader {
    fragments: HashMap<String, String>,
}

impl MemoryFragmentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fragment source under a location string.
    pub fn with_fragment(mut self, location: impl Into<String>, source: impl Into<String>) -> Self {
        self.fragments.insert(location.into(), source.into());
        self
    }
}

impl FragmentLoader for MemoryFragmentLoader {
    fn load(&self, location: &str) -> Result<TemplateNode, TemplateError> {
        let source = self.fragments.get(location).ok_or_else(|| {
            TemplateError::FragmentIo {
                location: PathBuf::from(location),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "unknown fragment"),
            }
        })?;
        TemplateNode::from_yaml_str(source)
    }
}

/// Everything an intrinsic may consult during one resolution pass.
///
/// The context is immutable for the duration of a pass; fragment inclusion
/// derives a child context layering the operand's parameters over the
/// parent's.
#[derive(Clone)]
pub struct ResolutionContext {
    /// Parameter bindings (externally supplied values layered over declared
    /// defaults).
    pub parameters: IndexMap<String, Scalar>,
    /// The template `Mappings` section: map name -> top key -> second key.
    pub mappings: IndexMap<String, TemplateNode>,
    /// Provider-supplied constants such as `AWS::Region`.
    pub pseudo_parameters: IndexMap<String, String>,
    /// Logical IDs declared under `Resources`.
    pub logical_ids: HashSet<String>,
    /// Evaluated `Conditions` entries.
    pub conditions: IndexMap<String, bool>,
    /// Fragment source for `Fn::Transform`.
    pub fragment_loader: Arc<dyn FragmentLoader>,
}

impl ResolutionContext {
    /// A context with no declarations, backed by the given fragment loader.
    pub fn new(fragment_loader: Arc<dyn FragmentLoader>) -> Self {
        Self {
            parameters: IndexMap::new(),
            mappings: IndexMap::new(),
            pseudo_parameters: default_pseudo_parameters(),
            logical_ids: HashSet::new(),
            conditions: IndexMap::new(),
            fragment_loader,
        }
    }

    /// Child context for an included fragment: the overrides shadow the
    /// parent's parameters, everything else is inherited.
    fn child_with_parameters(&self, overrides: IndexMap<String, Scalar>) -> Self {
        let mut child = self.clone();
        for (name, value) in overrides {
            child.parameters.insert(name, value);
        }
        child
    }
}

/// Pseudo-parameter defaults, derived from the environment where one exists.
pub fn default_pseudo_parameters() -> IndexMap<String, String> {
    let region = std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string());
    let account = std::env::var("AWS_ACCOUNT_ID").unwrap_or_else(|_| "123456789012".to_string());

    IndexMap::from([
        ("AWS::Region".to_string(), region),
        ("AWS::AccountId".to_string(), account),
        ("AWS::Partition".to_string(), "aws".to_string()),
        ("AWS::StackName".to_string(), "local".to_string()),
        ("AWS::URLSuffix".to_string(), "amazonaws.com".to_string()),
    ])
}

/// Resolve every intrinsic reachable from `node`.
///
/// Total over well-formed input; fails with [`TemplateError::UnresolvedReference`]
/// for names absent from the context and [`TemplateError::MalformedIntrinsic`]
/// for operands that do not match an intrinsic's arity or type expectations.
pub fn resolve(node: &TemplateNode, ctx: &ResolutionContext) -> Result<TemplateNode, TemplateError> {
    let mut include_stack = Vec::new();
    resolve_node(node, ctx, &mut include_stack)
}

fn resolve_node(
    node: &TemplateNode,
    ctx: &ResolutionContext,
    include_stack: &mut Vec<String>,
) -> Result<TemplateNode, TemplateError> {
    match node {
        TemplateNode::Scalar(s) => Ok(TemplateNode::Scalar(s.clone())),
        TemplateNode::Sequence(items) => {
            let resolved = items
                .iter()
                .map(|item| resolve_node(item, ctx, include_stack))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TemplateNode::Sequence(resolved))
        }
        TemplateNode::Mapping(entries) => {
            let mut resolved = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                resolved.insert(key.clone(), resolve_node(value, ctx, include_stack)?);
            }
            Ok(TemplateNode::Mapping(resolved))
        }
        TemplateNode::Intrinsic { name, operand } => {
            let operand = resolve_node(operand, ctx, include_stack)?;
            apply_intrinsic(name, operand, ctx, include_stack)
        }
    }
}

fn apply_intrinsic(
    name: &str,
    operand: TemplateNode,
    ctx: &ResolutionContext,
    include_stack: &mut Vec<String>,
) -> Result<TemplateNode, TemplateError> {
    match name {
        "Ref" => resolve_ref(name, operand, ctx),
        "Condition" => resolve_condition(name, operand, ctx),
        "Fn::GetAtt" => resolve_getatt(name, operand),
        "Fn::FindInMap" => resolve_find_in_map(name, operand, ctx),
        "Fn::Sub" => resolve_sub(name, operand, ctx),
        "Fn::Transform" => resolve_transform(name, operand, ctx, include_stack),
        unknown => Err(malformed(unknown, "unsupported intrinsic")),
    }
}

fn resolve_ref(
    name: &str,
    operand: TemplateNode,
    ctx: &ResolutionContext,
) -> Result<TemplateNode, TemplateError> {
    let target = operand
        .as_str()
        .ok_or_else(|| malformed(name, "operand must be a name string"))?;
    lookup_reference(target, ctx)
        .map(TemplateNode::Scalar)
        .ok_or_else(|| TemplateError::UnresolvedReference(target.to_string()))
}

/// Shared `Ref` semantics: parameters, then pseudo-parameters, then declared
/// logical IDs (which resolve to the ID string itself as a stable
/// placeholder).
fn lookup_reference(target: &str, ctx: &ResolutionContext) -> Option<Scalar> {
    if let Some(value) = ctx.parameters.get(target) {
        return Some(value.clone());
    }
    if let Some(value) = ctx.pseudo_parameters.get(target) {
        return Some(Scalar::String(value.clone()));
    }
    if ctx.logical_ids.contains(target) {
        return Some(Scalar::String(target.to_string()));
    }
    None
}

fn resolve_condition(
    name: &str,
    operand: TemplateNode,
    ctx: &ResolutionContext,
) -> Result<TemplateNode, TemplateError> {
    let target = operand
        .as_str()
        .ok_or_else(|| malformed(name, "operand must be a condition name"))?;
    let value = ctx
        .conditions
        .get(target)
        .copied()
        .ok_or_else(|| TemplateError::UndefinedCondition(target.to_string()))?;
    Ok(TemplateNode::Scalar(Scalar::Bool(value)))
}

fn resolve_getatt(name: &str, operand: TemplateNode) -> Result<TemplateNode, TemplateError> {
    let parts = operand
        .as_sequence()
        .ok_or_else(|| malformed(name, "operand must be [logical-id, attribute]"))?;
    if parts.len() < 2 {
        return Err(malformed(name, "operand must name a logical ID and an attribute"));
    }
    let mut rendered = Vec::with_capacity(parts.len());
    for part in parts {
        let s = part
            .as_str()
            .ok_or_else(|| malformed(name, "operand elements must be strings"))?;
        rendered.push(s);
    }
    // No live resource attributes exist offline; the dotted placeholder is
    // the documented degraded value.
    Ok(TemplateNode::Scalar(Scalar::String(rendered.join("."))))
}

fn resolve_find_in_map(
    name: &str,
    operand: TemplateNode,
    ctx: &ResolutionContext,
) -> Result<TemplateNode, TemplateError> {
    let args = operand
        .as_sequence()
        .filter(|args| args.len() == 3)
        .ok_or_else(|| malformed(name, "operand must be [map, top key, second key]"))?;

    let mut keys = Vec::with_capacity(3);
    for arg in args {
        match arg {
            TemplateNode::Scalar(s) => keys.push(s.to_display_string()),
            _ => return Err(malformed(name, "lookup keys must be scalars")),
        }
    }

    let miss = |depth: &str| {
        TemplateError::UnresolvedReference(format!(
            "{}.{}.{} ({depth} not found)",
            keys[0], keys[1], keys[2]
        ))
    };

    let table = ctx.mappings.get(&keys[0]).ok_or_else(|| miss("map"))?;
    let top = table.get(&keys[1]).ok_or_else(|| miss("top-level key"))?;
    let value = top.get(&keys[2]).ok_or_else(|| miss("second-level key"))?;

    // The lookup table holds literal values only.
    if value.contains_intrinsic() {
        return Err(malformed(name, "mapping values must be literal"));
    }
    Ok(value.clone())
}

fn resolve_sub(
    name: &str,
    operand: TemplateNode,
    ctx: &ResolutionContext,
) -> Result<TemplateNode, TemplateError> {
    let (template, locals) = match operand {
        TemplateNode::Scalar(Scalar::String(template)) => (template, IndexMap::new()),
        TemplateNode::Sequence(mut items) if items.len() == 2 => {
            let vars = items.pop().unwrap_or(TemplateNode::Mapping(IndexMap::new()));
            let template = items
                .pop()
                .and_then(|t| t.as_str().map(str::to_string))
                .ok_or_else(|| malformed(name, "first element must be a template string"))?;
            let vars = match vars {
                TemplateNode::Mapping(entries) => entries,
                _ => return Err(malformed(name, "second element must be a variable map")),
            };
            let mut locals = IndexMap::with_capacity(vars.len());
            for (key, value) in vars {
                match value {
                    TemplateNode::Scalar(s) => {
                        locals.insert(key, s);
                    }
                    _ => return Err(malformed(name, "substitution variables must be scalars")),
                }
            }
            (template, locals)
        }
        _ => {
            return Err(malformed(
                name,
                "operand must be a string or [string, variable map]",
            ))
        }
    };

    interpolate(name, &template, &locals, ctx).map(|s| TemplateNode::Scalar(Scalar::String(s)))
}

/// Expand `${name}` placeholders.
///
/// `${!name}` is the literal escape and renders as `${name}`. A dotted
/// placeholder takes the `Fn::GetAtt` placeholder value; anything else is
/// resolved with `Ref` semantics against the local variables, then the
/// context.
fn interpolate(
    name: &str,
    template: &str,
    locals: &IndexMap<String, Scalar>,
    ctx: &ResolutionContext,
) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| malformed(name, "unterminated ${ placeholder"))?;
        let placeholder = &after[..end];

        if let Some(literal) = placeholder.strip_prefix('!') {
            output.push_str("${");
            output.push_str(literal);
            output.push('}');
        } else if let Some(value) = locals.get(placeholder) {
            output.push_str(&value.to_display_string());
        } else if placeholder.contains('.') {
            // Dotted form carries Fn::GetAtt's degraded placeholder value.
            output.push_str(placeholder);
        } else {
            let value = lookup_reference(placeholder, ctx)
                .ok_or_else(|| TemplateError::UnresolvedReference(placeholder.to_string()))?;
            output.push_str(&value.to_display_string());
        }

        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn resolve_transform(
    name: &str,
    operand: TemplateNode,
    ctx: &ResolutionContext,
    include_stack: &mut Vec<String>,
) -> Result<TemplateNode, TemplateError> {
    let parameters = operand
        .get("Parameters")
        .and_then(TemplateNode::as_mapping)
        .ok_or_else(|| malformed(name, "operand must carry a Parameters map"))?;

    let location = parameters
        .get("Location")
        .and_then(TemplateNode::as_str)
        .ok_or_else(|| malformed(name, "Parameters.Location must be a string"))?;

    let mut overrides = IndexMap::new();
    for (key, value) in parameters {
        if key == "Location" {
            continue;
        }
        match value {
            TemplateNode::Scalar(s) => {
                overrides.insert(key.clone(), s.clone());
            }
            _ => return Err(malformed(name, "fragment parameters must be scalars")),
        }
    }

    let key = ctx.fragment_loader.canonical_key(location);
    if include_stack.contains(&key) {
        return Err(TemplateError::CyclicInclude(location.to_string()));
    }

    debug!(%location, depth = include_stack.len(), "including fragment");
    let fragment = ctx.fragment_loader.load(location)?;
    let child = ctx.child_with_parameters(overrides);

    include_stack.push(key);
    let resolved = resolve_node(&fragment, &child, include_stack);
    include_stack.pop();

    resolved
}

fn malformed(name: &str, reason: &str) -> TemplateError {
    TemplateError::MalformedIntrinsic {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

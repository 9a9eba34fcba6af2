//! Error taxonomy for template loading and resolution.
//!
//! Every variant here is startup-fatal: a template that cannot be fully
//! resolved must prevent the gateway from serving traffic.

use std::path::PathBuf;

/// Errors raised while loading, resolving, or normalizing a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template file (or the default `template.yml`/`template.yaml`)
    /// does not exist.
    #[error("template file not found: {0}")]
    TemplateNotFound(String),

    /// The document is not a well-formed template tree.
    #[error("malformed template document: {0}")]
    MalformedDocument(String),

    /// A reference names a parameter, mapping key, or logical ID absent
    /// from the resolution context.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    /// An intrinsic's operand does not match its arity or type expectations,
    /// or the intrinsic name is outside the supported set.
    #[error("malformed intrinsic {name}: {reason}")]
    MalformedIntrinsic { name: String, reason: String },

    /// Fragment inclusion reached a location already on the include stack.
    #[error("cyclic include detected at {0}")]
    CyclicInclude(String),

    /// A resource references a condition name that is not declared.
    #[error("undefined condition: {0}")]
    UndefinedCondition(String),

    /// A fragment location could not be read.
    #[error("failed to read fragment {location}: {source}")]
    FragmentIo {
        location: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Template document tree.
//!
//! A parsed template is a tree of [`TemplateNode`] values: scalars, ordered
//! mappings, sequences, and intrinsic-function nodes. Both encodings of an
//! intrinsic collapse into the same [`TemplateNode::Intrinsic`] variant at
//! load time: the YAML short form (`!Ref Name`, `!Sub "${X}"`) and the long
//! form (a single-key mapping such as `{"Fn::Sub": ...}`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::template::error::TemplateError;

/// Intrinsic names used without the `Fn::` prefix.
const BARE_INTRINSICS: [&str; 2] = ["Ref", "Condition"];

/// A scalar leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    /// Borrow the string content, if this scalar is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render the scalar the way it would appear inside an interpolated
    /// string.
    pub fn to_display_string(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::String(s) => s.clone(),
        }
    }
}

/// A node in the template tree.
///
/// Invariant: after resolution no `Intrinsic` variant remains reachable from
/// the resolved root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateNode {
    Scalar(Scalar),
    Sequence(Vec<TemplateNode>),
    Mapping(IndexMap<String, TemplateNode>),
    Intrinsic {
        name: String,
        operand: Box<TemplateNode>,
    },
}

impl TemplateNode {
    /// Parse a YAML (or JSON) document into a template tree.
    pub fn from_yaml_str(source: &str) -> Result<Self, TemplateError> {
        let value: serde_yaml::Value = serde_yaml::from_str(source)?;
        Self::from_yaml_value(value)
    }

    /// Convert a parsed YAML value, canonicalizing intrinsic encodings.
    pub fn from_yaml_value(value: serde_yaml::Value) -> Result<Self, TemplateError> {
        match value {
            serde_yaml::Value::Null => Ok(TemplateNode::Scalar(Scalar::Null)),
            serde_yaml::Value::Bool(b) => Ok(TemplateNode::Scalar(Scalar::Bool(b))),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(TemplateNode::Scalar(Scalar::Int(i)))
                } else {
                    Ok(TemplateNode::Scalar(Scalar::Float(n.as_f64().unwrap_or(0.0))))
                }
            }
            serde_yaml::Value::String(s) => Ok(TemplateNode::Scalar(Scalar::String(s))),
            serde_yaml::Value::Sequence(seq) => {
                let items = seq
                    .into_iter()
                    .map(Self::from_yaml_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TemplateNode::Sequence(items))
            }
            serde_yaml::Value::Mapping(map) => {
                let mut entries = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    let key = match key {
                        serde_yaml::Value::String(s) => s,
                        other => {
                            return Err(TemplateError::MalformedDocument(format!(
                                "mapping key must be a string, got {other:?}"
                            )))
                        }
                    };
                    entries.insert(key, Self::from_yaml_value(value)?);
                }
                if entries.len() == 1 && entries.keys().all(|k| is_intrinsic_key(k)) {
                    if let Some((name, operand)) = entries.pop() {
                        return Ok(intrinsic(name, operand));
                    }
                }
                Ok(TemplateNode::Mapping(entries))
            }
            serde_yaml::Value::Tagged(tagged) => {
                let name = canonical_intrinsic_name(&tagged.tag.to_string());
                let operand = Self::from_yaml_value(tagged.value)?;
                Ok(intrinsic(name, operand))
            }
        }
    }

    /// Borrow the mapping entries, if this node is a mapping.
    pub fn as_mapping(&self) -> Option<&IndexMap<String, TemplateNode>> {
        match self {
            TemplateNode::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the sequence items, if this node is a sequence.
    pub fn as_sequence(&self) -> Option<&[TemplateNode]> {
        match self {
            TemplateNode::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the string content, if this node is a string scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TemplateNode::Scalar(s) => s.as_str(),
            _ => None,
        }
    }

    /// Look up a key, if this node is a mapping.
    pub fn get(&self, key: &str) -> Option<&TemplateNode> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    /// Whether any intrinsic node remains reachable from this node.
    pub fn contains_intrinsic(&self) -> bool {
        match self {
            TemplateNode::Scalar(_) => false,
            TemplateNode::Sequence(items) => items.iter().any(Self::contains_intrinsic),
            TemplateNode::Mapping(entries) => entries.values().any(Self::contains_intrinsic),
            TemplateNode::Intrinsic { .. } => true,
        }
    }
}

/// Whether a mapping key encodes a long-form intrinsic.
fn is_intrinsic_key(key: &str) -> bool {
    key.starts_with("Fn::") || BARE_INTRINSICS.contains(&key)
}

/// Map a YAML tag (`!Ref`, `!Sub`, `!GetAtt`, ...) to the canonical
/// intrinsic name (`Ref`, `Fn::Sub`, `Fn::GetAtt`, ...).
fn canonical_intrinsic_name(tag: &str) -> String {
    let suffix = tag.trim_start_matches('!');
    if BARE_INTRINSICS.contains(&suffix) || suffix.starts_with("Fn::") {
        suffix.to_string()
    } else {
        format!("Fn::{suffix}")
    }
}

/// Build an intrinsic node, normalizing the `Fn::GetAtt` scalar operand
/// (`"Resource.Arn"` splits on the first dot into `["Resource", "Arn"]`).
fn intrinsic(name: String, operand: TemplateNode) -> TemplateNode {
    let operand = if name == "Fn::GetAtt" {
        match operand {
            TemplateNode::Scalar(Scalar::String(dotted)) => {
                let parts = dotted
                    .splitn(2, '.')
                    .map(|p| TemplateNode::Scalar(Scalar::String(p.to_string())))
                    .collect();
                TemplateNode::Sequence(parts)
            }
            other => other,
        }
    } else {
        operand
    };

    TemplateNode::Intrinsic {
        name,
        operand: Box::new(operand),
    }
}

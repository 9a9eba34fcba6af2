//! Template normalization.
//!
//! Turns a fully resolved template tree into a [`ResolvedTemplate`]: global
//! defaults merged into each resource's properties, conditional resources
//! filtered out, and everything else dropped down to logical ID, type, and
//! properties.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::template::error::TemplateError;
use crate::template::node::TemplateNode;

/// Resource type of a serverless function.
pub const FUNCTION_TYPE: &str = "AWS::Serverless::Function";
/// Resource type of an API definition.
pub const API_TYPE: &str = "AWS::Serverless::Api";

/// `Globals` sections and the resource type each one applies to.
const GLOBAL_SECTIONS: [(&str, &str); 3] = [
    ("Function", FUNCTION_TYPE),
    ("Api", API_TYPE),
    ("HttpApi", "AWS::Serverless::HttpApi"),
];

/// A resource after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub resource_type: String,
    pub properties: IndexMap<String, TemplateNode>,
}

impl ResourceDefinition {
    /// Look up a top-level property.
    pub fn property(&self, key: &str) -> Option<&TemplateNode> {
        self.properties.get(key)
    }

    /// Look up a top-level property's string value.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(TemplateNode::as_str)
    }
}

/// The normalized template: logical ID -> resource definition.
///
/// Built once at startup and never mutated afterwards; serializable so a
/// cache collaborator can memoize it across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTemplate {
    pub resources: IndexMap<String, ResourceDefinition>,
}

impl ResolvedTemplate {
    /// Look up a resource by logical ID.
    pub fn get(&self, logical_id: &str) -> Option<&ResourceDefinition> {
        self.resources.get(logical_id)
    }

    /// Resources of a given type, in declaration order.
    pub fn of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a ResourceDefinition)> {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }
}

/// Normalize a resolved template tree.
///
/// Globals merge shallowly: a resource-local property key always wins over
/// the global default for the same key. Resources whose `Condition`
/// evaluates false are omitted; a reference to an undeclared condition is
/// [`TemplateError::UndefinedCondition`].
pub fn normalize(
    root: &TemplateNode,
    conditions: &IndexMap<String, bool>,
) -> Result<ResolvedTemplate, TemplateError> {
    let resources = root
        .get("Resources")
        .and_then(TemplateNode::as_mapping)
        .ok_or_else(|| {
            TemplateError::MalformedDocument("template has no Resources section".to_string())
        })?;

    let globals = root.get("Globals");

    let mut normalized = IndexMap::with_capacity(resources.len());
    for (logical_id, resource) in resources {
        let resource_type = resource
            .get("Type")
            .and_then(TemplateNode::as_str)
            .ok_or_else(|| {
                TemplateError::MalformedDocument(format!(
                    "resource {logical_id} has no Type"
                ))
            })?;

        if let Some(condition) = resource.get("Condition") {
            let name = condition.as_str().ok_or_else(|| {
                TemplateError::MalformedDocument(format!(
                    "resource {logical_id} Condition must be a name"
                ))
            })?;
            let enabled = conditions
                .get(name)
                .copied()
                .ok_or_else(|| TemplateError::UndefinedCondition(name.to_string()))?;
            if !enabled {
                debug!(%logical_id, condition = %name, "skipping resource, condition is false");
                continue;
            }
        }

        let mut properties = resource
            .get("Properties")
            .and_then(TemplateNode::as_mapping)
            .cloned()
            .unwrap_or_default();

        if let Some(defaults) = global_defaults(globals, resource_type) {
            for (key, value) in defaults {
                if !properties.contains_key(key) {
                    properties.insert(key.clone(), value.clone());
                }
            }
        }

        normalized.insert(
            logical_id.clone(),
            ResourceDefinition {
                resource_type: resource_type.to_string(),
                properties,
            },
        );
    }

    Ok(ResolvedTemplate {
        resources: normalized,
    })
}

fn global_defaults<'a>(
    globals: Option<&'a TemplateNode>,
    resource_type: &str,
) -> Option<&'a IndexMap<String, TemplateNode>> {
    let globals = globals?;
    let section = GLOBAL_SECTIONS
        .iter()
        .find(|(_, t)| *t == resource_type)
        .map(|(section, _)| *section)?;
    globals.get(section).and_then(TemplateNode::as_mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_conditions() -> IndexMap<String, bool> {
        IndexMap::new()
    }

    #[test]
    fn test_globals_merge_with_local_precedence() {
        let root = TemplateNode::from_yaml_str(
            "Globals:\n  Function:\n    Timeout: 30\n    MemorySize: 128\nResources:\n  Fn:\n    Type: AWS::Serverless::Function\n    Properties:\n      Timeout: 5\n      Handler: app.handle\n",
        )
        .unwrap();

        let template = normalize(&root, &no_conditions()).unwrap();
        let function = template.get("Fn").unwrap();

        // Local key wins, missing key is filled from globals.
        assert_eq!(
            function.property("Timeout"),
            Some(&TemplateNode::from_yaml_str("5").unwrap())
        );
        assert_eq!(
            function.property("MemorySize"),
            Some(&TemplateNode::from_yaml_str("128").unwrap())
        );
        assert_eq!(function.property_str("Handler"), Some("app.handle"));
    }

    #[test]
    fn test_globals_do_not_leak_across_types() {
        let root = TemplateNode::from_yaml_str(
            "Globals:\n  Function:\n    Timeout: 30\nResources:\n  Api:\n    Type: AWS::Serverless::Api\n    Properties:\n      StageName: v1\n",
        )
        .unwrap();

        let template = normalize(&root, &no_conditions()).unwrap();
        assert_eq!(template.get("Api").unwrap().property("Timeout"), None);
    }

    #[test]
    fn test_false_condition_omits_resource() {
        let root = TemplateNode::from_yaml_str(
            "Resources:\n  Kept:\n    Type: AWS::Serverless::Function\n    Condition: InStaging\n  Dropped:\n    Type: AWS::Serverless::Function\n    Condition: InProd\n",
        )
        .unwrap();
        let conditions =
            IndexMap::from([("InStaging".to_string(), true), ("InProd".to_string(), false)]);

        let template = normalize(&root, &conditions).unwrap();
        assert!(template.get("Kept").is_some());
        assert!(template.get("Dropped").is_none());
    }

    #[test]
    fn test_undefined_condition_errors() {
        let root = TemplateNode::from_yaml_str(
            "Resources:\n  Fn:\n    Type: AWS::Serverless::Function\n    Condition: Missing\n",
        )
        .unwrap();

        let err = normalize(&root, &no_conditions()).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedCondition(name) if name == "Missing"));
    }

    #[test]
    fn test_resource_without_type_is_rejected() {
        let root = TemplateNode::from_yaml_str("Resources:\n  Fn:\n    Properties: {}\n").unwrap();
        let err = normalize(&root, &no_conditions()).unwrap_err();
        assert!(matches!(err, TemplateError::MalformedDocument(_)));
    }

    #[test]
    fn test_of_type_filters_and_preserves_order() {
        let root = TemplateNode::from_yaml_str(
            "Resources:\n  B:\n    Type: AWS::Serverless::Function\n  Api:\n    Type: AWS::Serverless::Api\n  A:\n    Type: AWS::Serverless::Function\n",
        )
        .unwrap();

        let template = normalize(&root, &no_conditions()).unwrap();
        let ids: Vec<_> = template.of_type(FUNCTION_TYPE).map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["B", "A"]);
    }
}

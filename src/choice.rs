//! Choice-node registry.
//!
//! Advanced choice nodes are specialised per template. Instead of generating node
//! classes at runtime, the registry holds a closed set of [`ChoiceVariant`]s read from
//! template manifests at startup, plus the per-node choice info the frontend pushes
//! before each run.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    Result, RiceError,
    common::MemCache,
    graph::{ADVANCED_CHOICE_NODE, SIMPLE_CHOICE_NODE},
    model::{ElementType, NodeId},
};

const CHOICE_CACHE_SIZE: usize = 4096;

/// Which choice node flavour a node info belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceKind {
    /// Options travel in the workflow's `extra.choice_node_map`.
    Simple,
    /// Options are bound to a template-specific node type.
    Advanced,
}

/// Choice info for one node of the workflow being edited.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChoiceNodeInfo {
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_class_name: Option<String>,
    #[serde(default)]
    pub options_value: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ChoiceNodeInfo {
    pub fn kind(&self) -> Option<ChoiceKind> {
        match self.node_type.as_str() {
            SIMPLE_CHOICE_NODE => Some(ChoiceKind::Simple),
            ADVANCED_CHOICE_NODE => Some(ChoiceKind::Advanced),
            _ => None,
        }
    }

    /// Display metadata shipped with the template element, i.e. everything but the options.
    pub fn addition(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("options_value");
                map
            }
            _ => Map::new(),
        }
    }
}

/// An advanced choice node type discovered from a template manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceVariant {
    /// registered node type name
    pub key: String,
    pub display_name: String,
    pub options: Vec<Value>,
    pub addition: Map<String, Value>,
}

pub struct ChoiceRegistry {
    folder: Option<PathBuf>,
    nodes: MemCache<NodeId, ChoiceNodeInfo>,
    variants: MemCache<String, ChoiceVariant>,
}

impl Default for ChoiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceRegistry {
    /// An empty registry with no manifest folder.
    pub fn new() -> Self {
        Self {
            folder: None,
            nodes: MemCache::new(CHOICE_CACHE_SIZE),
            variants: MemCache::new(CHOICE_CACHE_SIZE),
        }
    }

    /// Loads every `*.json` manifest in `folder`, creating the folder when missing.
    pub fn load<T: AsRef<Path>>(folder: T) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder)?;

        let mut registry = Self::new();
        for entry in fs::read_dir(&folder)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).map_err(RiceError::from).and_then(|s| registry.register_manifest(&s)) {
                Ok(n) => debug!("loaded {} choice variants from {:?}", n, path),
                Err(e) => warn!("skip choice manifest {:?}: {}", path, e),
            }
        }
        registry.folder = Some(folder);
        Ok(registry)
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    /// Registers the advanced choice variants of one manifest, returning how many were found.
    pub fn register_manifest(
        &self,
        manifest: &str,
    ) -> Result<usize> {
        let value: Value = serde_json::from_str(manifest)?;
        let elements = value
            .get("elements")
            .and_then(Value::as_array)
            .ok_or_else(|| RiceError::Validation("'elements' is not a list".to_string()))?;

        let mut count = 0;
        for element in elements {
            if element.get("type").and_then(Value::as_str) != Some(ElementType::Choice.as_ref()) {
                continue;
            }
            let Some(addition) = element.get("addition").and_then(Value::as_object) else {
                continue;
            };
            if addition.get("node_type").and_then(Value::as_str) != Some(ADVANCED_CHOICE_NODE) {
                continue;
            }
            let Some(key) = addition.get("python_class_name").and_then(Value::as_str).filter(|k| !k.is_empty()) else {
                continue;
            };
            let Some(options) = element.get("settings").and_then(|s| s.get("options")).and_then(Value::as_array) else {
                continue;
            };
            let display_name = addition.get("display_name").and_then(Value::as_str).unwrap_or(key).to_string();
            self.variants.set(
                key.to_string(),
                ChoiceVariant {
                    key: key.to_string(),
                    display_name,
                    options: options.clone(),
                    addition: addition.clone(),
                },
            );
            count += 1;
        }
        Ok(count)
    }

    /// Records the choice info pushed by the frontend for the workflow being encrypted.
    pub fn set_node_additional_info(
        &self,
        info: &Value,
    ) -> Result<()> {
        let Some(info) = info.as_object() else {
            return Ok(());
        };
        let template_id = info.get("template_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let Some(node_map) = info.get("choice_node_map").and_then(Value::as_object) else {
            return Ok(());
        };

        for (node_id, node_info) in node_map {
            let node_id: NodeId = node_id.parse().map_err(|_| RiceError::Validation(format!("invalid choice node id '{}'", node_id)))?;
            let mut node_info: ChoiceNodeInfo = serde_json::from_value(node_info.clone())?;
            node_info.template_id = template_id.clone();
            node_info.display_name = node_info.class_name.clone();
            if node_info.kind() == Some(ChoiceKind::Advanced) {
                node_info.python_class_name = Some(advanced_class_name(&template_id, node_id));
            }
            self.nodes.set(node_id, node_info);
        }
        Ok(())
    }

    pub fn node_info(
        &self,
        node_id: NodeId,
    ) -> Option<ChoiceNodeInfo> {
        self.nodes.get(&node_id)
    }

    /// Template-specific node type of an advanced choice node, empty when unknown.
    pub fn choice_classname(
        &self,
        node_id: NodeId,
    ) -> String {
        self.nodes.get(&node_id).and_then(|n| n.python_class_name).unwrap_or_default()
    }

    pub fn choice_value(
        &self,
        node_id: NodeId,
    ) -> Vec<Value> {
        self.nodes.get(&node_id).map(|n| n.options_value).unwrap_or_default()
    }

    pub fn choice_addition(
        &self,
        node_id: NodeId,
    ) -> Map<String, Value> {
        self.nodes.get(&node_id).map(|n| n.addition()).unwrap_or_default()
    }

    pub fn variant(
        &self,
        key: &str,
    ) -> Option<ChoiceVariant> {
        self.variants.get(&key.to_string())
    }

    pub fn variant_options(
        &self,
        key: &str,
    ) -> Vec<Value> {
        self.variant(key).map(|v| v.options).unwrap_or_default()
    }

    /// Every registered variant, sorted by key.
    pub fn variants(&self) -> Vec<ChoiceVariant> {
        let mut variants: Vec<ChoiceVariant> = self.variants.iter().map(|(_, v)| v).collect();
        variants.sort_by(|a, b| a.key.cmp(&b.key));
        variants
    }

    /// Node type names and display names of every registered variant.
    pub fn display_names(&self) -> Vec<String> {
        self.variants().into_iter().flat_map(|v| [v.key, v.display_name]).collect()
    }

    /// Forget the per-run node info. Variants stay registered.
    pub fn clear(&self) {
        self.nodes.clear();
    }

    /// Where the manifest of `template_id` lives in the manifest folder.
    pub fn manifest_path(
        &self,
        template_id: &str,
    ) -> Result<PathBuf> {
        let folder = self.folder.as_ref().ok_or_else(|| RiceError::Config("choice folder is not configured".to_string()))?;
        Ok(folder.join(format!("{}.json", template_id)))
    }
}

/// Node type name registered for an advanced choice node of a template.
pub fn advanced_class_name(
    template_id: &str,
    node_id: NodeId,
) -> String {
    format!("{}_{}_{}", ADVANCED_CHOICE_NODE, template_id, node_id)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_set_node_additional_info() {
        let registry = ChoiceRegistry::new();
        registry
            .set_node_additional_info(&json!({
                "template_id": "T1",
                "choice_node_map": {
                    "7": {"node_type": "RiceRoundAdvancedChoiceNode", "class_name": "Model", "options_value": ["a", "b"]},
                    "8": {"node_type": "RiceRoundSimpleChoiceNode", "class_name": "Style", "options_value": ["x"]}
                }
            }))
            .unwrap();

        assert_eq!(registry.choice_classname(7), "RiceRoundAdvancedChoiceNode_T1_7");
        assert_eq!(registry.choice_classname(8), "");
        assert_eq!(registry.choice_value(7), vec![json!("a"), json!("b")]);

        let addition = registry.choice_addition(7);
        assert!(addition.get("options_value").is_none());
        assert_eq!(addition.get("display_name"), Some(&json!("Model")));
        assert_eq!(addition.get("template_id"), Some(&json!("T1")));

        registry.clear();
        assert!(registry.choice_value(7).is_empty());
    }

    #[test]
    fn test_register_manifest_keeps_only_advanced_choices() {
        let registry = ChoiceRegistry::new();
        let count = registry
            .register_manifest(
                r#"{"template_id": "T1", "elements": [
                    {"id": "0", "type": "choice", "settings": {"options": ["sd15", "sdxl"]},
                     "addition": {"node_type": "RiceRoundAdvancedChoiceNode", "python_class_name": "RiceRoundAdvancedChoiceNode_T1_7", "display_name": "Model"}},
                    {"id": "1", "type": "choice", "settings": {"options": ["x"]}, "addition": {"node_type": "RiceRoundSimpleChoiceNode"}},
                    {"id": "2", "type": "text", "settings": {}}
                ]}"#,
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(registry.variant_options("RiceRoundAdvancedChoiceNode_T1_7"), vec![json!("sd15"), json!("sdxl")]);
        assert_eq!(registry.display_names(), vec!["RiceRoundAdvancedChoiceNode_T1_7".to_string(), "Model".to_string()]);
    }

    #[test]
    fn test_load_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        fs::write(
            dir.path().join("good.json"),
            r#"{"elements": [{"type": "choice", "settings": {"options": [1]}, "addition": {"node_type": "RiceRoundAdvancedChoiceNode", "python_class_name": "K"}}]}"#,
        )
        .unwrap();
        let registry = ChoiceRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.variants().len(), 1);
        assert_eq!(registry.folder(), Some(dir.path()));
    }
}

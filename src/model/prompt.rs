use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, RiceError, model::NodeId};

/// Live execution record ("prompt"): node id (string-encoded integer) to node descriptor.
pub type ExecutionRecord = BTreeMap<String, PromptNode>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptNode {
    #[serde(default)]
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PromptMeta>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A single prompt input: either a literal or a `[source_node_id, source_slot]` reference.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue<'a> {
    Literal(&'a Value),
    Reference(NodeId, i64),
}

impl<'a> InputValue<'a> {
    pub fn classify(value: &'a Value) -> Self {
        if let Some([source, slot]) = value.as_array().map(Vec::as_slice) {
            let source = match source {
                Value::String(s) => s.parse::<NodeId>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            if let (Some(source), Some(slot)) = (source, slot.as_i64()) {
                return InputValue::Reference(source, slot);
            }
        }
        InputValue::Literal(value)
    }
}

impl PromptNode {
    /// Title shown in the authoring tool, if any.
    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.title.as_deref())
    }

    /// All `[source, slot]` references among this node's inputs.
    pub fn references(&self) -> Vec<(NodeId, i64)> {
        self.inputs
            .values()
            .filter_map(|v| match InputValue::classify(v) {
                InputValue::Reference(source, slot) => Some((source, slot)),
                InputValue::Literal(_) => None,
            })
            .collect()
    }

    /// String form of a literal input, mirroring how the host stringifies widget values.
    pub fn input_str(
        &self,
        key: &str,
    ) -> String {
        match self.inputs.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(v) => v.to_string(),
        }
    }
}

pub fn prompt_from_value(value: &Value) -> Result<ExecutionRecord> {
    serde_json::from_value(value.clone()).map_err(|e| RiceError::Validation(format!("invalid prompt: {}", e)))
}

/// Parses the string-encoded node id of a prompt entry.
pub fn parse_node_id(key: &str) -> Result<NodeId> {
    key.parse::<NodeId>().map_err(|_| RiceError::Validation(format!("invalid prompt node id '{}'", key)))
}

/// Checks that every reference pair resolves to a node of the same record.
pub fn validate_references(record: &ExecutionRecord) -> Result<()> {
    for (id, node) in record {
        for (source, _) in node.references() {
            if !record.contains_key(&source.to_string()) {
                return Err(RiceError::Validation(format!(
                    "prompt node {} references missing node {}",
                    id, source
                )));
            }
        }
    }
    Ok(())
}

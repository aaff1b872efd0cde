use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, RiceError, utils::null_default};

/// node id inside a workflow graph
pub type NodeId = i64;
/// link id inside a workflow graph
pub type LinkId = i64;

/// Authoring-tool workflow document.
///
/// Only the fields the pipeline reads or rewrites are typed; everything else
/// (groups, version, config...) round-trips through `rest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub last_node_id: NodeId,
    #[serde(default)]
    pub last_link_id: LinkId,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default, deserialize_with = "null_default")]
    pub inputs: Vec<InputPort>,
    #[serde(default, deserialize_with = "null_default")]
    pub outputs: Vec<OutputPort>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputPort {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub port_type: Value,
    #[serde(default)]
    pub link: Option<LinkId>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputPort {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub port_type: Value,
    #[serde(default)]
    pub links: Option<Vec<LinkId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_index: Option<i64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Workflow link, serialized as the 6-tuple
/// `[link_id, source_node_id, source_slot, target_node_id, target_slot, value_type]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link(pub LinkId, pub NodeId, pub i64, pub NodeId, pub i64, pub Value);

impl Link {
    pub fn new(
        id: LinkId,
        source: NodeId,
        source_slot: i64,
        target: NodeId,
        target_slot: i64,
        value_type: &str,
    ) -> Self {
        Self(id, source, source_slot, target, target_slot, Value::String(value_type.to_string()))
    }

    pub fn id(&self) -> LinkId {
        self.0
    }

    pub fn source(&self) -> NodeId {
        self.1
    }

    pub fn target(&self) -> NodeId {
        self.3
    }

    pub fn value_type(&self) -> &str {
        self.5.as_str().unwrap_or_default()
    }

    pub fn set_value_type(
        &mut self,
        value_type: &str,
    ) {
        self.5 = Value::String(value_type.to_string());
    }
}

impl OutputPort {
    /// Links leaving this output, empty when the port is unconnected.
    pub fn link_ids(&self) -> &[LinkId] {
        self.links.as_deref().unwrap_or_default()
    }

    pub fn type_name(&self) -> &str {
        self.port_type.as_str().unwrap_or_default()
    }
}

impl WorkflowGraph {
    /// Deserializes a workflow after checking its top-level shape.
    pub fn from_value(value: &Value) -> Result<Self> {
        jsonschema::validate(&Self::schema(), value).map_err(|e| RiceError::Validation(format!("invalid workflow: {}", e)))?;
        serde_json::from_value(value.clone()).map_err(|e| RiceError::Validation(format!("invalid workflow: {}", e)))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_value(&value)
    }

    pub fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["nodes", "links"],
            "properties": {
                "last_node_id": { "type": "integer" },
                "last_link_id": { "type": "integer" },
                "nodes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id"],
                        "properties": {
                            "id": { "type": "integer" },
                            "type": { "type": "string" },
                            "inputs": { "type": ["array", "null"] },
                            "outputs": { "type": ["array", "null"] }
                        }
                    }
                },
                "links": {
                    "type": "array",
                    "items": {
                        "type": "array",
                        "minItems": 6,
                        "maxItems": 6
                    }
                },
                "extra": { "type": "object" }
            }
        })
    }

    pub fn node(
        &self,
        id: NodeId,
    ) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn link(
        &self,
        id: LinkId,
    ) -> Option<&Link> {
        self.links.iter().find(|l| l.id() == id)
    }
}

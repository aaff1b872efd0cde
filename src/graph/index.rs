use std::collections::{BTreeMap, HashMap};

use crate::{
    Result, RiceError,
    graph::BoundaryKind,
    model::{ExecutionRecord, LinkId, NodeId, PromptNode, WorkflowGraph, WorkflowNode, parse_node_id},
};

/// The output port a link leaves from.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOwner {
    /// every link sharing the same output
    pub links: Vec<LinkId>,
    pub slot_index: i64,
    pub owner_id: NodeId,
    pub value_type: String,
}

/// Lookup tables over the caller's workflow and execution record.
#[derive(Debug, Default)]
pub struct GraphIndex {
    pub nodes: HashMap<NodeId, WorkflowNode>,
    pub link_owners: HashMap<LinkId, LinkOwner>,
    pub prompt: HashMap<NodeId, PromptNode>,
}

impl GraphIndex {
    pub fn build(
        workflow: &WorkflowGraph,
        prompt: &ExecutionRecord,
    ) -> Result<Self> {
        let mut index = GraphIndex::default();

        for node in &workflow.nodes {
            for output in &node.outputs {
                for link in output.link_ids() {
                    index.link_owners.insert(
                        *link,
                        LinkOwner {
                            links: output.link_ids().to_vec(),
                            slot_index: output.slot_index.unwrap_or(0),
                            owner_id: node.id,
                            value_type: output.type_name().to_string(),
                        },
                    );
                }
            }
            index.nodes.insert(node.id, node.clone());
        }

        for (id, node) in prompt {
            index.prompt.insert(parse_node_id(id)?, node.clone());
        }
        Ok(index)
    }

    pub fn node_kind(
        &self,
        id: NodeId,
    ) -> Option<BoundaryKind> {
        self.nodes.get(&id).and_then(|n| BoundaryKind::from_type(&n.node_type))
    }

    /// Kind of the node owning `link`, when that node is a boundary input.
    pub fn owner_kind(
        &self,
        link: LinkId,
    ) -> Option<BoundaryKind> {
        self.link_owners.get(&link).and_then(|owner| self.node_kind(owner.owner_id))
    }
}

/// A boundary input node and the single link it publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryInput {
    pub node_id: NodeId,
    pub kind: BoundaryKind,
    pub main_link_id: LinkId,
    pub main_link_type: String,
}

/// Boundary inputs of `workflow`, in ascending node id order.
///
/// Only the first link of the first output is kept. A boundary node with no
/// outbound link cannot be wired to the decrypt node and is rejected.
pub fn classify(workflow: &WorkflowGraph) -> Result<Vec<BoundaryInput>> {
    let mut inputs = BTreeMap::new();
    for node in &workflow.nodes {
        let Some(kind) = BoundaryKind::from_type(&node.node_type) else {
            continue;
        };
        let output = node
            .outputs
            .first()
            .ok_or_else(|| RiceError::Validation(format!("the node {} has no output", node.id)))?;
        let main_link_id = *output
            .link_ids()
            .first()
            .ok_or_else(|| RiceError::Validation(format!("the node {} is not connected to any node", node.id)))?;
        let main_link_type = match output.type_name() {
            "" => "STRING",
            t => t,
        };
        inputs.insert(
            node.id,
            BoundaryInput {
                node_id: node.id,
                kind,
                main_link_id,
                main_link_type: main_link_type.to_string(),
            },
        );
    }
    Ok(inputs.into_values().collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::prompt_from_value;

    fn workflow() -> WorkflowGraph {
        WorkflowGraph::from_value(&json!({
            "last_node_id": 30,
            "last_link_id": 3,
            "nodes": [
                {"id": 30, "type": "SaveImage", "inputs": [{"name": "images", "type": "IMAGE", "link": 2}]},
                {"id": 12, "type": "RiceRoundIntNode", "outputs": [{"name": "INT", "type": "INT", "links": [3, 4], "slot_index": 0}]},
                {"id": 10, "type": "RiceRoundInputTextNode", "outputs": [{"name": "STRING", "type": "STRING", "links": [1]}]},
                {"id": 20, "type": "CLIPTextEncode", "outputs": [{"name": "CONDITIONING", "type": "CONDITIONING", "links": [2], "slot_index": 0}]}
            ],
            "links": [[1, 10, 0, 20, 0, "STRING"], [2, 20, 0, 30, 0, "IMAGE"], [3, 12, 0, 20, 1, "INT"], [4, 12, 0, 30, 1, "INT"]]
        }))
        .unwrap()
    }

    #[test]
    fn test_build_link_owner_map() {
        let prompt = prompt_from_value(&json!({"10": {"class_type": "RiceRoundInputTextNode", "inputs": {}}})).unwrap();
        let index = GraphIndex::build(&workflow(), &prompt).unwrap();
        let owner = &index.link_owners[&4];
        assert_eq!(owner.owner_id, 12);
        assert_eq!(owner.links, vec![3, 4]);
        assert_eq!(owner.value_type, "INT");
        assert_eq!(index.owner_kind(1), Some(BoundaryKind::InputText));
        assert_eq!(index.owner_kind(2), None);
        assert!(index.prompt.contains_key(&10));
    }

    #[test]
    fn test_classify_sorted_by_node_id() {
        let inputs = classify(&workflow()).unwrap();
        let ids: Vec<NodeId> = inputs.iter().map(|i| i.node_id).collect();
        assert_eq!(ids, vec![10, 12]);
        assert_eq!(inputs[1].main_link_id, 3);
        assert_eq!(inputs[1].main_link_type, "INT");
    }

    #[test]
    fn test_classify_rejects_unconnected_input() {
        let workflow = WorkflowGraph::from_value(&json!({
            "nodes": [{"id": 1, "type": "RiceRoundFloatNode", "outputs": [{"name": "FLOAT", "type": "FLOAT", "links": null}]}],
            "links": []
        }))
        .unwrap();
        assert!(matches!(classify(&workflow), Err(RiceError::Validation(_))));
    }
}

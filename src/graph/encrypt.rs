//! The encryption pass: workflow + prompt in, publishable bundle out.
//!
//! Every artifact is assembled in memory first; nothing is written unless the
//! whole pass validates.

use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::{
    Result, RiceError,
    choice::ChoiceRegistry,
    graph::{
        ADVANCED_CHOICE_NODE, BoundaryKind, DECRYPT_NODE, ENCRYPT_NODE, OUTPUT_IMAGE_NODE,
        archive::{to_json_bytes, write_archive},
        index::{BoundaryInput, GraphIndex, classify},
        reserved_titles,
        schema::build_template,
        traversal::related_nodes,
    },
    model::{
        ExecutionRecord, InputPort, Link, NodeId, OutputPort, Template, WorkflowGraph, WorkflowNode, parse_node_id, prompt_from_value,
        validate_references,
    },
    utils::is_truthy,
};

const DECRYPT_SEED: i64 = 735127949069071;

/// All documents produced by one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedBundle {
    pub template_id: String,
    pub project_name: String,
    pub workflow: WorkflowGraph,
    pub job: ExecutionRecord,
    pub template: Template,
    pub original_workflow: Value,
    pub original_prompt: Value,
}

impl EncryptedBundle {
    /// `output_dir/<project_name>/<template_id>`
    pub fn project_folder(
        &self,
        output_dir: &Path,
    ) -> PathBuf {
        output_dir.join(&self.project_name).join(&self.template_id)
    }

    /// Writes the documents and the archive, returning the publish folder.
    ///
    /// Everything is staged next to the project folder and moved in place once
    /// complete; a failed write leaves no files behind.
    pub fn write(
        &self,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let project_folder = self.project_folder(output_dir);
        let staging = project_folder.with_file_name(format!(".{}.partial", self.template_id));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let result = self.write_into(&staging).and_then(|()| -> Result<()> {
            if project_folder.is_dir() {
                fs::remove_dir_all(&project_folder)?;
            }
            fs::rename(&staging, &project_folder)?;
            Ok(())
        });
        if let Err(e) = result {
            if staging.exists() {
                if let Err(clean) = fs::remove_dir_all(&staging) {
                    warn!("failed to remove staged files {:?}: {}", staging, clean);
                }
            }
            return Err(e);
        }

        let publish_folder = project_folder.join("publish");
        info!("encrypted template {} into {:?}", self.template_id, publish_folder);
        Ok(publish_folder)
    }

    fn write_into(
        &self,
        project_folder: &Path,
    ) -> Result<()> {
        let output_folder = project_folder.join("output");
        let publish_folder = project_folder.join("publish");
        fs::create_dir_all(&output_folder)?;
        fs::create_dir_all(&publish_folder)?;

        let job = to_json_bytes(&self.job)?;
        let template = to_json_bytes(&self.template)?;
        let workflow = to_json_bytes(&self.workflow)?;
        let original_workflow = to_json_bytes(&self.original_workflow)?;
        let original_prompt = to_json_bytes(&self.original_prompt)?;

        fs::write(output_folder.join(format!("{}_workflow.json", self.template_id)), &workflow)?;
        fs::write(output_folder.join(format!("{}_template.json", self.template_id)), &template)?;
        fs::write(output_folder.join(format!("{}_job.json", self.template_id)), &job)?;
        fs::write(output_folder.join("original_workflow.json"), &original_workflow)?;
        fs::write(output_folder.join("original_prompt.json"), &original_prompt)?;

        write_archive(
            &publish_folder.join(format!("{}.bin", self.template_id)),
            &self.template_id,
            &[job.as_slice(), template.as_slice(), workflow.as_slice(), original_workflow.as_slice(), original_prompt.as_slice()],
        )?;
        fs::write(publish_folder.join("template.json"), &template)?;
        fs::write(project_folder.join("workflow.json"), &workflow)?;
        Ok(())
    }
}

/// A single encryption pass. Consumed by [`Encrypt::assemble`] or [`Encrypt::do_encrypt`].
pub struct Encrypt {
    workflow: Value,
    prompt: Value,
    project_name: String,
    template_id: String,
    registry: Arc<ChoiceRegistry>,
}

impl Encrypt {
    pub fn new(
        workflow: Value,
        prompt: Value,
        project_name: &str,
        template_id: &str,
        registry: Arc<ChoiceRegistry>,
    ) -> Self {
        Self {
            workflow,
            prompt,
            project_name: project_name.to_string(),
            template_id: template_id.to_string(),
            registry,
        }
    }

    /// Runs the pass and writes everything below `output_dir`, returning the publish folder.
    pub fn do_encrypt(
        self,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let registry = self.registry.clone();
        let bundle = self.assemble()?;
        let publish_folder = bundle.write(output_dir)?;
        registry.clear();
        Ok(publish_folder)
    }

    /// Runs the pass without touching the file system.
    pub fn assemble(self) -> Result<EncryptedBundle> {
        if self.template_id.is_empty() {
            return Err(RiceError::Validation("template id is empty".to_string()));
        }
        let original = WorkflowGraph::from_value(&self.workflow)?;
        let prompt = prompt_from_value(&self.prompt)?;
        let index = GraphIndex::build(&original, &prompt)?;
        let inputs = classify(&original)?;
        let input_ids: Vec<NodeId> = inputs.iter().map(|i| i.node_id).collect();
        let related = related_nodes(&original.links, &input_ids, |id| index.nodes.contains_key(&id));
        debug!("template {}: inputs {:?}, related {:?}", self.template_id, input_ids, related);

        let workflow = self.assemble_workflow(&original, &index, &inputs, &related)?;

        let reserved = reserved_titles(self.registry.display_names());
        let template = build_template(&self.template_id, &inputs, |id| index.prompt.get(&id).cloned(), &self.registry, &reserved)?;

        let job = assemble_job(&prompt, &inputs, &related)?;
        if let Err(e) = validate_references(&job) {
            warn!("job record of template {}: {}", self.template_id, e);
        }

        Ok(EncryptedBundle {
            template_id: self.template_id,
            project_name: self.project_name,
            workflow,
            job,
            template,
            original_workflow: self.workflow,
            original_prompt: self.prompt,
        })
    }

    fn assemble_workflow(
        &self,
        original: &WorkflowGraph,
        index: &GraphIndex,
        inputs: &[BoundaryInput],
        related: &BTreeSet<NodeId>,
    ) -> Result<WorkflowGraph> {
        let mut workflow = original.clone();
        workflow.nodes.retain(|n| related.contains(&n.id));
        check_circular(&workflow, index)?;

        let decrypt_id = next_node_id(original)?;
        add_decrypt_node(&mut workflow, decrypt_id, inputs, &self.template_id);
        remove_redundant_links(&mut workflow, inputs);
        remove_unrelated_links(&mut workflow, related, decrypt_id);
        replace_choice_template(&mut workflow, inputs, &self.registry);
        replace_boundary_nodes(&mut workflow)?;
        Ok(workflow)
    }
}

/// A retained node fed by a boundary input means the author routed a boundary through another.
fn check_circular(
    workflow: &WorkflowGraph,
    index: &GraphIndex,
) -> Result<()> {
    for node in &workflow.nodes {
        for link in node.inputs.iter().filter_map(|i| i.link) {
            if index.owner_kind(link).is_some() {
                return Err(RiceError::Validation(format!(
                    "the node {} may have circular references, generation failed",
                    node.id
                )));
            }
        }
    }
    Ok(())
}

/// First id above both `last_node_id` and every node actually present.
fn next_node_id(workflow: &WorkflowGraph) -> Result<NodeId> {
    let highest = workflow.nodes.iter().map(|n| n.id).fold(workflow.last_node_id, NodeId::max);
    highest
        .checked_add(1)
        .ok_or_else(|| RiceError::Validation(format!("no node id left above {}", highest)))
}

fn add_decrypt_node(
    workflow: &mut WorkflowGraph,
    decrypt_id: NodeId,
    inputs: &[BoundaryInput],
    template_id: &str,
) {
    let mut node = WorkflowNode {
        id: decrypt_id,
        node_type: DECRYPT_NODE.to_string(),
        outputs: vec![OutputPort {
            name: "IMAGE".to_string(),
            port_type: json!("IMAGE"),
            links: Some(vec![]),
            slot_index: Some(0),
            rest: object(json!({"label": "IMAGE"})),
        }],
        properties: object(json!({"Node name for S&R": DECRYPT_NODE})),
        rest: object(json!({
            "pos": [420, 0],
            "size": [500, 150],
            "flags": {},
            "mode": 0,
            "order": 20,
            "widgets_values": [template_id, DECRYPT_SEED, "randomize"],
        })),
        ..Default::default()
    };

    for (idx, input) in inputs.iter().enumerate() {
        let name = match idx {
            0 => format!("input_anything ({})", input.node_id),
            _ => format!("input_anything{} ({})", idx, input.node_id),
        };
        let mut rest = object(json!({"label": name}));
        if idx == 0 {
            rest.insert("shape".to_string(), json!(7));
        }
        node.inputs.push(InputPort {
            name,
            port_type: json!("*"),
            link: Some(input.main_link_id),
            rest,
        });

        let value_type = match input.main_link_type.as_str() {
            t @ ("IMAGE" | "STRING") => t,
            _ => "STRING",
        };
        workflow.links.push(Link::new(input.main_link_id, input.node_id, 0, decrypt_id, idx as i64, value_type));
    }

    workflow.nodes.push(node);
    workflow.last_node_id = decrypt_id;
}

/// Boundary nodes keep only their main link.
fn remove_redundant_links(
    workflow: &mut WorkflowGraph,
    inputs: &[BoundaryInput],
) {
    let mut dropped = HashSet::new();
    for node in workflow.nodes.iter_mut() {
        let Some(input) = inputs.iter().find(|i| i.node_id == node.id) else {
            continue;
        };
        for output in node.outputs.iter() {
            dropped.extend(output.link_ids().iter().copied().filter(|l| *l != input.main_link_id));
        }
        if let Some(output) = node.outputs.first_mut() {
            output.links = Some(vec![input.main_link_id]);
        }
    }
    workflow.links.retain(|l| !dropped.contains(&l.id()));
}

/// Drops links leaving the retained set, then the port references to them.
fn remove_unrelated_links(
    workflow: &mut WorkflowGraph,
    related: &BTreeSet<NodeId>,
    decrypt_id: NodeId,
) {
    let keep = |id: NodeId| id == decrypt_id || related.contains(&id);
    workflow.links.retain(|l| keep(l.source()) && keep(l.target()));

    let live: HashSet<_> = workflow.links.iter().map(Link::id).collect();
    for node in workflow.nodes.iter_mut() {
        for input in node.inputs.iter_mut() {
            if input.link.is_some_and(|l| !live.contains(&l)) {
                input.link = None;
            }
        }
        for output in node.outputs.iter_mut() {
            if let Some(links) = output.links.as_mut() {
                links.retain(|l| live.contains(l));
            }
        }
    }
}

fn replace_choice_template(
    workflow: &mut WorkflowGraph,
    inputs: &[BoundaryInput],
    registry: &ChoiceRegistry,
) {
    for node in workflow.nodes.iter_mut().filter(|n| n.node_type == ADVANCED_CHOICE_NODE) {
        match registry.choice_classname(node.id) {
            classname if !classname.is_empty() => node.node_type = classname,
            _ => warn!("the node {} is not a valid choice node", node.id),
        }
    }

    let choice_node_map: Map<String, Value> = inputs
        .iter()
        .filter(|i| i.kind == BoundaryKind::SimpleChoice)
        .map(|i| (i.node_id.to_string(), Value::Array(registry.choice_value(i.node_id))))
        .collect();
    workflow.extra.insert("choice_node_map".to_string(), Value::Object(choice_node_map));
}

/// Relabels boundary nodes to their published counterparts, all emitting STRING.
fn replace_boundary_nodes(workflow: &mut WorkflowGraph) -> Result<()> {
    let mut replaced = HashSet::new();
    for node in workflow.nodes.iter_mut() {
        let Some(replacement) = BoundaryKind::from_type(&node.node_type).and_then(|k| k.workflow_replacement()) else {
            continue;
        };
        let mut output = node
            .outputs
            .first()
            .cloned()
            .ok_or_else(|| RiceError::Validation(format!("node {} missing outputs", node.id)))?;
        output.port_type = json!("STRING");

        node.node_type = replacement.node_type.to_string();
        node.outputs = vec![output];
        node.properties = object(json!({"Node name for S&R": replacement.name}));
        node.rest.insert("name".to_string(), json!(replacement.name));
        replaced.insert(node.id);
    }

    for link in workflow.links.iter_mut().filter(|l| replaced.contains(&l.source())) {
        link.set_value_type("STRING");
    }
    Ok(())
}

/// The record the backend runs: upstream-only nodes and decrypt nodes removed,
/// the encrypt node turned into the task output, boundary nodes turned into their
/// string-fed counterparts.
fn assemble_job(
    prompt: &ExecutionRecord,
    inputs: &[BoundaryInput],
    related: &BTreeSet<NodeId>,
) -> Result<ExecutionRecord> {
    let input_ids: HashSet<NodeId> = inputs.iter().map(|i| i.node_id).collect();
    let mut job = ExecutionRecord::new();

    for (id, node) in prompt {
        let node_id = parse_node_id(id)?;
        if (related.contains(&node_id) && !input_ids.contains(&node_id)) || node.class_type == DECRYPT_NODE {
            continue;
        }

        let mut node = node.clone();
        node.rest.remove("is_changed");
        if node.class_type == ENCRYPT_NODE {
            node.class_type = OUTPUT_IMAGE_NODE.to_string();
            node.inputs.insert("task_id".to_string(), json!(""));
            node.inputs.remove("project_name");
            if let Some(title) = node.meta.as_mut().and_then(|m| m.title.as_mut()) {
                *title = OUTPUT_IMAGE_NODE.to_string();
            }
        }

        let replacement = BoundaryKind::from_type(&node.class_type).and_then(|k| k.prompt_replacement());
        if let Some(replacement) = replacement.filter(|_| !node.inputs.is_empty()) {
            let label = node.inputs.get("name").filter(|v| is_truthy(v)).cloned();
            node.class_type = replacement.class_type.to_string();
            node.inputs = Map::new();
            node.inputs.insert(replacement.field.to_string(), json!(""));
            if let Some(label) = label {
                node.inputs.insert("name".to_string(), label);
            }
        }
        job.insert(id.clone(), node);
    }
    Ok(job)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use zip::ZipArchive;

    use super::*;

    fn text_pipeline() -> (Value, Value) {
        let workflow = json!({
            "last_node_id": 30,
            "last_link_id": 2,
            "nodes": [
                {"id": 10, "type": "RiceRoundInputTextNode", "outputs": [{"name": "STRING", "type": "STRING", "links": [1], "slot_index": 0}]},
                {"id": 20, "type": "CLIPTextEncode", "inputs": [{"name": "text", "type": "STRING", "link": 1}],
                 "outputs": [{"name": "CONDITIONING", "type": "CONDITIONING", "links": [2], "slot_index": 0}]},
                {"id": 30, "type": "RiceRoundEncryptNode", "inputs": [{"name": "images", "type": "IMAGE", "link": 2}]}
            ],
            "links": [[1, 10, 0, 20, 0, "STRING"], [2, 20, 0, 30, 0, "CONDITIONING"]],
            "version": 0.4
        });
        let prompt = json!({
            "10": {"class_type": "RiceRoundInputTextNode", "inputs": {"text_info": "a cat", "name": ""}},
            "20": {"class_type": "CLIPTextEncode", "inputs": {"text": ["10", 0]}},
            "30": {"class_type": "RiceRoundEncryptNode", "inputs": {"images": ["20", 0], "project_name": "demo", "template_id": "T1"},
                   "_meta": {"title": "Encrypt"}, "is_changed": ["x"]}
        });
        (workflow, prompt)
    }

    fn assemble(
        workflow: Value,
        prompt: Value,
        registry: Arc<ChoiceRegistry>,
    ) -> Result<EncryptedBundle> {
        Encrypt::new(workflow, prompt, "demo", "T1", registry).assemble()
    }

    fn node_ids(workflow: &WorkflowGraph) -> Vec<NodeId> {
        workflow.nodes.iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_single_text_input() {
        let (workflow, prompt) = text_pipeline();
        let bundle = assemble(workflow, prompt, Arc::new(ChoiceRegistry::new())).unwrap();

        assert_eq!(node_ids(&bundle.workflow), vec![10, 31]);
        assert_eq!(bundle.workflow.last_node_id, 31);
        assert_eq!(bundle.workflow.links, vec![Link::new(1, 10, 0, 31, 0, "STRING")]);
        assert_eq!(bundle.workflow.rest.get("version"), Some(&json!(0.4)));
        assert_eq!(bundle.workflow.extra["choice_node_map"], json!({}));

        let decrypt = bundle.workflow.node(31).unwrap();
        assert_eq!(decrypt.node_type, DECRYPT_NODE);
        assert_eq!(decrypt.inputs[0].name, "input_anything (10)");
        assert_eq!(decrypt.inputs[0].link, Some(1));
        assert_eq!(decrypt.inputs[0].rest["shape"], json!(7));
        assert_eq!(decrypt.rest["widgets_values"], json!(["T1", 735127949069071_i64, "randomize"]));

        let keys: Vec<&str> = bundle.job.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["10", "20", "30"]);
        let output = &bundle.job["30"];
        assert_eq!(output.class_type, OUTPUT_IMAGE_NODE);
        assert_eq!(output.inputs["task_id"], json!(""));
        assert!(!output.inputs.contains_key("project_name"));
        assert_eq!(output.title(), Some(OUTPUT_IMAGE_NODE));
        assert!(!output.rest.contains_key("is_changed"));

        assert_eq!(bundle.template.elements.len(), 1);
        let element = &bundle.template.elements[0];
        assert_eq!(element.element_type, crate::model::ElementType::Text);
        assert_eq!(element.node_id, "10");
        assert_eq!(element.describe, "提示词");
    }

    #[test]
    fn test_decrypt_id_skips_existing_nodes() {
        for last_node_id in [None, Some(0), Some(12)] {
            let (mut workflow, prompt) = text_pipeline();
            match last_node_id {
                Some(id) => workflow["last_node_id"] = json!(id),
                None => {
                    workflow.as_object_mut().unwrap().remove("last_node_id");
                }
            }
            let bundle = assemble(workflow, prompt, Arc::new(ChoiceRegistry::new())).unwrap();
            assert_eq!(node_ids(&bundle.workflow), vec![10, 31]);
            assert_eq!(bundle.workflow.last_node_id, 31);
            assert_eq!(bundle.workflow.links, vec![Link::new(1, 10, 0, 31, 0, "STRING")]);
        }

        let (mut workflow, prompt) = text_pipeline();
        workflow["last_node_id"] = json!(i64::MAX);
        let err = assemble(workflow, prompt, Arc::new(ChoiceRegistry::new())).unwrap_err();
        assert!(matches!(err, RiceError::Validation(_)));
    }

    #[test]
    fn test_redundant_links_are_dropped() {
        let workflow = json!({
            "last_node_id": 21,
            "last_link_id": 3,
            "nodes": [
                {"id": 10, "type": "RiceRoundInputTextNode", "outputs": [{"name": "STRING", "type": "STRING", "links": [1, 3]}]},
                {"id": 20, "type": "CLIPTextEncode", "inputs": [{"name": "text", "type": "STRING", "link": 1}]},
                {"id": 21, "type": "CLIPTextEncode", "inputs": [{"name": "text", "type": "STRING", "link": 3}]}
            ],
            "links": [[1, 10, 0, 20, 0, "STRING"], [3, 10, 0, 21, 0, "STRING"]]
        });
        let prompt = json!({
            "10": {"class_type": "RiceRoundInputTextNode", "inputs": {}},
            "20": {"class_type": "CLIPTextEncode", "inputs": {"text": ["10", 0]}},
            "21": {"class_type": "CLIPTextEncode", "inputs": {"text": ["10", 0]}}
        });
        let bundle = assemble(workflow, prompt, Arc::new(ChoiceRegistry::new())).unwrap();

        let input = bundle.workflow.node(10).unwrap();
        assert_eq!(input.outputs[0].link_ids(), &[1]);
        assert!(bundle.workflow.link(3).is_none());
        assert_eq!(bundle.workflow.links.len(), 1);
    }

    #[test]
    fn test_boundary_through_boundary_is_rejected() {
        let workflow = json!({
            "last_node_id": 6,
            "last_link_id": 3,
            "nodes": [
                {"id": 3, "type": "RiceRoundInputTextNode", "outputs": [{"name": "STRING", "type": "STRING", "links": [1]}]},
                {"id": 4, "type": "TextToImage", "inputs": [{"name": "text", "type": "STRING", "link": 1}], "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [2]}]},
                {"id": 5, "type": "RiceRoundImageBridgeNode", "inputs": [{"name": "image", "type": "IMAGE", "link": 2}], "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [3]}]},
                {"id": 6, "type": "SaveImage", "inputs": [{"name": "images", "type": "IMAGE", "link": 3}]}
            ],
            "links": [[1, 3, 0, 4, 0, "STRING"], [2, 4, 0, 5, 0, "IMAGE"], [3, 5, 0, 6, 0, "IMAGE"]]
        });
        let prompt = json!({
            "3": {"class_type": "RiceRoundInputTextNode", "inputs": {}},
            "4": {"class_type": "TextToImage", "inputs": {"text": ["3", 0]}},
            "5": {"class_type": "RiceRoundImageBridgeNode", "inputs": {"image": ["4", 0]}},
            "6": {"class_type": "SaveImage", "inputs": {"images": ["5", 0]}}
        });

        let dir = tempfile::tempdir().unwrap();
        let err = Encrypt::new(workflow, prompt, "demo", "T1", Arc::new(ChoiceRegistry::new()))
            .do_encrypt(dir.path())
            .unwrap_err();
        assert!(matches!(err, RiceError::Validation(msg) if msg.contains("node 4")));
        assert!(!dir.path().join("demo").exists());
    }

    fn bridge_pipeline() -> (Value, Value) {
        let workflow = json!({
            "last_node_id": 7,
            "last_link_id": 5,
            "nodes": [
                {"id": 4, "type": "LoadImage", "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [1, 5], "slot_index": 0}]},
                {"id": 5, "type": "RiceRoundImageBridgeNode", "inputs": [{"name": "image", "type": "IMAGE", "link": 1}],
                 "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [2], "slot_index": 0}]},
                {"id": 6, "type": "Blend", "inputs": [{"name": "a", "type": "IMAGE", "link": 2}, {"name": "b", "type": "INT", "link": 3}, {"name": "c", "type": "IMAGE", "link": 5}]},
                {"id": 7, "type": "RiceRoundIntNode", "outputs": [{"name": "INT", "type": "INT", "links": [3]}]}
            ],
            "links": [[1, 4, 0, 5, 0, "IMAGE"], [2, 5, 0, 6, 0, "IMAGE"], [3, 7, 0, 6, 1, "INT"], [5, 4, 0, 6, 2, "IMAGE"]]
        });
        let prompt = json!({
            "4": {"class_type": "LoadImage", "inputs": {"image": "cat.png"}},
            "5": {"class_type": "RiceRoundImageBridgeNode", "inputs": {"image": ["4", 0], "name": "Photo"}},
            "6": {"class_type": "Blend", "inputs": {"a": ["5", 0], "b": ["7", 0], "c": ["4", 0]}},
            "7": {"class_type": "RiceRoundIntNode", "inputs": {"number": 20, "max": 50, "name": "Steps"}}
        });
        (workflow, prompt)
    }

    #[test]
    fn test_upstream_nodes_and_relabeling() {
        let (workflow, prompt) = bridge_pipeline();
        let bundle = assemble(workflow, prompt, Arc::new(ChoiceRegistry::new())).unwrap();

        assert_eq!(node_ids(&bundle.workflow), vec![4, 5, 7, 8]);
        assert_eq!(
            bundle.workflow.links,
            vec![Link::new(1, 4, 0, 5, 0, "IMAGE"), Link::new(2, 5, 0, 8, 0, "STRING"), Link::new(3, 7, 0, 8, 1, "STRING")]
        );
        // the direct link 4 -> 6 left with node 6
        assert_eq!(bundle.workflow.node(4).unwrap().outputs[0].link_ids(), &[1]);

        let bridge = bundle.workflow.node(5).unwrap();
        assert_eq!(bridge.node_type, "RiceRoundOutputImageBridgeNode");
        assert_eq!(bridge.outputs[0].type_name(), "STRING");
        assert_eq!(bridge.rest["name"], json!("RiceRoundOutputImageBridgeNode"));
        assert_eq!(bridge.properties["Node name for S&R"], json!("RiceRoundOutputImageBridgeNode"));
        assert_eq!(bundle.workflow.node(7).unwrap().node_type, "RiceRoundOutputIntNode");

        let keys: Vec<&str> = bundle.job.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["5", "6", "7"]);
        assert_eq!(bundle.job["5"].class_type, "RiceRoundDownloadImageNode");
        assert_eq!(bundle.job["5"].inputs, object(json!({"image_url": "", "name": "Photo"})));
        assert_eq!(bundle.job["7"].class_type, "RiceRoundStrToIntNode");
        assert_eq!(bundle.job["7"].inputs, object(json!({"str": "", "name": "Steps"})));

        let elements = &bundle.template.elements;
        assert_eq!(elements.len(), 2);
        assert_eq!((elements[0].id.as_str(), elements[0].node_id.as_str(), elements[0].describe.as_str()), ("0", "5", "Photo"));
        assert_eq!(elements[1].element_type, crate::model::ElementType::NumberInt);
        assert_eq!(elements[1].settings["number"], json!(20));
        assert_eq!(elements[1].settings["max"], json!(50));
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let (workflow, prompt) = bridge_pipeline();
        let registry = Arc::new(ChoiceRegistry::new());
        let first = assemble(workflow.clone(), prompt.clone(), registry.clone()).unwrap();
        let second = assemble(workflow, prompt, registry).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_choice_nodes() {
        let workflow = json!({
            "last_node_id": 9,
            "last_link_id": 2,
            "nodes": [
                {"id": 2, "type": "RiceRoundAdvancedChoiceNode", "outputs": [{"name": "value", "type": "STRING", "links": [1]}]},
                {"id": 3, "type": "RiceRoundSimpleChoiceNode", "outputs": [{"name": "value", "type": "COMBO", "links": [2]}]},
                {"id": 9, "type": "CheckpointLoader", "inputs": [{"name": "ckpt", "type": "STRING", "link": 1}, {"name": "vae", "type": "COMBO", "link": 2}]}
            ],
            "links": [[1, 2, 0, 9, 0, "STRING"], [2, 3, 0, 9, 1, "COMBO"]]
        });
        let prompt = json!({
            "2": {"class_type": "RiceRoundAdvancedChoiceNode", "inputs": {"default": "sdxl", "name": "Model"}},
            "3": {"class_type": "RiceRoundSimpleChoiceNode", "inputs": {"default": "y"}},
            "9": {"class_type": "CheckpointLoader", "inputs": {"ckpt": ["2", 0], "vae": ["3", 0]}}
        });
        let registry = Arc::new(ChoiceRegistry::new());
        registry
            .set_node_additional_info(&json!({
                "template_id": "T1",
                "choice_node_map": {
                    "2": {"node_type": "RiceRoundAdvancedChoiceNode", "class_name": "Model", "options_value": ["sd15", "sdxl"]},
                    "3": {"node_type": "RiceRoundSimpleChoiceNode", "class_name": "Vae", "options_value": ["x", "y"]}
                }
            }))
            .unwrap();
        let bundle = assemble(workflow, prompt, registry).unwrap();

        assert_eq!(bundle.workflow.node(2).unwrap().node_type, "RiceRoundAdvancedChoiceNode_T1_2");
        assert_eq!(bundle.workflow.extra["choice_node_map"], json!({"3": ["x", "y"]}));
        // COMBO crosses the boundary as STRING
        assert_eq!(bundle.workflow.link(2).unwrap().value_type(), "STRING");

        let choice = &bundle.template.elements[0];
        assert_eq!(choice.settings["options"], json!(["sd15", "sdxl"]));
        assert_eq!(choice.settings["default"], json!("sdxl"));
        assert_eq!(choice.addition.as_ref().unwrap()["python_class_name"], json!("RiceRoundAdvancedChoiceNode_T1_2"));
    }

    #[test]
    fn test_do_encrypt_writes_bundle() {
        let (workflow, prompt) = text_pipeline();
        let registry = Arc::new(ChoiceRegistry::new());
        registry
            .set_node_additional_info(&json!({"template_id": "T1", "choice_node_map": {"1": {"node_type": "RiceRoundSimpleChoiceNode"}}}))
            .unwrap();
        let dir = tempfile::tempdir().unwrap();

        let publish = Encrypt::new(workflow, prompt, "demo", "T1", registry.clone()).do_encrypt(dir.path()).unwrap();
        let project = dir.path().join("demo").join("T1");
        assert_eq!(publish, project.join("publish"));
        assert!(project.join("workflow.json").exists());
        assert!(publish.join("template.json").exists());
        for name in ["T1_workflow.json", "T1_template.json", "T1_job.json", "original_workflow.json", "original_prompt.json"] {
            assert!(project.join("output").join(name).exists(), "{}", name);
        }

        let template = Template::from_json(&fs::read_to_string(publish.join("template.json")).unwrap()).unwrap();
        assert_eq!(template.template_id, "T1");

        let mut archive = ZipArchive::new(File::open(publish.join("T1.bin")).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names.len(), 5);
        let mut job = String::new();
        std::io::Read::read_to_string(&mut archive.by_name_decrypt("0.bin", b"T1").unwrap(), &mut job).unwrap();
        assert!(job.contains(OUTPUT_IMAGE_NODE));

        assert!(registry.node_info(1).is_none());
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let (workflow, prompt) = text_pipeline();
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("demo");
        fs::create_dir_all(&project).unwrap();
        // a plain file where the template folder has to go
        fs::write(project.join("T1"), b"occupied").unwrap();

        let result = Encrypt::new(workflow, prompt, "demo", "T1", Arc::new(ChoiceRegistry::new())).do_encrypt(dir.path());
        assert!(result.is_err());
        let left: Vec<_> = fs::read_dir(&project).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(left, vec![std::ffi::OsString::from("T1")]);
        assert_eq!(fs::read(project.join("T1")).unwrap(), b"occupied");
    }

    #[test]
    fn test_rewrite_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("demo").join("T1").join("output").join("stale.json");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"{}").unwrap();

        let (workflow, prompt) = text_pipeline();
        let publish = Encrypt::new(workflow, prompt, "demo", "T1", Arc::new(ChoiceRegistry::new())).do_encrypt(dir.path()).unwrap();
        assert!(publish.join("T1.bin").exists());
        assert!(!stale.exists());
    }
}

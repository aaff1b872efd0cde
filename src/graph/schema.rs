//! Template schema building.

use std::collections::HashSet;

use serde_json::{Map, Value, json};

use crate::{
    Result, RiceError,
    choice::ChoiceRegistry,
    graph::{BoundaryKind, index::BoundaryInput},
    model::{Element, ElementType, PromptNode, Template},
};

/// One element per boundary input, `id` being its slot on the decrypt node.
pub fn build_template<F>(
    template_id: &str,
    inputs: &[BoundaryInput],
    prompt_node: F,
    registry: &ChoiceRegistry,
    reserved: &HashSet<String>,
) -> Result<Template>
where
    F: Fn(i64) -> Option<PromptNode>,
{
    let mut elements = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.iter().enumerate() {
        let node = prompt_node(input.node_id)
            .ok_or_else(|| RiceError::Validation(format!("the node {} is missing from the prompt", input.node_id)))?;
        let mut element = element_for(&input.kind, &node, input.node_id, registry);
        element.id = idx.to_string();

        let label = match node.input_str("name") {
            name if !name.is_empty() => name,
            _ => node.title().unwrap_or_default().to_string(),
        };
        if !label.is_empty() && !reserved.contains(&label) {
            element.describe = label;
        }
        elements.push(element);
    }

    Ok(Template {
        template_id: template_id.to_string(),
        elements,
    })
}

fn element_for(
    kind: &BoundaryKind,
    node: &PromptNode,
    node_id: i64,
    registry: &ChoiceRegistry,
) -> Element {
    let input = |key: &str, default: Value| node.inputs.get(key).filter(|v| !v.is_null()).cloned().unwrap_or(default);
    let element_type = kind.element_type();

    let mut addition = None;
    let (describe, settings) = match element_type {
        ElementType::ImageUpload => ("请上传图片", json!({"accept": "image/*", "max_size": 500000, "tip": "请上传不超过500KB的图片"})),
        ElementType::MaskImageUpload => (
            "请上传图片并编辑蒙版",
            json!({"accept": "image/*", "max_size": 500000, "tip": "请上传不超过500KB的图片", "mask": true}),
        ),
        ElementType::MaskUpload => ("请上传蒙版", json!({"accept": "image/*", "max_size": 50000, "tip": "请上传不超过50KB的图片"})),
        ElementType::Text => ("提示词", json!({"placeholder": "请描述图片内容", "multiline": true})),
        ElementType::Choice => {
            addition = Some(registry.choice_addition(node_id));
            ("模型选择", json!({"options": registry.choice_value(node_id), "default": input("default", json!(""))}))
        }
        ElementType::NumberInt => ("数值", json!({"min": input("min", json!(0)), "max": input("max", json!(1000)), "number": input("number", json!(0))})),
        ElementType::NumberFloat => (
            "数值",
            json!({"min": input("min", json!(0.0)), "max": input("max", json!(1000.0)), "number": input("number", json!(0.0))}),
        ),
        ElementType::Switch => ("开关", json!({"default": input("value", json!(false))})),
    };

    Element {
        id: String::new(),
        element_type,
        describe: describe.to_string(),
        node_id: node_id.to_string(),
        settings: match settings {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        addition,
    }
}

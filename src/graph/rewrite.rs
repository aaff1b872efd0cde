//! Runtime prompt rewrite for packaged templates.

use std::{str::FromStr, sync::Arc};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    Result, RiceError,
    choice::ChoiceRegistry,
    client::{AuthStore, Notifier, ToastLevel},
    graph::{DECRYPT_NODE, ENCRYPT_NODE, OUTPUT_IMAGE_NODE, RANDOM_SEED_NODE},
    model::{ElementType, ExecutionRecord},
};

const MAX_SEED: u32 = 999_999;

/// An incoming run request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: ExecutionRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub input: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl PromptRequest {
    fn has_rice_component(&self) -> bool {
        self.prompt.values().any(|n| n.class_type == ENCRYPT_NODE || n.class_type == DECRYPT_NODE)
    }
}

fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        v => v.to_string(),
    }
}

/// `(element id, node id, element type)` as declared by a template document.
fn template_targets(template: &Value) -> Vec<(String, String, String)> {
    template
        .get("elements")
        .and_then(Value::as_array)
        .map(|elements| {
            elements
                .iter()
                .map(|e| {
                    let field = |key: &str| e.get(key).map(value_string).unwrap_or_default();
                    (field("id"), field("node_id"), field("type"))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Substitutes end-user inputs into a packaged execution record before it runs.
pub struct PromptRewriter {
    auth: Arc<AuthStore>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<ChoiceRegistry>,
}

impl PromptRewriter {
    pub fn new(
        auth: Arc<AuthStore>,
        notifier: Arc<dyn Notifier>,
        registry: Arc<ChoiceRegistry>,
    ) -> Self {
        Self { auth, notifier, registry }
    }

    pub async fn rewrite(
        &self,
        mut request: PromptRequest,
    ) -> Result<PromptRequest> {
        self.registry.clear();

        if request.has_rice_component() {
            if let Err(err) = self.auth.user_token().await {
                match &err {
                    RiceError::Auth { code, .. } if code.needs_login() => {
                        self.auth.login_dialog("RiceRound云节点，请先完成登录");
                        request.prompt.clear();
                    }
                    RiceError::Auth { message, .. } => self.notifier.toast(ToastLevel::Error, &format!("无法完成鉴权登录，{}", message)),
                    _ => self.notifier.toast(ToastLevel::Error, &format!("无法完成鉴权登录，{}", err)),
                }
                return Ok(request);
            }
        }

        if request.client_id.is_none() {
            return Ok(request);
        }
        let Some(task_uuid) = request.task_uuid.clone() else {
            return Ok(request);
        };
        let template = request
            .template
            .as_ref()
            .ok_or_else(|| RiceError::Validation("Warning: 'template' is missing.".to_string()))?;
        let targets = template_targets(template);

        let mut rng = rand::thread_rng();
        for node in request.prompt.values_mut() {
            if node.class_type == OUTPUT_IMAGE_NODE {
                node.inputs.insert("task_id".to_string(), Value::String(task_uuid.clone()));
            } else if node.class_type == RANDOM_SEED_NODE {
                node.inputs.insert("seed".to_string(), Value::from(rng.gen_range(0..=MAX_SEED)));
            }
        }

        for (input_id, value) in &request.input {
            let Some((_, node_id, element_type)) = targets.iter().find(|(id, ..)| id == input_id) else {
                warn!("input {} has no template element, skipped", input_id);
                continue;
            };
            let Ok(element_type) = ElementType::from_str(element_type) else {
                warn!("unknown input type '{}' for input {}, skipped", element_type, input_id);
                continue;
            };
            let node = request
                .prompt
                .get_mut(node_id)
                .ok_or_else(|| RiceError::Validation(format!("template node {} is not in the prompt", node_id)))?;
            node.inputs.insert(element_type.prompt_field().to_string(), Value::String(value_string(value)));
        }
        debug!("prompt rewritten for task {}", task_uuid);
        Ok(request)
    }
}

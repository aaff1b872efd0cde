use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Result;

/// Server to client: progress of a task.
pub const COMMAND_TASK_PROGRESS: i64 = 5004;
/// Client to server: cancel a task.
pub const COMMAND_CANCEL_TASK: i64 = 4002;

/// Envelope of every task channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMessage {
    #[serde(rename = "CommandType")]
    pub command_type: i64,
    #[serde(rename = "Message", default)]
    pub message: Value,
}

impl PackageMessage {
    pub fn cancel_task(task_uuid: &str) -> Self {
        Self {
            command_type: COMMAND_CANCEL_TASK,
            message: json!({ "task_uuid": task_uuid }),
        }
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    task::TaskState,
    utils::{is_truthy, null_default},
};

/// Progress text the server uses to announce a fresh preview image.
pub const PREVIEW_REFRESHED: &str = "preview_refreshed";

/// One remote task as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskInfo {
    #[serde(deserialize_with = "null_default")]
    pub task_uuid: String,
    #[serde(deserialize_with = "null_default")]
    pub state: TaskState,
    #[serde(deserialize_with = "null_default")]
    pub progress: i64,
    #[serde(deserialize_with = "null_default")]
    pub progress_text: String,
    #[serde(deserialize_with = "null_default")]
    pub thumbnail: String,
    #[serde(deserialize_with = "null_default")]
    pub prompt: String,
    #[serde(deserialize_with = "null_default")]
    pub create_time: String,
    #[serde(deserialize_with = "null_default")]
    pub update_time: String,
    #[serde(deserialize_with = "null_default")]
    pub template_id: String,
    #[serde(deserialize_with = "null_default")]
    pub template_description: String,
    #[serde(deserialize_with = "null_default")]
    pub template_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    #[serde(skip)]
    pub preview_refreshed: bool,
}

/// Payload of a task progress message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressEvent {
    #[serde(deserialize_with = "null_default")]
    pub task_uuid: String,
    #[serde(deserialize_with = "null_default")]
    pub state: TaskState,
    #[serde(deserialize_with = "null_default")]
    pub progress: i64,
    #[serde(deserialize_with = "null_default")]
    pub progress_text: String,
    pub result_data: Option<Value>,
}

/// What the progress callback sees after an accepted update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub task_uuid: String,
    pub progress_text: String,
    pub progress: i64,
    pub preview_refreshed: bool,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressReport) + Send + Sync>;

impl TaskInfo {
    pub fn new(task_uuid: &str) -> Self {
        Self {
            task_uuid: task_uuid.to_string(),
            ..Default::default()
        }
    }

    /// Applies `event` under the monotonic rules, returning whether it was accepted.
    ///
    /// A stale state is dropped outright; a state at or above the current rank is
    /// recorded even if the rest of the event is then rejected. Progress only grows,
    /// except that the first failed or cancelled event lands with a default text.
    pub fn update_progress(
        &mut self,
        event: &ProgressEvent,
    ) -> bool {
        if event.task_uuid != self.task_uuid || event.state < self.state {
            return false;
        }
        let newly_stopped = event.state != self.state && matches!(event.state, TaskState::Failed | TaskState::Cancelled);
        self.state = event.state;

        if event.progress == 0 && event.progress_text == PREVIEW_REFRESHED {
            self.preview_refreshed = true;
        } else {
            self.preview_refreshed = false;
            if event.progress > self.progress {
                self.progress = event.progress;
                self.progress_text = event.progress_text.clone();
            } else if newly_stopped {
                self.progress_text = if event.progress_text.is_empty() {
                    match event.state {
                        TaskState::Failed => "task failed".to_string(),
                        _ => "task cancelled".to_string(),
                    }
                } else {
                    event.progress_text.clone()
                };
            } else {
                return false;
            }
        }

        match &event.result_data {
            Some(data) if is_truthy(data) => self.result_data = Some(data.clone()),
            _ if self.state == TaskState::InProgress => self.result_data = None,
            _ => {}
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            task_uuid: self.task_uuid.clone(),
            progress_text: self.progress_text.clone(),
            progress: self.progress,
            preview_refreshed: self.preview_refreshed,
        }
    }

    /// `result_data.image_results` as strings.
    pub fn image_results(&self) -> Vec<String> {
        self.result_data
            .as_ref()
            .and_then(|d| d.get("image_results"))
            .and_then(Value::as_array)
            .map(|urls| urls.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for TaskInfo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task {}: {} ({}%) - {}", self.task_uuid, self.state, self.progress, self.progress_text)
    }
}

/// Shared, lock-guarded [`TaskInfo`]. Every read and write goes through the lock.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle(Arc<Mutex<TaskInfo>>);

impl TaskHandle {
    pub fn new(info: TaskInfo) -> Self {
        Self(Arc::new(Mutex::new(info)))
    }

    fn lock(&self) -> MutexGuard<'_, TaskInfo> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `event`; the report of an accepted update is built before the lock is released.
    pub fn update_progress(
        &self,
        event: &ProgressEvent,
    ) -> Option<ProgressReport> {
        let mut info = self.lock();
        info.update_progress(event).then(|| info.report())
    }

    pub fn with<R>(
        &self,
        f: impl FnOnce(&TaskInfo) -> R,
    ) -> R {
        f(&self.lock())
    }

    pub fn snapshot(&self) -> TaskInfo {
        self.lock().clone()
    }

    pub fn task_uuid(&self) -> String {
        self.lock().task_uuid.clone()
    }

    pub fn is_done(&self) -> bool {
        self.lock().is_done()
    }
}

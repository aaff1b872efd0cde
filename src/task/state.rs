use serde::{Deserialize, Serialize};

use crate::RiceError;

/// Remote task lifecycle, totally ordered by rank.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(try_from = "u8", into = "u8")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    Created = 0,
    Pending = 1,
    InProgress = 2,
    Finished = 3,
    Failed = 4,
    Cancelled = 5,
}

impl TaskState {
    /// Finished, failed and cancelled tasks never change again.
    pub fn is_terminal(&self) -> bool {
        *self >= TaskState::Finished
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for TaskState {
    type Error = RiceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TaskState::Created),
            1 => Ok(TaskState::Pending),
            2 => Ok(TaskState::InProgress),
            3 => Ok(TaskState::Finished),
            4 => Ok(TaskState::Failed),
            5 => Ok(TaskState::Cancelled),
            _ => Err(RiceError::Convert(format!("invalid task state {}", value))),
        }
    }
}

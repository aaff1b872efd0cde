//! Remote Task State Machine.

mod info;
mod inputs;
mod message;
mod socket;
mod state;

pub use info::{PREVIEW_REFRESHED, ProgressCallback, ProgressEvent, ProgressReport, TaskHandle, TaskInfo};
pub use inputs::collect_inputs;
pub use message::{COMMAND_TASK_PROGRESS, PackageMessage};
pub use socket::{TaskExit, TaskSocket, TaskSocketOptions};
pub use state::TaskState;

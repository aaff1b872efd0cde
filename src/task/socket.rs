//! WebSocket tracking of one remote task.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::Interrupt,
    task::{COMMAND_TASK_PROGRESS, PackageMessage, ProgressCallback, ProgressEvent, TaskHandle},
};

/// Timing knobs of the tracking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSocketOptions {
    /// How often the monitor checks for interruption and silence.
    pub poll_interval: Duration,
    /// Subtracted from the overall timeout to get the silence limit.
    pub message_margin: Duration,
    /// Upper bound of the silence limit.
    pub message_timeout_cap: Duration,
}

impl Default for TaskSocketOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            message_margin: Duration::from_secs(3),
            message_timeout_cap: Duration::from_secs(600),
        }
    }
}

impl TaskSocketOptions {
    /// Longest tolerated gap between progress messages for a run bounded by `timeout`.
    pub fn message_timeout(
        &self,
        timeout: Duration,
    ) -> Duration {
        timeout.saturating_sub(self.message_margin).min(self.message_timeout_cap)
    }
}

/// Why [`TaskSocket::run`] returned. Only `Done` says anything about the task itself;
/// the caller inspects the [`TaskHandle`] in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TaskExit {
    /// The task reached a terminal state.
    Done,
    /// The server closed the channel, or reading from it failed.
    Closed,
    /// No progress message within the message timeout.
    Idle,
    /// The overall timeout elapsed.
    TimedOut,
    /// The host interrupted the run, or the cancel token fired.
    Interrupted,
    ConnectFailed,
}

pub struct TaskSocket {
    url: String,
    token: String,
    machine_id: String,
    options: TaskSocketOptions,
    cancel: CancellationToken,
}

impl TaskSocket {
    pub fn new(
        ws_url: &str,
        token: &str,
        machine_id: &str,
    ) -> Self {
        Self {
            url: ws_url.to_string(),
            token: token.to_string(),
            machine_id: machine_id.to_string(),
            options: TaskSocketOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(
        mut self,
        options: TaskSocketOptions,
    ) -> Self {
        self.options = options;
        self
    }

    /// Cancelling this token stops a running [`TaskSocket::run`] like a host interrupt.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn connect_url(&self) -> String {
        format!("{}?machine_id={}&token={}", self.url, self.machine_id, self.token)
    }

    /// Follows `task` until it is done, the channel closes, it goes silent, `timeout`
    /// elapses or the run is interrupted. Connection faults are logged, never returned.
    pub async fn run(
        &self,
        task: &TaskHandle,
        callback: Option<ProgressCallback>,
        interrupt: Arc<dyn Interrupt>,
        timeout: Duration,
    ) -> TaskExit {
        let task_uuid = task.task_uuid();
        let deadline = tokio::time::Instant::now() + timeout;
        let (stream, _) = match tokio::time::timeout_at(deadline, connect_async(self.connect_url())).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                error!("task channel connection error: {}", e);
                return TaskExit::ConnectFailed;
            }
            Err(_) => {
                warn!("task channel for {} not connected within {:?}", task_uuid, timeout);
                return TaskExit::TimedOut;
            }
        };
        info!("task channel connected for {}", task_uuid);
        let (mut sink, mut stream) = stream.split();

        let message_timeout = self.options.message_timeout(timeout);
        let last_progress = Mutex::new(Instant::now());

        let receive = async {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if self.on_message(&text, task, callback.as_ref(), &last_progress) {
                            info!("task {} is done", task_uuid);
                            return TaskExit::Done;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("task channel closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("error while listening to task messages: {}", e);
                        break;
                    }
                }
            }
            TaskExit::Closed
        };

        let monitor = async {
            loop {
                tokio::time::sleep(self.options.poll_interval).await;
                if interrupt.interrupted() {
                    info!("processing interrupted while tracking task {}", task_uuid);
                    return TaskExit::Interrupted;
                }
                let silent = last_progress.lock().unwrap_or_else(PoisonError::into_inner).elapsed();
                if silent > message_timeout {
                    warn!("no task progress received within {:?}, disconnecting", message_timeout);
                    return TaskExit::Idle;
                }
            }
        };

        let exit = tokio::select! {
            exit = receive => exit,
            exit = monitor => exit,
            _ = self.cancel.cancelled() => TaskExit::Interrupted,
            _ = tokio::time::sleep_until(deadline) => {
                warn!("task {} not done within {:?}", task_uuid, timeout);
                TaskExit::TimedOut
            }
        };

        if exit == TaskExit::Interrupted {
            match PackageMessage::cancel_task(&task_uuid).to_json() {
                Ok(json) => {
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        warn!("failed to send cancel notification: {}", e);
                    }
                }
                Err(e) => warn!("failed to encode cancel notification: {}", e),
            }
        }
        if let Err(e) = sink.close().await {
            debug!("task channel close: {}", e);
        }
        exit
    }

    /// Handles one text frame and reports whether the task is done.
    fn on_message(
        &self,
        text: &str,
        task: &TaskHandle,
        callback: Option<&ProgressCallback>,
        last_progress: &Mutex<Instant>,
    ) -> bool {
        let package = match PackageMessage::from_json(text) {
            Ok(package) => package,
            Err(e) => {
                warn!("message unpacking error: {}", e);
                return false;
            }
        };
        if package.command_type != COMMAND_TASK_PROGRESS {
            warn!("unknown message type: {}", package.command_type);
            return false;
        }

        *last_progress.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        match serde_json::from_value::<ProgressEvent>(package.message) {
            Ok(event) => {
                if let Some(report) = task.update_progress(&event) {
                    debug!("task progress updated: {}", task.snapshot());
                    if let Some(callback) = callback {
                        callback(&report);
                    }
                }
            }
            Err(e) => warn!("invalid task progress payload: {}", e),
        }
        task.is_done()
    }
}

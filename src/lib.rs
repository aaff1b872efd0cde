//! # RiceRound
//!
//! RiceRound turns a node-graph workflow into a redistributable remote template
//! and runs those templates as remote tasks.
//!
//! ## Core Features
//!
//! - **Graph Encryption Pipeline**: prune a workflow to its boundary inputs, collapse them
//!   into a single decrypt node and pack everything into an AES-encrypted archive
//! - **Remote Task Tracking**: follow a remote task over a WebSocket channel with a
//!   monotonic progress state machine, idle timeout and cooperative cancellation
//! - **Prompt Rewrite**: substitute end-user inputs back into a packaged execution record
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use riceround::EngineBuilder;
//!
//! let engine = EngineBuilder::new().build()?;
//!
//! // Package a workflow
//! let publish_folder = engine.encrypt(&workflow, &prompt, "my_project", "0f3a...", None)?;
//!
//! // Run the packaged template remotely
//! let images = engine.execute_remote("0f3a...", &decrypt_inputs, Some(progress), interrupt)?;
//! ```

mod builder;
mod choice;
mod client;
mod common;
mod config;
mod engine;
mod error;
mod graph;
mod model;
mod task;
mod utils;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use choice::{ChoiceKind, ChoiceNodeInfo, ChoiceRegistry, ChoiceVariant};
pub use client::{
    AuthStore, INSUFFICIENT_BALANCE_CODE, Interrupt, LogNotifier, NeverInterrupted, Notifier, Publisher, ToastLevel, UrlConfig, WorkflowApi,
};
pub use config::{Config, ServerConfig, Settings};
pub use engine::Engine;
pub use error::{AuthCode, RiceError};
pub use graph::{BoundaryKind, Encrypt, EncryptedBundle, PromptRequest, PromptRewriter};
pub use model::*;
pub use task::{
    PREVIEW_REFRESHED, PackageMessage, ProgressCallback, ProgressEvent, ProgressReport, TaskExit, TaskHandle, TaskInfo, TaskSocket, TaskSocketOptions,
    TaskState, collect_inputs,
};
pub use utils::{machine_id, normalize_machine_id};

/// Result type alias for RiceRound operations.
pub type Result<T> = std::result::Result<T, RiceError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;

//! Engine - the main entry point for RiceRound.
//!
//! The engine owns the collaborators both pipelines need and exposes them
//! as a blocking facade:
//! - Encrypting a workflow into a template and publishing it
//! - Creating remote tasks and following them to completion
//! - Rewriting packaged prompts before they run

use std::{
    collections::BTreeMap,
    fs,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard},
    time::Duration,
};

use serde_json::{Map, Value, json};
use tokio::{
    runtime::{Handle, Runtime},
    task::block_in_place,
};
use tracing::{error, info};

use crate::{
    Config, Result, RiceError, Settings, ShareLock,
    choice::ChoiceRegistry,
    client::{AuthStore, Interrupt, Notifier, Publisher, ToastLevel, UrlConfig, WorkflowApi},
    graph::{Encrypt, PromptRequest, PromptRewriter},
    task::{ProgressCallback, TaskExit, TaskHandle, TaskInfo, TaskSocket, TaskSocketOptions, TaskState, collect_inputs},
    utils,
};

/// Folder below the settings dir holding downloaded template manifests.
const TEMPLATE_FOLDER: &str = "templates";
const PREVIEW_FILE: &str = "preview.png";
/// Images one remote task may return.
const MAX_RESULT_IMAGES: usize = 5;
const AUTH_FAILED_TOAST: &str = "无法完成鉴权登录，请检查网络或完成登录步骤";

/// The RiceRound engine.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().config(Config::create("riceround.toml")?).build()?;
///
/// let publish_folder = engine.encrypt(&workflow, &prompt, "portrait", "0f3a...", None)?;
/// let images = engine.execute_remote("0f3a...", &kwargs, None, Arc::new(NeverInterrupted))?;
/// ```
pub struct Engine {
    config: ShareLock<Config>,
    machine_id: String,
    urls: UrlConfig,
    notifier: Arc<dyn Notifier>,
    registry: Arc<ChoiceRegistry>,
    auth: Arc<AuthStore>,
    api: Arc<WorkflowApi>,
    publisher: Publisher,
    rewriter: PromptRewriter,
    socket_options: TaskSocketOptions,
    /// Tokio runtime the blocking facade drives.
    runtime: Arc<Runtime>,
}

impl Engine {
    /// Wires the collaborators for `config`: reads or creates the machine id and
    /// loads the template manifests from the settings folder.
    pub(crate) fn new(
        config: Config,
        runtime: Arc<Runtime>,
        notifier: Arc<dyn Notifier>,
        socket_options: TaskSocketOptions,
    ) -> Result<Self> {
        let settings_dir = config.settings_dir();
        let machine_id = utils::machine_id(&settings_dir)?;
        let urls = UrlConfig::new(&config.server);
        let registry = Arc::new(ChoiceRegistry::load(settings_dir.join(TEMPLATE_FOLDER))?);
        let auth = Arc::new(AuthStore::new(&settings_dir, &machine_id, urls.clone(), notifier.clone()));
        let api = Arc::new(WorkflowApi::new(urls.clone(), auth.clone(), notifier.clone()));
        let publisher = Publisher::new(api.clone(), notifier.clone());
        let rewriter = PromptRewriter::new(auth.clone(), notifier.clone(), registry.clone());
        info!("engine ready, machine {}", machine_id);

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            machine_id,
            urls,
            notifier,
            registry,
            auth,
            api,
            publisher,
            rewriter,
            socket_options,
            runtime,
        })
    }

    fn block_on<F: Future>(
        &self,
        fut: F,
    ) -> F::Output {
        if Handle::try_current().is_ok() {
            block_in_place(|| self.runtime.block_on(fut))
        } else {
            self.runtime.block_on(fut)
        }
    }

    fn config(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_settings(
        &self,
        f: impl FnOnce(&mut Settings),
    ) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut config.settings);
    }

    pub fn runtime(&self) -> Arc<Runtime> {
        self.runtime.clone()
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn auth(&self) -> Arc<AuthStore> {
        self.auth.clone()
    }

    pub fn registry(&self) -> Arc<ChoiceRegistry> {
        self.registry.clone()
    }

    pub fn settings(&self) -> Settings {
        self.config().settings.clone()
    }

    pub fn set_auto_publish(
        &self,
        value: bool,
    ) {
        self.update_settings(|s| s.auto_publish = value);
    }

    pub fn set_auto_overwrite(
        &self,
        value: bool,
    ) {
        self.update_settings(|s| s.auto_overwrite = value);
    }

    pub fn set_run_client(
        &self,
        value: bool,
    ) {
        self.update_settings(|s| s.run_client = value);
    }

    /// Seconds a remote task may run. Reads below ten seconds are raised to ten.
    pub fn set_wait_time(
        &self,
        seconds: u64,
    ) {
        self.update_settings(|s| s.wait_time = seconds);
    }

    pub fn save_config<T: AsRef<Path>>(
        &self,
        path: T,
    ) -> Result<()> {
        self.config().save(path)
    }

    /// Encrypts `workflow` into `output_dir/<project>/<template_id>` and returns its publish folder.
    ///
    /// With `auto_publish` the template is published right away; a failed
    /// login only notifies the user, the folder is still returned.
    pub fn encrypt(
        &self,
        workflow: &Value,
        prompt: &Value,
        project_name: &str,
        template_id: &str,
        preview_png: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let output_dir = self.config().output_dir.clone();
        let publish_folder =
            Encrypt::new(workflow.clone(), prompt.clone(), project_name, template_id, self.registry.clone()).do_encrypt(&output_dir)?;
        if let Some(png) = preview_png {
            fs::write(publish_folder.join(PREVIEW_FILE), png)?;
        }

        if self.settings().auto_publish {
            match self.block_on(self.auth.user_token()) {
                Ok(token) => {
                    if let Err(e) = self.publish_folder(&token, template_id, project_name, &publish_folder) {
                        error!("failed to publish template {}: {}", template_id, e);
                        self.notifier.toast(ToastLevel::Error, &format!("上传失败: {}", e));
                    }
                }
                Err(e) => self.auth.report(&e, "安装节点需要先完成登录", AUTH_FAILED_TOAST),
            }
        }
        Ok(publish_folder)
    }

    /// Publishes an already encrypted template. `Ok(false)` when the server declined it.
    pub fn publish(
        &self,
        template_id: &str,
        project_name: &str,
    ) -> Result<bool> {
        let token = self.block_on(self.auth.user_token())?;
        let publish_folder = self.config().output_dir.join(project_name).join(template_id).join("publish");
        self.publish_folder(&token, template_id, project_name, &publish_folder)
    }

    fn publish_folder(
        &self,
        token: &str,
        template_id: &str,
        project_name: &str,
        publish_folder: &Path,
    ) -> Result<bool> {
        let auto_overwrite = self.settings().auto_overwrite;
        self.block_on(self.publisher.publish(
            token,
            template_id,
            project_name,
            &publish_folder.join(PREVIEW_FILE),
            &publish_folder.join(format!("{}.bin", template_id)),
            auto_overwrite,
        ))
    }

    pub fn create_task(
        &self,
        token: &str,
        inputs: &BTreeMap<String, String>,
        template_id: &str,
    ) -> Result<TaskInfo> {
        self.block_on(self.api.create_task(token, inputs, template_id))
    }

    /// Follows `task` over the task channel; the outcome is left in `task`.
    pub fn run_task(
        &self,
        token: &str,
        task: &TaskHandle,
        callback: Option<ProgressCallback>,
        interrupt: Arc<dyn Interrupt>,
        timeout: Duration,
    ) -> TaskExit {
        let socket = TaskSocket::new(&self.urls.task_ws_url(), token, &self.machine_id).with_options(self.socket_options);
        self.block_on(socket.run(task, callback, interrupt, timeout))
    }

    /// Runs `template_id` remotely with the decrypt node inputs in `kwargs`
    /// and returns the result image urls.
    pub fn execute_remote(
        &self,
        template_id: &str,
        kwargs: &Map<String, Value>,
        callback: Option<ProgressCallback>,
        interrupt: Arc<dyn Interrupt>,
    ) -> Result<Vec<String>> {
        let token = match self.block_on(self.auth.user_token()) {
            Ok(token) => token,
            Err(e) => {
                self.auth.report(&e, "运行云节点需要先完成登录", AUTH_FAILED_TOAST);
                return Err(e);
            }
        };
        let inputs = collect_inputs(kwargs)?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let task = TaskHandle::new(self.create_task(&token, &inputs, template_id)?);
        let wait_time = self.settings().wait_time();
        if self.run_task(&token, &task, callback, interrupt, wait_time) == TaskExit::Interrupted {
            return Err(RiceError::TaskFailed("interrupted".to_string()));
        }

        let info = task.snapshot();
        if info.result_data.is_none() {
            if info.state > TaskState::Finished && !info.progress_text.is_empty() {
                return Err(RiceError::TaskFailed(info.progress_text));
            }
            return Err(RiceError::TaskFailed("websocket failed".to_string()));
        }
        let images = info.image_results();
        if images.is_empty() {
            return Err(RiceError::TaskFailed("Failed to get image results".to_string()));
        }
        Ok(images)
    }

    /// Latest preview image of a running task.
    pub fn preview(
        &self,
        task_uuid: &str,
    ) -> Result<Vec<u8>> {
        let token = self.block_on(self.auth.user_token())?;
        self.block_on(self.api.preview(&token, task_uuid))
    }

    /// Uploads a local image as the signed-in user and returns its url.
    pub fn upload_image(
        &self,
        path: &Path,
    ) -> Result<String> {
        let token = self.block_on(self.auth.user_token())?;
        self.block_on(self.api.upload_image_file(&token, path))
    }

    /// Uploads the images a machine produced for `task_id`, returning the task result payload.
    pub fn upload_task_results(
        &self,
        task_id: &str,
        images: Vec<Vec<u8>>,
    ) -> Result<Value> {
        if images.len() > MAX_RESULT_IMAGES {
            return Err(RiceError::Validation(format!(
                "at most {} images can be returned, got {}",
                MAX_RESULT_IMAGES,
                images.len()
            )));
        }
        let mut urls = Vec::with_capacity(images.len());
        for png in images {
            urls.push(self.block_on(self.api.machine_upload_png(task_id, png))?);
        }
        Ok(json!({ "image_type": "PNG", "image_results": urls }))
    }

    pub fn rewrite_prompt(
        &self,
        request: PromptRequest,
    ) -> Result<PromptRequest> {
        self.block_on(self.rewriter.rewrite(request))
    }

    pub fn set_node_additional_info(
        &self,
        info: &Value,
    ) -> Result<()> {
        self.registry.set_node_additional_info(info)
    }

    /// Downloads the manifest of `template_id` into the template folder and
    /// registers its choice variants.
    pub fn download_template(
        &self,
        template_id: &str,
    ) -> Result<Value> {
        let token = self.block_on(self.auth.user_token()).ok();
        let path = self.registry.manifest_path(template_id)?;
        let template = self.block_on(self.api.download_template(token.as_deref(), template_id, &path))?;
        let count = self.registry.register_manifest(&template.to_string())?;
        info!("template {} installed with {} choice variants", template_id, count);
        Ok(template)
    }
}

use std::{fs, path::Path, sync::Arc};

use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    Result, RiceError,
    client::{ApiResponse, Notifier, ToastLevel, UrlConfig, WorkflowApi},
};

/// Check answer meaning a template with the same id is already published.
const TEMPLATE_EXISTS: i64 = 1;

/// Uploads encrypted bundles to the publisher endpoint.
pub struct Publisher {
    urls: UrlConfig,
    http: reqwest::Client,
    api: Arc<WorkflowApi>,
    notifier: Arc<dyn Notifier>,
}

impl Publisher {
    pub fn new(
        api: Arc<WorkflowApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            urls: api.urls().clone(),
            http: reqwest::Client::new(),
            api,
            notifier,
        }
    }

    /// Publishes `archive_path` under `template_id`. `Ok(false)` means the upload was
    /// declined or rejected; the user has been told why.
    pub async fn publish(
        &self,
        token: &str,
        template_id: &str,
        project_name: &str,
        preview_path: &Path,
        archive_path: &Path,
        auto_overwrite: bool,
    ) -> Result<bool> {
        if !archive_path.exists() {
            return Err(RiceError::Validation(format!("Publish file not found: {}", archive_path.display())));
        }

        let mut overwrite = false;
        let (code, message) = self.check_workflow(token, template_id).await;
        if code == TEMPLATE_EXISTS {
            overwrite = true;
            if !auto_overwrite && !self.notifier.confirm_overwrite(template_id) {
                info!("publish of {} cancelled, overwrite rejected", template_id);
                return Ok(false);
            }
        } else if code != 0 {
            warn!("publish check failed for {}: {}", template_id, message);
            self.notifier.toast(ToastLevel::Error, &format!("异常情况，{}", message));
            return Ok(false);
        }

        let mut main_image_url = String::new();
        if !overwrite && preview_path.exists() {
            main_image_url = self.api.upload_image_file(token, preview_path).await?;
        }

        match self.upload_workflow(token, template_id, project_name, &main_image_url, archive_path).await {
            Ok(()) => {
                self.notifier.toast(ToastLevel::Info, "上传成功");
                Ok(true)
            }
            Err(message) => {
                self.notifier.toast(ToastLevel::Error, &format!("上传失败: {}", message));
                Ok(false)
            }
        }
    }

    async fn check_workflow(
        &self,
        token: &str,
        template_id: &str,
    ) -> (i64, String) {
        let response = self
            .http
            .get(self.urls.publisher_workflow_url())
            .query(&[("id", template_id), ("action", "check")])
            .bearer_auth(token)
            .send()
            .await;
        match response {
            Ok(response) if response.status() == StatusCode::OK => match response.text().await {
                Ok(text) => {
                    let res = ApiResponse::parse(&text);
                    (res.code, res.message)
                }
                Err(e) => (-1, e.to_string()),
            },
            Ok(_) => (-1, String::new()),
            Err(e) => (-1, e.to_string()),
        }
    }

    async fn upload_workflow(
        &self,
        token: &str,
        template_id: &str,
        project_name: &str,
        main_image_url: &str,
        archive_path: &Path,
    ) -> std::result::Result<(), String> {
        let archive = fs::read(archive_path).map_err(|e| e.to_string())?;
        let data = json!({
            "template_id": template_id,
            "title": project_name,
            "main_image_url": main_image_url,
        });
        let file = Part::bytes(archive)
            .file_name("workflow")
            .mime_str("application/octet-stream")
            .map_err(|e| e.to_string())?;
        let form = Form::new()
            .part("workflow_file", file)
            .text("data", data.to_string())
            .text("source", "comfyui");

        let response = self
            .http
            .put(self.urls.publisher_workflow_url())
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(format!("Server returned status code: {}", status.as_u16()));
        }
        let res = ApiResponse::parse(&response.text().await.map_err(|e| e.to_string())?);
        if res.code == 0 {
            info!("template {} published", template_id);
            Ok(())
        } else if res.message.is_empty() {
            Err("Unknown error".to_string())
        } else {
            Err(res.message)
        }
    }
}

use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    AuthCode, Result, RiceError,
    client::{ApiResponse, AuthStore, Notifier, UrlConfig},
    task::TaskInfo,
};

/// Envelope code the task endpoint answers with when the balance cannot cover the run.
pub const INSUFFICIENT_BALANCE_CODE: i64 = 3004;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
enum UploadType {
    UserTaskImage = 2,
    MachineTaskResult = 1000,
}

fn content_type(path: &Path) -> Result<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "webp" => Ok("image/webp"),
        "bmp" => Ok("image/bmp"),
        _ => Err(RiceError::Validation(format!(
            "Unsupported image format: .{}. Supported formats: .png, .jpg, .jpeg, .webp, .bmp",
            ext
        ))),
    }
}

/// Task, template and upload endpoints.
pub struct WorkflowApi {
    urls: UrlConfig,
    http: reqwest::Client,
    auth: Arc<AuthStore>,
    notifier: Arc<dyn Notifier>,
}

impl WorkflowApi {
    pub fn new(
        urls: UrlConfig,
        auth: Arc<AuthStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            urls,
            http: reqwest::Client::new(),
            auth,
            notifier,
        }
    }

    pub fn urls(&self) -> &UrlConfig {
        &self.urls
    }

    /// Submits the collected decrypt inputs for `template_id` and returns the created task.
    pub async fn create_task(
        &self,
        token: &str,
        inputs: &BTreeMap<String, String>,
        template_id: &str,
    ) -> Result<TaskInfo> {
        let body = json!({
            "taskData": serde_json::to_string(inputs)?,
            "workData": serde_json::to_string(&json!({ "template_id": template_id }))?,
        });
        let response = self.http.post(self.urls.prompt_task_url()).bearer_auth(token).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        match status {
            StatusCode::OK => {
                let res = ApiResponse::parse(&text);
                if res.code != 0 || res.data.is_null() {
                    return Err(RiceError::Api {
                        code: res.code,
                        message: if res.message.is_empty() { "Unknown error".to_string() } else { res.message },
                    });
                }
                let task: TaskInfo = serde_json::from_value(res.data)?;
                if task.task_uuid.is_empty() {
                    return Err(RiceError::Api {
                        code: res.code,
                        message: "No task UUID in response".to_string(),
                    });
                }
                info!("task {} created for template {}", task.task_uuid, template_id);
                Ok(task)
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                let res = ApiResponse::parse(&text);
                if res.code == INSUFFICIENT_BALANCE_CODE {
                    self.notifier.payment_dialog(template_id, "余额不足，请充值");
                    return Err(RiceError::InsufficientBalance("余额不足，运行失败，请完成支付后重试！".to_string()));
                }
                Err(RiceError::Api {
                    code: res.code,
                    message: res.message,
                })
            }
            StatusCode::UNAUTHORIZED => {
                self.auth.clear_user_token()?;
                Err(RiceError::auth(AuthCode::Unauthorized, "登录已过期，请重新登录"))
            }
            _ => Err(RiceError::Network(format!("HTTP error {}: {}", status.as_u16(), text))),
        }
    }

    /// The latest preview image of a running task.
    pub async fn preview(
        &self,
        token: &str,
        task_uuid: &str,
    ) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.urls.preview_refresh_url())
            .query(&[("task_uuid", task_uuid)])
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Downloads a published template manifest to `save_path` and returns its content.
    pub async fn download_template(
        &self,
        token: Option<&str>,
        template_id: &str,
        save_path: &Path,
    ) -> Result<Value> {
        let mut request = self.http.get(self.urls.workflow_template_url()).query(&[("template_id", template_id)]);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RiceError::Network(format!("Failed to get template. Status code: {}", status.as_u16())));
        }
        let res = ApiResponse::parse(&response.text().await?);
        if res.code != 0 {
            return Err(RiceError::Api {
                code: res.code,
                message: format!("Failed to get template. Error: {}", res.message),
            });
        }
        let download_url = res.data_str("download_url");
        if download_url.is_empty() {
            return Err(RiceError::Api {
                code: res.code,
                message: "Template download URL is empty".to_string(),
            });
        }

        let response = self.http.get(download_url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RiceError::Network(format!("Failed to download template. Status code: {}", status.as_u16())));
        }
        let bytes = response.bytes().await?;
        let template: Value = serde_json::from_slice(&bytes)?;
        let got = template.get("template_id").and_then(Value::as_str).unwrap_or_default();
        if got != template_id {
            return Err(RiceError::Validation(format!(
                "Template ID mismatch. Expected: {}, Got: {}",
                template_id, got
            )));
        }
        if let Some(parent) = save_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(save_path, &bytes)?;
        debug!("template {} saved to {:?}", template_id, save_path);
        Ok(template)
    }

    /// Uploads a local image as the signed-in user and returns its download url.
    pub async fn upload_image_file(
        &self,
        token: &str,
        path: &Path,
    ) -> Result<String> {
        if !path.exists() {
            return Err(RiceError::Validation(format!("Image file not found: {}", path.display())));
        }
        let content_type = content_type(path)?;
        let bytes = fs::read(path)?;
        self.signed_upload(self.urls.user_upload_sign_url(), Some(token), UploadType::UserTaskImage, &[], content_type, bytes)
            .await
    }

    /// Uploads a PNG task result from the worker machine side; no user token involved.
    pub async fn machine_upload_png(
        &self,
        task_id: &str,
        png: Vec<u8>,
    ) -> Result<String> {
        self.signed_upload(
            self.urls.machine_upload_sign_url(),
            None,
            UploadType::MachineTaskResult,
            &[("task_id", task_id)],
            "image/png",
            png,
        )
        .await
    }

    async fn signed_upload(
        &self,
        sign_url: String,
        token: Option<&str>,
        upload_type: UploadType,
        extra: &[(&str, &str)],
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let upload_type = (upload_type as u16).to_string();
        let mut query = vec![("upload_type", upload_type.as_str()), ("file_type", content_type)];
        query.extend_from_slice(extra);

        let mut request = self.http.get(sign_url).query(&query);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RiceError::Network(format!("Failed to get upload URL. Status code: {}", status.as_u16())));
        }
        let res = ApiResponse::parse(&response.text().await?);
        let (upload_url, download_url) = if res.code == 0 {
            (res.data_str("upload_sign_url"), res.data_str("download_url"))
        } else {
            ("", "")
        };
        if upload_url.is_empty() || download_url.is_empty() {
            return Err(RiceError::Api {
                code: res.code,
                message: "Failed to get upload URL. Upload sign URL is empty".to_string(),
            });
        }

        let response = self
            .http
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            warn!("image upload rejected with {}", response.status());
            return Err(RiceError::Network(format!(
                "failed to upload image. Status code: {}",
                response.status().as_u16()
            )));
        }
        Ok(download_url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{notify::testing::RecordingNotifier, testing::MockServer},
        config::ServerConfig,
        task::TaskState,
    };

    fn api(
        dir: &Path,
        url: &str,
        notifier: Arc<RecordingNotifier>,
    ) -> WorkflowApi {
        let urls = UrlConfig::new(&ServerConfig {
            url_prefix: url.to_string(),
            ws_prefix: url.replace("http", "ws"),
        });
        let auth = Arc::new(AuthStore::new(dir, "m1", urls.clone(), notifier.clone()));
        WorkflowApi::new(urls, auth, notifier)
    }

    fn inputs() -> BTreeMap<String, String> {
        BTreeMap::from([("0".to_string(), "a cat".to_string())])
    }

    #[tokio::test]
    async fn test_create_task() {
        let server = MockServer::start(vec![(
            "POST /api/workflow/add_task",
            200,
            r#"{"code": 0, "data": {"task_uuid": "T-1", "state": 1, "progress": 0}}"#.to_string(),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), &server.url, Arc::new(RecordingNotifier::default()));

        let task = api.create_task("tok", &inputs(), "tpl").await.unwrap();
        assert_eq!(task.task_uuid, "T-1");
        assert_eq!(task.state, TaskState::Pending);

        let request = &server.requests()[0];
        assert!(request.headers.contains("Bearer tok"));
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["taskData"], r#"{"0":"a cat"}"#);
        assert_eq!(body["workData"], r#"{"template_id":"tpl"}"#);
    }

    #[tokio::test]
    async fn test_create_task_errors() {
        let server = MockServer::start(vec![(
            "POST /api/workflow/add_task",
            200,
            r#"{"code": 7, "message": "template offline"}"#.to_string(),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), &server.url, Arc::new(RecordingNotifier::default()));
        let err = api.create_task("tok", &inputs(), "tpl").await.unwrap_err();
        assert_eq!(
            err,
            RiceError::Api {
                code: 7,
                message: "template offline".to_string()
            }
        );

        let server = MockServer::start(vec![(
            "POST /api/workflow/add_task",
            200,
            r#"{"code": 0, "data": {"task_uuid": ""}}"#.to_string(),
        )])
        .await;
        let api = self::api(dir.path(), &server.url, Arc::new(RecordingNotifier::default()));
        assert!(matches!(api.create_task("tok", &inputs(), "tpl").await, Err(RiceError::Api { .. })));
    }

    #[tokio::test]
    async fn test_insufficient_balance_opens_payment() {
        let server = MockServer::start(vec![(
            "POST /api/workflow/add_task",
            500,
            format!(r#"{{"code": {}, "message": "balance"}}"#, INSUFFICIENT_BALANCE_CODE),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let api = api(dir.path(), &server.url, notifier.clone());

        let err = api.create_task("tok", &inputs(), "tpl").await.unwrap_err();
        assert!(matches!(err, RiceError::InsufficientBalance(_)));
        assert_eq!(notifier.events(), vec!["payment:tpl".to_string()]);
    }

    #[tokio::test]
    async fn test_unauthorized_clears_credentials() {
        let server = MockServer::start(vec![("POST /api/workflow/add_task", 401, "{}".to_string())]).await;
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let api = api(dir.path(), &server.url, notifier.clone());

        let err = api.create_task("tok", &inputs(), "tpl").await.unwrap_err();
        assert!(matches!(err, RiceError::Auth { code: AuthCode::Unauthorized, .. }));
        assert_eq!(notifier.events(), vec!["clear".to_string()]);
    }

    #[tokio::test]
    async fn test_download_template_checks_id() {
        let storage = MockServer::start(vec![("GET /tpl.json", 200, r#"{"template_id": "tpl", "elements": []}"#.to_string())]).await;
        let body = json!({"code": 0, "data": {"download_url": format!("{}/tpl.json", storage.url)}}).to_string();
        let server = MockServer::start(vec![("GET /api/workflow/get_template", 200, body)]).await;
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), &server.url, Arc::new(RecordingNotifier::default()));

        let save_path = dir.path().join("templates").join("tpl.json");
        let template = api.download_template(None, "tpl", &save_path).await.unwrap();
        assert_eq!(template["template_id"], "tpl");
        assert!(save_path.exists());
        assert_eq!(server.requests()[0].target, "/api/workflow/get_template?template_id=tpl");
        assert!(!server.requests()[0].headers.to_ascii_lowercase().contains("authorization"));

        let err = api.download_template(Some("tok"), "other", &save_path).await.unwrap_err();
        assert!(matches!(err, RiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_upload_image_file() {
        let storage = MockServer::start(vec![("PUT /put", 200, String::new())]).await;
        let body = json!({
            "code": 0,
            "data": {"upload_sign_url": format!("{}/put", storage.url), "download_url": "https://cdn/x.png"},
        })
        .to_string();
        let server = MockServer::start(vec![("GET /api/user/upload_sign_url", 200, body)]).await;
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), &server.url, Arc::new(RecordingNotifier::default()));

        let image = dir.path().join("preview.JPG");
        fs::write(&image, b"jpeg-bytes").unwrap();
        assert_eq!(api.upload_image_file("tok", &image).await.unwrap(), "https://cdn/x.png");

        let sign = &server.requests()[0];
        assert!(sign.target.contains("upload_type=2"));
        assert!(sign.target.contains("file_type=image%2Fjpeg"));
        let put = &storage.requests()[0];
        assert_eq!(put.body, b"jpeg-bytes");
        assert!(put.headers.to_ascii_lowercase().contains("content-type: image/jpeg"));

        let gif = dir.path().join("a.gif");
        fs::write(&gif, b"gif").unwrap();
        assert!(matches!(api.upload_image_file("tok", &gif).await, Err(RiceError::Validation(_))));
    }
}

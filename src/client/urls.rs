use crate::config::ServerConfig;

/// Backend endpoints, derived from the configured prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlConfig {
    url_prefix: String,
    ws_prefix: String,
}

impl UrlConfig {
    pub fn new(server: &ServerConfig) -> Self {
        Self {
            url_prefix: server.url_prefix.trim_end_matches('/').to_string(),
            ws_prefix: server.ws_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(
        &self,
        path: &str,
    ) -> String {
        format!("{}{}", self.url_prefix, path)
    }

    pub fn ws_url(
        &self,
        path: &str,
    ) -> String {
        format!("{}{}", self.ws_prefix, path)
    }

    pub fn prompt_task_url(&self) -> String {
        self.server_url("/api/workflow/add_task")
    }

    pub fn preview_refresh_url(&self) -> String {
        self.server_url("/api/workflow/refresh_preview")
    }

    pub fn task_ws_url(&self) -> String {
        self.ws_url("/api/workflow/task_websocket")
    }

    pub fn get_info_url(&self) -> String {
        self.server_url("/api/workflow/get_info")
    }

    pub fn workflow_template_url(&self) -> String {
        self.server_url("/api/workflow/get_template")
    }

    pub fn publisher_workflow_url(&self) -> String {
        self.server_url("/api/publisher/workflow")
    }

    pub fn user_upload_sign_url(&self) -> String {
        self.server_url("/api/user/upload_sign_url")
    }

    pub fn machine_upload_sign_url(&self) -> String {
        self.server_url("/api/machine_client/upload_image_sign_url")
    }
}

//! HTTP side of the backend: credentials, task creation, publishing.

mod auth;
pub(crate) mod notify;
mod publish;
mod urls;
mod workflow_api;

use serde::Deserialize;
use serde_json::Value;

pub use auth::AuthStore;
pub use notify::{Interrupt, LogNotifier, NeverInterrupted, Notifier, ToastLevel};
pub use publish::Publisher;
pub use urls::UrlConfig;
pub use workflow_api::{INSUFFICIENT_BALANCE_CODE, WorkflowApi};

/// `{code, message|msg, data}` envelope returned by most endpoints.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ApiResponse {
    /// Parses a response body, an unparsable body becomes code `-1`.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| ApiResponse {
            code: -1,
            message: body.to_string(),
            data: Value::Null,
        })
    }

    pub fn data_str(
        &self,
        key: &str,
    ) -> &str {
        self.data.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

//! User credential storage and validation.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use rand::{Rng, distributions::Alphanumeric};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    AuthCode, Result, RiceError,
    client::{Notifier, ToastLevel, UrlConfig},
};

const AUTH_FILE: &str = "auth.toml";
const RECHECK_INTERVAL: Duration = Duration::from_secs(120);
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
/// Anything shorter is not a token the backend issues.
const MIN_TOKEN_LEN: usize = 50;
const CLIENT_KEY_LEN: usize = 8;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthFile {
    #[serde(default)]
    user_token: String,
}

#[derive(Debug, Default)]
struct AuthState {
    last_check: Option<Instant>,
    client_key: String,
    user_id: i64,
}

/// Random ASCII letters handed to the login dialog.
fn random_client_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(u8::is_ascii_alphabetic)
        .take(CLIENT_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Stores the user token under the settings directory and re-validates it
/// against the backend at most every two minutes.
pub struct AuthStore {
    path: PathBuf,
    machine_id: String,
    urls: UrlConfig,
    http: reqwest::Client,
    notifier: Arc<dyn Notifier>,
    state: Mutex<AuthState>,
}

impl AuthStore {
    pub fn new(
        settings_dir: &Path,
        machine_id: &str,
        urls: UrlConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            path: settings_dir.join(AUTH_FILE),
            machine_id: machine_id.to_string(),
            urls,
            http: reqwest::Client::new(),
            notifier,
            state: Mutex::new(AuthState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// Last user id reported by the backend, 0 when unknown.
    pub fn user_id(&self) -> i64 {
        self.state().user_id
    }

    pub fn read_user_token(&self) -> String {
        match fs::read_to_string(&self.path) {
            Ok(data) => match toml::from_str::<AuthFile>(&data) {
                Ok(file) => file.user_token,
                Err(e) => {
                    warn!("failed to parse {:?}: {}", self.path, e);
                    String::new()
                }
            },
            Err(_) => String::new(),
        }
    }

    fn save_user_token(
        &self,
        user_token: &str,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = toml::to_string(&AuthFile {
            user_token: user_token.to_string(),
        })?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    /// The stored token, re-validated when the last check is older than two minutes.
    pub async fn user_token(&self) -> Result<String> {
        let token = self.read_user_token();
        if token.len() <= MIN_TOKEN_LEN {
            return Err(RiceError::auth(AuthCode::NoToken, "未读取到有效的token，请重新登录"));
        }
        let fresh = self.state().last_check.is_some_and(|t| t.elapsed() <= RECHECK_INTERVAL);
        if fresh {
            return Ok(token);
        }

        let response = match self.http.get(self.urls.get_info_url()).bearer_auth(&token).timeout(CHECK_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                self.empty_token();
                let (code, message) = if e.is_timeout() {
                    (AuthCode::Timeout, "请求超时，请检查网络连接".to_string())
                } else if e.is_connect() {
                    (AuthCode::Network, "网络连接失败，请检查网络".to_string())
                } else {
                    (AuthCode::Request, format!("请求失败: {}", e))
                };
                return Err(RiceError::auth(code, message));
            }
        };

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status == StatusCode::OK {
            let mut state = self.state();
            state.user_id = body.get("user_id").and_then(Value::as_i64).unwrap_or(0);
            state.last_check = Some(Instant::now());
            debug!("user token validated for user {}", state.user_id);
            return Ok(token);
        }

        warn!("token check failed with {}: {}", status, body);
        let (code, message) = match status {
            StatusCode::UNAUTHORIZED => (AuthCode::Unauthorized, "登录已过期，请重新登录".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR => (AuthCode::InternalError, "服务器内部错误，请稍后重试".to_string()),
            StatusCode::SERVICE_UNAVAILABLE => (AuthCode::ServiceUnavailable, "服务不可用，请稍后重试".to_string()),
            _ => (
                AuthCode::Unknown,
                body.get("message").and_then(Value::as_str).unwrap_or("登录结果错误").to_string(),
            ),
        };
        self.empty_token();
        if code == AuthCode::Unauthorized {
            self.clear_user_token()?;
        }
        Err(RiceError::auth(code, message))
    }

    /// Forces the next [`AuthStore::user_token`] call to re-validate.
    pub fn empty_token(&self) {
        self.state().last_check = None;
    }

    /// Removes the stored token and tells the host to forget the user.
    pub fn clear_user_token(&self) -> Result<()> {
        self.notifier.clear_user_info();
        self.empty_token();
        if self.path.exists() {
            self.save_user_token("")?;
        }
        Ok(())
    }

    /// Shows the host login dialog with a fresh client key.
    pub fn login_dialog(
        &self,
        title: &str,
    ) {
        let client_key = random_client_key();
        self.state().client_key = client_key.clone();
        self.notifier.login_dialog(title, &self.machine_id, &client_key);
    }

    /// Stores a token delivered by the login dialog; a mismatching client key is ignored.
    pub fn set_user_token(
        &self,
        user_token: &str,
        client_key: &str,
    ) -> Result<bool> {
        {
            let state = self.state();
            if client_key.is_empty() || state.client_key != client_key {
                warn!("client key mismatch, token ignored");
                return Ok(false);
            }
        }
        self.save_user_token(user_token)?;
        self.empty_token();
        Ok(true)
    }

    /// Stores a long-lived token without a login round trip.
    pub fn set_long_token(
        &self,
        long_token: &str,
    ) -> Result<()> {
        if long_token.is_empty() {
            return Ok(());
        }
        self.save_user_token(long_token)?;
        let mut state = self.state();
        state.client_key.clear();
        state.last_check = None;
        Ok(())
    }

    /// Routes an auth failure to the user: a login dialog when logging in again
    /// helps, `toast` otherwise.
    pub fn report(
        &self,
        err: &RiceError,
        login_title: &str,
        toast: &str,
    ) {
        match err {
            RiceError::Auth { code, .. } if code.needs_login() => self.login_dialog(login_title),
            _ => self.notifier.toast(ToastLevel::Error, toast),
        }
    }
}

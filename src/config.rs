use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{Result, RiceError};

/// Below this a `RICE_ROUND_URL_PREFIX` override is ignored.
const MIN_URL_PREFIX_LEN: usize = 10;
/// Floor of the task wait time, in seconds.
const MIN_WAIT_TIME: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// number of async worker threads, defaults to 4
    pub async_worker_thread_number: u16,
    /// root folder of encrypted projects
    pub output_dir: PathBuf,
    /// folder holding credentials and machine identity, defaults to `$HOME/RiceRound`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_dir: Option<PathBuf>,
    pub settings: Settings,
    pub server: ServerConfig,
}

/// User-facing switches, changed at runtime through the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// publish replaces an existing template without asking
    pub auto_overwrite: bool,
    /// encrypt is followed by publish
    pub auto_publish: bool,
    pub run_client: bool,
    /// seconds a remote task may run
    pub wait_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub url_prefix: String,
    pub ws_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_worker_thread_number: 4,
            output_dir: PathBuf::from("output"),
            settings_dir: None,
            settings: Settings::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_overwrite: false,
            auto_publish: true,
            run_client: true,
            wait_time: 600,
        }
    }
}

impl Settings {
    /// The configured wait time, never below ten seconds.
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time.max(MIN_WAIT_TIME))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let debug = env::var("RICE_ROUND_DEBUG").is_ok_and(|v| v == "true");
        let prefix = env::var("RICE_ROUND_URL_PREFIX").ok();
        Self::from_env(debug, prefix.as_deref())
    }
}

impl ServerConfig {
    fn from_env(
        debug: bool,
        url_prefix: Option<&str>,
    ) -> Self {
        let subdomain = if debug { "test" } else { "api" };
        let url_prefix = match url_prefix {
            Some(prefix) if prefix.len() > MIN_URL_PREFIX_LEN => prefix.to_string(),
            _ => format!("https://{}.riceround.online", subdomain),
        };
        Self {
            url_prefix,
            ws_prefix: format!("wss://{}.riceround.online", subdomain),
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())
            .map_err(|e| RiceError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        if config.async_worker_thread_number == 0 {
            return Err(RiceError::Config("async_worker_thread_number must be positive".to_string()));
        }
        Ok(config)
    }

    pub fn save<T: AsRef<Path>>(
        &self,
        path: T,
    ) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }

    /// The settings folder, `$HOME/RiceRound` unless configured.
    pub fn settings_dir(&self) -> PathBuf {
        match &self.settings_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir().unwrap_or_default().join("RiceRound"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
        async_worker_thread_number = 2
        output_dir = "/tmp/rice"
        settings_dir = "/tmp/rice/settings"

        [settings]
        auto_overwrite = true
        wait_time = 3

        [server]
        url_prefix = "http://localhost:8080"
        ws_prefix = "ws://localhost:8080"
        "#;
        let config = Config::load_from_str(toml_str).unwrap();
        assert_eq!(config.async_worker_thread_number, 2);
        assert_eq!(config.settings_dir(), PathBuf::from("/tmp/rice/settings"));
        assert!(config.settings.auto_overwrite);
        assert!(config.settings.auto_publish);
        assert_eq!(config.settings.wait_time(), Duration::from_secs(10));
        assert_eq!(config.server.ws_prefix, "ws://localhost:8080");
    }

    #[test]
    fn test_config_rejects_zero_workers() {
        assert!(matches!(Config::load_from_str("async_worker_thread_number = 0"), Err(RiceError::Config(_))));
        assert!(matches!(Config::load_from_str("output_dir = 3"), Err(RiceError::Config(_))));
    }

    #[test]
    fn test_server_defaults() {
        let server = ServerConfig::from_env(false, None);
        assert_eq!(server.url_prefix, "https://api.riceround.online");
        assert_eq!(server.ws_prefix, "wss://api.riceround.online");

        let server = ServerConfig::from_env(true, Some("short"));
        assert_eq!(server.url_prefix, "https://test.riceround.online");

        let server = ServerConfig::from_env(false, Some("http://192.168.1.20:8080"));
        assert_eq!(server.url_prefix, "http://192.168.1.20:8080");
        assert_eq!(server.ws_prefix, "wss://api.riceround.online");
    }

    #[test]
    fn test_config_save_and_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("riceround.toml");
        let mut config = Config::default();
        config.settings.wait_time = 1200;
        config.save(&path).unwrap();
        assert_eq!(Config::create(&path).unwrap(), config);
        assert!(Config::create(dir.path().join("missing.toml")).is_err());
    }
}

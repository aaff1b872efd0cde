use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::{
    Config, Engine, Result, RiceError,
    client::{LogNotifier, Notifier},
    task::TaskSocketOptions,
};

pub struct EngineBuilder {
    config: Config,
    async_worker_thread_number: Option<u16>,
    rt: Option<Arc<Runtime>>,
    notifier: Option<Arc<dyn Notifier>>,
    socket_options: TaskSocketOptions,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            async_worker_thread_number: None,
            rt: None,
            notifier: None,
            socket_options: TaskSocketOptions::default(),
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    /// Overrides `async_worker_thread_number` of the config.
    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.async_worker_thread_number = Some(n);
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    /// Host side of dialogs and toasts, [`LogNotifier`] when unset.
    pub fn notifier(
        mut self,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn socket_options(
        mut self,
        options: TaskSocketOptions,
    ) -> Self {
        self.socket_options = options;
        self
    }

    pub fn build(&self) -> Result<Engine> {
        let mut config = self.config.clone();
        if let Some(n) = self.async_worker_thread_number {
            config.async_worker_thread_number = n;
        }
        if config.async_worker_thread_number == 0 {
            return Err(RiceError::Config("async_worker_thread_number must be positive".to_string()));
        }

        let runtime = match &self.rt {
            Some(rt) => rt.clone(),
            None => Arc::new(
                Builder::new_multi_thread()
                    .worker_threads(config.async_worker_thread_number.into())
                    .enable_all()
                    .build()
                    .map_err(|e| RiceError::Config(format!("failed to build runtime: {}", e)))?,
            ),
        };
        let notifier = self.notifier.clone().unwrap_or_else(|| Arc::new(LogNotifier));

        Engine::new(config, runtime, notifier, self.socket_options)
    }
}

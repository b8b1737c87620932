//! Component registry.
//!
//! A [`Context`] is created once at startup from a [`Config`] and owns the
//! parts every service shares: the command executor, the recovery manager
//! and the host's platform adapter. Services are handed out wired to them.

use std::sync::Arc;

use tracing::info;

use crate::adapters::{CommandExecutor, NativeAdapter};
use crate::application::{ErrorRecoveryManager, PortScanner, ProcessManager};
use crate::config::{Config, ConfigStore};
use crate::error::Result;
use crate::ports::{ExecuteOptions, HostPlatform, PlatformAdapter};

/// Shared components built from one configuration.
pub struct Context {
    config: Config,
    executor: Arc<CommandExecutor>,
    recovery: Arc<ErrorRecoveryManager>,
    adapter: NativeAdapter,
}

impl Context {
    /// Build for the running OS. Fails on unsupported platforms and
    /// invalid configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::for_platform(config, HostPlatform::current()?))
    }

    /// Build with the configuration stored on disk.
    pub async fn load(store: &ConfigStore) -> Result<Self> {
        Self::new(store.load().await?)
    }

    /// Build for an explicit platform.
    pub fn for_platform(config: Config, platform: HostPlatform) -> Self {
        let executor = Arc::new(CommandExecutor::for_platform(
            config.executor.clone(),
            platform,
        ));
        let recovery = Arc::new(ErrorRecoveryManager::new(
            config.recovery.clone(),
            config.circuit_breaker.clone(),
        ));
        let options = ExecuteOptions::with_timeout(config.executor.timeout());
        let adapter = NativeAdapter::for_platform(platform, Arc::clone(&executor), options);

        info!(platform = %platform, "Context initialized");
        Self {
            config,
            executor,
            recovery,
            adapter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> HostPlatform {
        self.adapter.platform()
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryManager> {
        &self.recovery
    }

    pub fn adapter(&self) -> &NativeAdapter {
        &self.adapter
    }

    pub fn process_manager(&self) -> ProcessManager<NativeAdapter> {
        ProcessManager::new(self.adapter.clone(), Arc::clone(&self.recovery))
    }

    pub fn port_scanner(&self) -> PortScanner<NativeAdapter> {
        PortScanner::new(
            self.adapter.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.recovery),
            &self.config,
        )
    }
}

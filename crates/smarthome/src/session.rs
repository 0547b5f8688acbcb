//! Config loading and bridge construction for one CLI invocation.

use std::path::PathBuf;
use std::sync::Arc;

use smarthome_config::{
    Config, ConfigError, bridge_options, config_path, load_config_from, plugin_config, plugin_configs,
};
use smarthome_core::{DeviceBridge, UniversalBridge, plugins};
use tracing::debug;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Id of the aggregate built when several bridges are configured.
const UNIVERSAL_ID: &str = "universal";

pub struct Session {
    pub config: Config,
    pub bridge: Arc<dyn DeviceBridge>,
}

impl Session {
    /// Load the config and build the selected bridge without contacting it.
    pub fn build(global: &GlobalOpts) -> Result<Self, CliError> {
        let (config, _) = load(global)?;
        let options = bridge_options(&config);

        let bridge: Arc<dyn DeviceBridge> = match &global.bridge {
            Some(name) => plugins::build(named(&config, name)?, options),
            None => {
                let mut configs = plugin_configs(&config)?;
                if configs.len() == 1 {
                    plugins::build(configs.remove(0), options)
                } else {
                    let universal = UniversalBridge::new(UNIVERSAL_ID);
                    for pc in configs {
                        let id = pc.id.clone();
                        universal.add_plugin(&id, plugins::build(pc, options.clone()))?;
                    }
                    Arc::new(universal)
                }
            }
        };
        debug!(bridge = %bridge.id(), kind = %bridge.kind(), "bridge built");
        Ok(Self { config, bridge })
    }

    /// Build, connect and wait for the first full tree.
    pub async fn open(global: &GlobalOpts) -> Result<Self, CliError> {
        let session = Self::build(global)?;
        session.bridge.prepare().await?;
        session.bridge.request_data().await?;
        Ok(session)
    }

    pub async fn close(self) {
        self.bridge.clear_instance().await;
    }
}

/// Config file named by `--config`, or the platform default, with the
/// `--timeout` override applied.
pub fn load(global: &GlobalOpts) -> Result<(Config, PathBuf), CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);
    let mut config = load_config_from(&path)?;
    if let Some(timeout) = global.timeout {
        config.timeout = timeout;
    }
    if config.bridges.is_empty() {
        return Err(CliError::NoConfig {
            path: path.display().to_string(),
        });
    }
    Ok((config, path))
}

/// Plugin config for one bridge, listing the alternatives when unknown.
pub fn named(config: &Config, name: &str) -> Result<smarthome_core::PluginConfig, CliError> {
    plugin_config(config, name).map_err(|e| match e {
        ConfigError::UnknownBridge { name } => CliError::UnknownBridge {
            name,
            available: config.bridges.keys().cloned().collect::<Vec<_>>().join(", "),
        },
        other => other.into(),
    })
}

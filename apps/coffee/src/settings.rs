use std::{path::Path, time::Duration};

use alloy_primitives::Address;
use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;
use shared::{contract::DEFAULT_CONTRACT_ADDRESS, domain::ContractDeployment};
use url::Url;

pub const ENV_PREFIX: &str = "APP";
const DEFAULT_CONFIG_NAME: &str = "coffee";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// JSON-RPC endpoint of the wallet node. Unset means no wallet provider.
    pub rpc_url: Option<Url>,
    pub contract_address: Address,
    pub poll_interval_ms: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: DEFAULT_CONTRACT_ADDRESS,
            poll_interval_ms: 4_000,
            log_level: "info".into(),
        }
    }
}

impl Settings {
    pub fn deployment(&self) -> ContractDeployment {
        ContractDeployment::new(self.contract_address)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms.max(1)))
    }
}

pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with_prefix(path, ENV_PREFIX)
}

/// Defaults, then `coffee.toml` (or the explicit file), then `<PREFIX>__*`
/// environment variables.
pub fn load_settings_with_prefix(path: Option<&Path>, env_prefix: &str) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let builder = Config::builder()
        .set_default("contract_address", defaults.contract_address.to_string())?
        .set_default("poll_interval_ms", defaults.poll_interval_ms)?
        .set_default("log_level", defaults.log_level)?;

    let builder = match path {
        Some(path) => builder.add_source(File::from(path).required(true)),
        None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
    };

    builder
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read settings")?
        .try_deserialize()
        .context("invalid settings")
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;

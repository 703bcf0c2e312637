//! Configuration management for txsend
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every section is optional; a missing default file means built-in defaults.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkConfig,
    pub wallet: WalletConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Bound on each individual RPC call
    pub request_timeout_secs: u64,
    /// Bound on device confirmation and on waiting for a receipt
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 1,
            request_timeout_secs: 30,
            timeout_secs: 120,
            poll_interval_ms: 2000,
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Additional keystore directories, searched after the client defaults
    pub keystore_paths: Vec<PathBuf>,
    pub hardware_enabled: bool,
    /// Number of addresses derived on each hardware wallet
    pub usb_wallets: usize,
    /// Derivation path prefix; the account index is appended
    pub derivation_path: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keystore_paths: Vec::new(),
            hardware_enabled: true,
            usb_wallets: 3,
            derivation_path: "m/44'/60'/0'".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub rpc_url: Option<String>,
    pub chain_id: Option<u64>,
    pub timeout_secs: Option<u64>,
}

impl Settings {
    /// Load settings from an explicit path, `TXSEND_CONFIG`, or the default file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var("TXSEND_CONFIG").ok().map(PathBuf::from));

        let config_path = match explicit {
            Some(p) => p,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    let settings = Settings::default();
                    settings.validate()?;
                    return Ok(settings);
                }
                default
            }
        };

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text
    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Apply command-line overrides and re-validate
    pub fn with_overrides(mut self, overrides: &Overrides) -> Result<Self> {
        if let Some(url) = &overrides.rpc_url {
            self.network.rpc_url = url.clone();
        }
        if let Some(chain_id) = overrides.chain_id {
            self.network.chain_id = chain_id;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.network.timeout_secs = secs;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.network.rpc_url;
        if url.is_empty() {
            anyhow::bail!("network.rpc_url must be set");
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("network.rpc_url must be an http(s) URL, got {}", url);
        }
        if self.network.request_timeout_secs == 0 || self.network.timeout_secs == 0 {
            anyhow::bail!("network timeouts must be greater than zero");
        }
        if self.network.poll_interval_ms == 0 {
            anyhow::bail!("network.poll_interval_ms must be greater than zero");
        }

        if self.wallet.usb_wallets > 32 {
            anyhow::bail!(
                "wallet.usb_wallets must be at most 32, got {}",
                self.wallet.usb_wallets
            );
        }
        if !self.wallet.derivation_path.starts_with("m/") {
            anyhow::bail!(
                "wallet.derivation_path must start with m/, got {}",
                self.wallet.derivation_path
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "walletdesk";
const KEYCHAIN_SERVICE: &str = "walletdesk.credentials";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backoffice: BackofficeConfig,
    #[serde(default)]
    pub flow: FlowSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backoffice: BackofficeConfig::default(),
            flow: FlowSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackofficeConfig {
    #[serde(default = "default_backoffice_kind")]
    pub kind: String, // "mock" | "http"
    pub base_url: Option<String>,
    pub client_id: Option<String>,
    pub token_url: Option<String>,
}

fn default_backoffice_kind() -> String {
    "mock".to_string()
}

/// Polling knobs for the collection flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_ceiling_secs")]
    pub ceiling_secs: u64,
    #[serde(default = "default_transport_retry_limit")]
    pub transport_retry_limit: u32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            ceiling_secs: default_ceiling_secs(),
            transport_retry_limit: default_transport_retry_limit(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_ceiling_secs() -> u64 {
    120
}

fn default_transport_retry_limit() -> u32 {
    3
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

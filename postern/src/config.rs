use std::path::{Path, PathBuf};

use postern_account::{CacheConfig, DatastoreConfig};
use postern_common::listener::ListenerConfig;
use postern_delivery::DeliveryConfig;
use postern_queue::QueueConfig;
use postern_smtp::SmtpArgs;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "POSTERN_CONFIG";
pub const DATABASE_URL_ENV: &str = "POSTERN_DATABASE_URL";

const DEFAULT_PATHS: [&str; 2] = ["./postern.config.ron", "/etc/postern/postern.config.ron"];

#[derive(Debug, Clone, Deserialize)]
pub struct DkimConfig {
    #[serde(default = "default_selector")]
    pub selector: String,
}

fn default_selector() -> String {
    String::from("default")
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self {
            selector: default_selector(),
        }
    }
}

/// Everything both binaries read from `postern.config.ron`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Postern {
    #[serde(default, alias = "listeners")]
    pub smtp: Vec<ListenerConfig<SmtpArgs>>,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub dkim: DkimConfig,
    /// Name this host checks SPF as. The first listener's banner when unset.
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Postern {
    /// # Errors
    /// If the text is not a valid configuration
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(text)?)
    }

    /// # Errors
    /// If the file cannot be read or parsed
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            anyhow::anyhow!("Failed to read config from {}: {err}", path.display())
        })?;

        Self::parse(&text)
            .map_err(|err| anyhow::anyhow!("Invalid config in {}: {err}", path.display()))
    }

    /// The name to present for SPF checks and the greeting fallback.
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| {
                self.smtp
                    .iter()
                    .map(|listener| listener.args.banner.clone())
                    .find(|banner| !banner.is_empty())
            })
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| String::from("localhost"))
    }
}

/// Locate the configuration file.
///
/// `POSTERN_CONFIG` wins when set, then `./postern.config.ron`, then
/// `/etc/postern/postern.config.ron`.
///
/// # Errors
/// If the variable names a missing file or no default path exists
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    find_config_file_from(
        std::env::var(CONFIG_ENV).ok(),
        DEFAULT_PATHS.iter().map(PathBuf::from),
    )
}

fn find_config_file_from(
    env: Option<String>,
    defaults: impl IntoIterator<Item = PathBuf>,
) -> anyhow::Result<PathBuf> {
    if let Some(env) = env {
        let path = PathBuf::from(env);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    let defaults: Vec<PathBuf> = defaults.into_iter().collect();
    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let tried = defaults
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!("No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{tried}")
}

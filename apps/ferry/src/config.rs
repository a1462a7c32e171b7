//! Sender and receiver configuration files.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/ferry/{send,recv}.toml`
//! - Windows: `%APPDATA%/ferry/{send,recv}.toml`
//!
//! Files are optional and never created automatically. Command-line flags
//! override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ferry_transfer::{ListenerSettings, RetryPolicy, SenderSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Receiver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// TCP port to listen on.
    #[serde(default)]
    pub listen_port: Option<u16>,

    /// Directory finished files are written to.
    #[serde(default)]
    pub out_dir: Option<PathBuf>,

    /// Public keys (SPKI PEM) of senders allowed to upload.
    #[serde(default)]
    pub trusted_keys: Vec<PathBuf>,

    /// Keep accepting connections after the first session.
    #[serde(default)]
    pub keep_listening: bool,

    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Sender configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Private key (PKCS#8 PEM) used to authenticate.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Total attempts per transfer, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_auth_timeout_secs() -> u64 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_port: None,
            out_dir: None,
            trusted_keys: Vec::new(),
            keep_listening: false,
            auth_timeout_secs: default_auth_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            max_attempts: default_max_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ReceiverConfig {
    /// Loads `explicit` if given, else the default file if it exists.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        load_or_default(explicit, "recv.toml")
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

impl SenderConfig {
    /// Loads `explicit` if given, else the default file if it exists.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        load_or_default(explicit, "send.toml")
    }

    pub fn sender_settings(&self) -> SenderSettings {
        SenderSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

fn load_or_default<T>(explicit: Option<&Path>, file_name: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if let Some(path) = explicit {
        return read(path);
    }
    match config_dir() {
        Some(dir) if dir.join(file_name).exists() => read(&dir.join(file_name)),
        _ => Ok(T::default()),
    }
}

fn read<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Returns the platform-specific configuration directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|appdata| PathBuf::from(appdata).join("ferry"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("ferry"))
    }
}

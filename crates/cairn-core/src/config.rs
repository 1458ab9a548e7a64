//! Configuration system for Cairn.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAIRN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cairn/config.toml
//!   3. ~/.config/cairn/config.toml
//!
//! The tutorial variables `RPC_ADDRS`, `MY_MNEMONIC`, `BOOTSTRAP_NODES` and
//! `MY_ADDR` are honoured alongside the `CAIRN_*` overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{ClientConfig, ConfigurationError, Role};

/// Default wait for a chain transaction, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default TCP port for the local peer node.
pub const DEFAULT_LISTEN_PORT: u16 = 4001;

/// Default segment size: 32 MiB.
pub const DEFAULT_SEGMENT_SIZE: usize = 32 * 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub chain: ChainSettings,
    pub network: NetworkSettings,
    pub upload: UploadSettings,
    pub workflow: WorkflowSettings,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub role: Role,
    /// Chain RPC endpoints, tried in order.
    pub rpc_addrs: Vec<String>,
    /// Account secret phrase. Prefer `MY_MNEMONIC` over writing it to disk.
    pub mnemonic: String,
    /// Blanket timeout for chain requests.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Address the peer node listens on.
    pub listen_ip: std::net::IpAddr,
    /// TCP port for the peer node. 0 = OS-assigned.
    pub listen_port: u16,
    /// Directory for the peer identity and fragment store.
    pub workspace: PathBuf,
    /// Bootstrap peer candidates: multiaddrs, `/dnsaddr/` entries or domains.
    pub bootstrap_nodes: Vec<String>,
    /// Per-peer dial timeout during bootstrap.
    pub dial_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// File to process and order storage for.
    pub file: PathBuf,
    /// Owner account (SS58).
    pub owner_address: String,
    /// Display name. Empty = the file's own name.
    pub file_name: String,
    pub bucket_name: String,
    /// Declared size in bytes. 0 = the file's actual size.
    pub declared_size: u64,
    pub segment_size: usize,
    /// Domain submitted at gateway registration.
    pub domain: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub policy: Policy,
}

/// How recoverable step failures are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Registration and order failures are logged; the run continues.
    #[default]
    Lenient,
    /// Every step failure ends the run.
    Strict,
}

impl std::str::FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Policy::Lenient),
            "strict" => Ok(Policy::Strict),
            other => Err(format!("unknown policy {other:?}")),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            role: Role::Client,
            rpc_addrs: Vec::new(),
            mnemonic: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for ChainSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSettings")
            .field("role", &self.role)
            .field("rpc_addrs", &self.rpc_addrs)
            .field("mnemonic", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen_ip: std::net::IpAddr::from([0, 0, 0, 0]),
            listen_port: DEFAULT_LISTEN_PORT,
            workspace: data_dir().join("workspace"),
            bootstrap_nodes: Vec::new(),
            dial_timeout_secs: 5,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("assets/sample.pdf"),
            owner_address: String::new(),
            file_name: String::new(),
            bucket_name: "test1".to_string(),
            declared_size: 0,
            segment_size: DEFAULT_SEGMENT_SIZE,
            domain: String::new(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cairn")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("cairn")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path(), |var| std::env::var(var).ok())
    }

    /// Load `path` if it exists, then apply overrides read through `lookup`.
    pub fn load_from<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            CairnConfig::default()
        };
        config.apply_env_overrides(lookup)?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply environment overrides read through `lookup`, which maps a
    /// variable name to its value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RPC_ADDRS") {
            self.chain.rpc_addrs = split_list(&v);
        }
        if let Some(v) = lookup("MY_MNEMONIC") {
            self.chain.mnemonic = v;
        }
        if let Some(v) = lookup("BOOTSTRAP_NODES") {
            self.network.bootstrap_nodes = split_list(&v);
        }
        if let Some(v) = lookup("MY_ADDR") {
            self.upload.owner_address = v.trim().to_string();
        }
        if let Some(v) = lookup("CAIRN_ROLE") {
            self.chain.role = v.parse().map_err(|e: ConfigurationError| ConfigError::InvalidEnv {
                var: "CAIRN_ROLE",
                reason: e.to_string(),
            })?;
        }
        if let Some(v) = lookup("CAIRN_TIMEOUT_SECS") {
            self.chain.timeout_secs = parse_num("CAIRN_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("CAIRN_LISTEN_PORT") {
            self.network.listen_port = parse_num("CAIRN_LISTEN_PORT", &v)?;
        }
        if let Some(v) = lookup("CAIRN_WORKSPACE") {
            self.network.workspace = PathBuf::from(v);
        }
        if let Some(v) = lookup("CAIRN_FILE") {
            self.upload.file = PathBuf::from(v);
        }
        if let Some(v) = lookup("CAIRN_BUCKET") {
            self.upload.bucket_name = v;
        }
        if let Some(v) = lookup("CAIRN_DECLARED_SIZE") {
            self.upload.declared_size = parse_num("CAIRN_DECLARED_SIZE", &v)?;
        }
        if let Some(v) = lookup("CAIRN_POLICY") {
            self.workflow.policy = v.parse().map_err(|reason| ConfigError::InvalidEnv {
                var: "CAIRN_POLICY",
                reason,
            })?;
        }
        Ok(())
    }

    /// Build the validated chain client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigurationError> {
        ClientConfig::new(
            self.chain.role,
            &self.chain.rpc_addrs,
            self.chain.mnemonic.clone(),
            Duration::from_secs(self.chain.timeout_secs),
        )
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn parse_num<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        reason: e.to_string(),
    })
}

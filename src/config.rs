//! ClawBridge configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main ClawBridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Relay server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Agent CLI configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Chat client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Chat history configuration
    #[serde(default)]
    pub history: HistoryConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Render configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// What happens when a second client connects while the slot is occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
    /// Close the previous occupant, admit the newcomer
    #[default]
    Displace,

    /// Send an error frame to the newcomer and close it
    Reject,
}

/// What happens to a chat message while another agent invocation is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflightPolicy {
    /// Spawn independently; the last response to finish wins
    #[default]
    Concurrent,

    /// Refuse with an error frame
    Reject,

    /// Run one at a time in arrival order
    Queue,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Directory holding the web UI assets
    pub static_dir: PathBuf,

    /// Connection slot conflict policy
    pub slot_policy: SlotPolicy,

    /// In-flight agent request policy
    pub inflight_policy: InflightPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            static_dir: PathBuf::from("public"),
            slot_policy: SlotPolicy::default(),
            inflight_policy: InflightPolicy::default(),
        }
    }
}

/// Agent CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable
    pub command: String,

    /// Subcommand passed before the flags
    pub subcommand: String,

    /// Value of `--agent`
    pub agent_name: String,

    /// Working directory for the agent process (None = inherit)
    pub working_dir: Option<PathBuf>,

    /// Kill the agent after this many seconds (None = wait forever)
    pub timeout_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "openclaw".to_string(),
            subcommand: "agent".to_string(),
            agent_name: "main".to_string(),
            working_dir: None,
            timeout_secs: None,
        }
    }
}

/// Chat client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Page origin the relay is served from
    pub url: String,

    /// Delay before each reconnect attempt in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            reconnect_delay_ms: 3000,
        }
    }
}

/// Chat history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Key holding the conversation list
    pub storage_key: String,

    /// Maximum number of conversations kept
    pub max_chats: usize,

    /// Directory for the file-backed store
    pub data_dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            storage_key: "openclawChatHistory".to_string(),
            max_chats: 20,
            data_dir: dirs_next::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("clawbridge"),
        }
    }
}

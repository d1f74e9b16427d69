use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// Tunable config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     server = "http://chat.local:8000"
//                    room = "ops"
//
//   env var:         AGENTCHAT_SERVER=http://chat.local:8000
//                    AGENTCHAT_AGENT=codex

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
pub const DEFAULT_ROOM: &str = "default";
pub const DEFAULT_KIND: &str = "status";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    /// Chat server base URL (http/https; the feed address is derived from it)
    #[serde(default = "default_server")]
    pub server: String,
    /// Room used when neither a flag nor the identity file names one
    #[serde(default = "default_room")]
    pub room: String,
    /// Agent name fallback; usually set through `AGENTCHAT_AGENT`
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Bound for the feed engine's command, transport and event channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            room: default_room(),
            agent: None,
            kind: default_kind(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}
fn default_room() -> String {
    DEFAULT_ROOM.to_string()
}
fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}
fn default_channel_capacity() -> usize {
    256
}

/// Build a figment that layers: defaults → config.toml → AGENTCHAT_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("AGENTCHAT_").split("__"))
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from flags)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub data_dir: PathBuf,
    identity_path: PathBuf,
}

impl ChatConfig {
    /// Resolve (and create) the data directory. `identity_file` overrides the
    /// default `<data_dir>/identity.json`.
    pub fn new(custom_dir: Option<PathBuf>, identity_file: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory (use --data-dir)")?
                .join(".agentchat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let identity_path = identity_file.unwrap_or_else(|| data_dir.join("identity.json"));

        Ok(Self {
            data_dir,
            identity_path,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }
}

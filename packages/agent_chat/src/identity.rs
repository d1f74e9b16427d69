//! Persisted identity: the last joined room and the agent name to post as.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_ROOM;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl Identity {
    fn normalized(self) -> Self {
        Self {
            room: non_blank(self.room),
            agent: non_blank(self.agent),
        }
    }
}

/// JSON file holding an [`Identity`].
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored identity. A missing or unreadable file yields the
    /// empty identity.
    pub fn load(&self) -> Identity {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no identity file");
                return Identity::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read identity file");
                return Identity::default();
            }
        };
        match serde_json::from_str::<Identity>(&raw) {
            Ok(identity) => identity.normalized(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt identity file");
                Identity::default()
            }
        }
    }

    pub fn save(&self, identity: &Identity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let mut json =
            serde_json::to_string_pretty(identity).context("Failed to serialize identity")?;
        json.push('\n');
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    /// Persist `room` (normalized) and return the updated identity.
    pub fn set_room(&self, room: &str) -> Result<Identity> {
        let mut identity = self.load();
        identity.room = Some(normalize_room(room));
        self.save(&identity)?;
        Ok(identity)
    }

    /// Persist a non-empty agent name and return the updated identity.
    pub fn set_agent(&self, agent: &str) -> Result<Identity> {
        let agent = agent.trim();
        if agent.is_empty() {
            anyhow::bail!("agent name must not be empty");
        }
        let mut identity = self.load();
        identity.agent = Some(agent.to_string());
        self.save(&identity)?;
        Ok(identity)
    }
}

/// Trimmed room name; blank means the default room.
pub fn normalize_room(raw: &str) -> String {
    let room = raw.trim();
    if room.is_empty() {
        DEFAULT_ROOM.to_string()
    } else {
        room.to_string()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

//! HTTP side of the chat server: message submission and health probe.
//!
//! Submissions are fire-and-forget from the feed's point of view: a posted
//! message shows up in the transcript only when the feed delivers it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DEFAULT_KIND, DEFAULT_ROOM};

pub const MAX_ROOM_CHARS: usize = 64;
pub const MAX_AGENT_CHARS: usize = 64;
pub const MAX_KIND_CHARS: usize = 32;
pub const MAX_CONTENT_CHARS: usize = 4000;

const HEALTH_TIMEOUT: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("agent name is required")]
    MissingAgent,

    #[error("content is required")]
    MissingContent,

    #[error("{field} is too long ({len} > {max} characters)")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// A validated outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub room: String,
    pub agent: String,
    pub kind: String,
    pub content: String,
}

impl Submission {
    /// Trim every field, fill in the default room and kind, and enforce the
    /// server's length limits.
    pub fn new(room: &str, agent: &str, kind: &str, content: &str) -> Result<Self, ValidationError> {
        let room = or_default(room, DEFAULT_ROOM);
        let kind = or_default(kind, DEFAULT_KIND);
        let agent = agent.trim();
        let content = content.trim();

        if agent.is_empty() {
            return Err(ValidationError::MissingAgent);
        }
        if content.is_empty() {
            return Err(ValidationError::MissingContent);
        }
        check_len("room", room, MAX_ROOM_CHARS)?;
        check_len("agent", agent, MAX_AGENT_CHARS)?;
        check_len("kind", kind, MAX_KIND_CHARS)?;
        check_len("content", content, MAX_CONTENT_CHARS)?;

        Ok(Self {
            room: room.to_string(),
            agent: agent.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
        })
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { default } else { trimmed }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { field, len, max });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("server rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SubmitError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    ok: bool,
}

/// Client for the server's HTTP endpoints.
#[derive(Clone)]
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(server: &str) -> Self {
        Self {
            base: normalize_base(server),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// POST one message. Returns the server's response body. Never retried.
    pub async fn submit(&self, submission: &Submission) -> Result<String, SubmitError> {
        let url = format!("{}/api/messages", self.base);
        let resp = self
            .http
            .post(&url)
            .json(submission)
            .send()
            .await
            .map_err(SubmitError::from_reqwest)?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(room = %submission.room, agent = %submission.agent, "message submitted");
        Ok(body)
    }

    /// `GET /health` answered `{"ok": true}` in time.
    pub async fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.base);
        match self.http.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<HealthResponse>()
                .await
                .map(|h| h.ok)
                .unwrap_or(false),
            Ok(resp) => {
                debug!(status = %resp.status(), "health check failed");
                false
            }
            Err(e) => {
                debug!(error = %e, "health check failed");
                false
            }
        }
    }
}

/// Trim trailing slashes and map feed schemes back to HTTP.
fn normalize_base(server: &str) -> String {
    let trimmed = server.trim().trim_end_matches('/');
    match trimmed.split_once("://") {
        Some(("ws", rest)) => format!("http://{}", rest),
        Some(("wss", rest)) => format!("https://{}", rest),
        Some(_) => trimmed.to_string(),
        None => format!("http://{}", trimmed),
    }
}

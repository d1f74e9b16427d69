//! Transport seam between the controller and a live connection.
//!
//! A [`Connector`] opens one connection per session and reports what happens on
//! it through an [`EventSink`]. Every event is tagged with the [`SessionId`] it
//! belongs to, so the controller can drop anything from a superseded session.

use std::fmt;

use tokio::sync::mpsc;
use url::Url;

use crate::error::FeedError;

/// Identifies one logical subscription (one join).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Something that happened on a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// The far end closed the connection (orderly or forced).
    Closed,
    /// The connection failed.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: TransportEvent,
}

/// Session-tagged sender handed to a connector when a session opens.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Forward an event. Returns `false` once the engine has gone away.
    pub async fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .await
            .is_ok()
    }
}

/// Opens transport connections for sessions.
pub trait Connector: Send + 'static {
    /// Start connecting to `target`. Must not block; progress is reported
    /// through `sink`.
    fn open(&mut self, target: &FeedTarget, sink: EventSink) -> Box<dyn TransportHandle>;
}

/// Exclusive ownership of one open (or opening) connection.
pub trait TransportHandle: Send {
    /// Tear the connection down. Once this returns the handle emits no further
    /// events.
    fn close(&mut self);
}

/// The feed endpoint of a server, without a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    base: Url,
}

impl FeedEndpoint {
    /// Derive the feed endpoint from a server address.
    ///
    /// `https://` maps to `wss://`, `http://` (or no scheme) to `ws://`; `ws://`
    /// and `wss://` are taken as is. The feed lives at `/ws` under the base.
    pub fn parse(server: &str) -> Result<Self, FeedError> {
        let trimmed = server.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some(("https", rest)) | Some(("wss", rest)) => ("wss", rest),
            Some(("http", rest)) | Some(("ws", rest)) => ("ws", rest),
            Some((other, _)) => return Err(FeedError::UnsupportedScheme(other.to_string())),
            None => ("ws", trimmed),
        };
        let rest = rest.trim_end_matches('/');
        // The url crate skips empty authorities for ws schemes, so check here.
        if rest.is_empty() || rest.starts_with('/') {
            return Err(FeedError::InvalidServer {
                url: server.to_string(),
                source: url::ParseError::EmptyHost,
            });
        }

        let base = Url::parse(&format!("{}://{}/ws", scheme, rest)).map_err(|source| {
            FeedError::InvalidServer {
                url: server.to_string(),
                source,
            }
        })?;
        Ok(Self { base })
    }

    pub fn as_url(&self) -> &Url {
        &self.base
    }

    /// The connection target for one room.
    pub fn target(&self, room: &str) -> FeedTarget {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("room", room);
        FeedTarget {
            room: room.to_string(),
            url,
        }
    }
}

/// A fully addressed, room-scoped feed connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTarget {
    pub room: String,
    pub url: Url,
}

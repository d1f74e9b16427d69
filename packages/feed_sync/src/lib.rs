//! Feed Sync - room feed synchronization engine
//!
//! This crate owns the client side of a realtime room feed: one live connection
//! at a time, the two-frame wire protocol (`history` snapshot vs. incremental
//! `message`), and an ordered, id-deduplicated transcript of the joined room.
//! It has no HTTP submission or rendering code; callers subscribe to
//! [`FeedEvent`]s and draw whatever they like.
//!
//! # Example
//!
//! ```no_run
//! use feed_sync::{FeedEndpoint, FeedEvent, TranscriptChange, WsConnector, spawn_feed};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), feed_sync::FeedError> {
//!     let endpoint = FeedEndpoint::parse("http://127.0.0.1:8000")?;
//!     let feed = spawn_feed(endpoint, WsConnector::new(), 256);
//!
//!     // Subscribe before joining so the first status change is not missed
//!     let mut events = feed.subscribe();
//!     feed.join("default").await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             FeedEvent::Status { status, .. } => println!("status: {}", status),
//!             FeedEvent::Transcript(TranscriptChange::Reset(messages)) => {
//!                 println!("history: {} messages", messages.len());
//!             }
//!             FeedEvent::Transcript(TranscriptChange::Appended(message)) => {
//!                 println!("{}: {}", message.agent, message.content);
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod actor;
mod controller;
mod error;
pub mod protocol;
mod transcript;
pub mod transport;
mod ws;

pub use actor::{FeedHandle, FeedState, spawn_feed};
pub use controller::{FeedController, FeedEvent, FeedStats, Status, TranscriptChange};
pub use error::FeedError;
pub use protocol::{DecodeError, Frame, Message, decode_frame};
pub use transcript::Transcript;
pub use transport::{
    Connector, EventSink, FeedEndpoint, FeedTarget, SessionEvent, SessionId, TransportEvent,
    TransportHandle,
};
pub use ws::WsConnector;

/// Errors surfaced to callers of the feed engine.
///
/// Transport failures are not errors here: they are status changes
/// (`Status::Errored` / `Status::Disconnected`) observed through the event stream.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("invalid server url '{url}': {source}")]
    InvalidServer {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported url scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    #[error("feed actor is gone")]
    ActorGone,

    #[error("feed actor didn't respond")]
    NoResponse,
}

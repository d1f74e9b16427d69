use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::controller::{FeedController, FeedEvent, FeedStats, Status};
use crate::error::FeedError;
use crate::protocol::Message;
use crate::transport::{Connector, FeedEndpoint, SessionEvent, SessionId};

/// Commands that can be sent to a feed actor
#[derive(Debug)]
enum FeedCommand {
    Join {
        room: String,
        respond_to: oneshot::Sender<SessionId>,
    },
    GetStatus {
        respond_to: oneshot::Sender<Status>,
    },
    GetState {
        respond_to: oneshot::Sender<FeedState>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<Vec<Message>>,
    },
    GetStats {
        respond_to: oneshot::Sender<FeedStats>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Point-in-time view of the engine
#[derive(Debug, Clone)]
pub struct FeedState {
    pub session: Option<SessionId>,
    pub room: Option<String>,
    pub status: Status,
    pub stats: FeedStats,
    pub messages: Vec<Message>,
}

/// Handle to communicate with a feed actor
#[derive(Clone)]
pub struct FeedHandle {
    sender: mpsc::Sender<FeedCommand>,
    events: broadcast::Sender<FeedEvent>,
}

impl FeedHandle {
    /// Start a fresh session for `room`, closing whatever was open.
    pub async fn join(&self, room: impl Into<String>) -> Result<SessionId, FeedError> {
        let room = room.into();
        self.request(|respond_to| FeedCommand::Join { room, respond_to })
            .await
    }

    pub async fn status(&self) -> Result<Status, FeedError> {
        self.request(|respond_to| FeedCommand::GetStatus { respond_to })
            .await
    }

    pub async fn state(&self) -> Result<FeedState, FeedError> {
        self.request(|respond_to| FeedCommand::GetState { respond_to })
            .await
    }

    /// The transcript in arrival order.
    pub async fn snapshot(&self) -> Result<Vec<Message>, FeedError> {
        self.request(|respond_to| FeedCommand::GetSnapshot { respond_to })
            .await
    }

    pub async fn stats(&self) -> Result<FeedStats, FeedError> {
        self.request(|respond_to| FeedCommand::GetStats { respond_to })
            .await
    }

    /// Status and transcript notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Close the current transport and stop the actor.
    pub async fn shutdown(&self) -> Result<(), FeedError> {
        self.request(|respond_to| FeedCommand::Shutdown { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> FeedCommand,
    ) -> Result<T, FeedError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| FeedError::ActorGone)?;
        rx.await.map_err(|_| FeedError::NoResponse)
    }
}

/// Spawn the engine on the current tokio runtime and return its handle.
///
/// `capacity` bounds the command, transport and notification channels. A slow
/// subscriber that falls more than `capacity` events behind sees `Lagged`.
pub fn spawn_feed(
    endpoint: FeedEndpoint,
    connector: impl Connector,
    capacity: usize,
) -> FeedHandle {
    let capacity = capacity.max(1);
    let (sender, commands) = mpsc::channel(capacity);
    let (session_tx, session_events) = mpsc::channel(capacity);
    let (events, _) = broadcast::channel(capacity);

    let controller = FeedController::new(
        endpoint,
        Box::new(connector),
        session_tx,
        events.clone(),
    );
    let actor = FeedActor {
        controller,
        commands,
        session_events,
    };
    tokio::spawn(actor.run());

    FeedHandle { sender, events }
}

struct FeedActor {
    controller: FeedController,
    commands: mpsc::Receiver<FeedCommand>,
    session_events: mpsc::Receiver<SessionEvent>,
}

impl FeedActor {
    async fn run(mut self) {
        debug!("feed actor started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(FeedCommand::Shutdown { respond_to }) => {
                        self.controller.close();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    // Every handle dropped
                    None => break,
                },
                Some(event) = self.session_events.recv() => self.controller.handle(event),
            }
        }

        self.controller.close();
        debug!("feed actor stopped");
    }

    fn handle_command(&mut self, cmd: FeedCommand) {
        match cmd {
            FeedCommand::Join { room, respond_to } => {
                let session = self.controller.join(&room);
                let _ = respond_to.send(session);
            }
            FeedCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.controller.status());
            }
            FeedCommand::GetState { respond_to } => {
                let _ = respond_to.send(FeedState {
                    session: self.controller.session_id(),
                    room: self.controller.room().map(str::to_string),
                    status: self.controller.status(),
                    stats: self.controller.stats(),
                    messages: self.controller.transcript().snapshot().to_vec(),
                });
            }
            FeedCommand::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.controller.transcript().snapshot().to_vec());
            }
            FeedCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.controller.stats());
            }
            FeedCommand::Shutdown { respond_to } => {
                // Handled in run()
                let _ = respond_to.send(());
            }
        }
    }
}

pub mod input;

use anyhow::{Context, Result};
use feed_sync::{
    FeedEndpoint, FeedEvent, FeedHandle, Message, Status, TranscriptChange, WsConnector,
    spawn_feed,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::api::{ApiClient, SubmitError, Submission};
use crate::config::{ChatConfig, FileConfig};
use crate::identity::{Identity, IdentityStore, normalize_room};
use crate::render;
use input::{HELP, Input, parse_input};

/// Follow a room and print its transcript until the feed ends.
/// Returns the terminal status (`Disconnected` or `Errored`), or `Live` when
/// interrupted.
pub async fn watch_command(
    config: &ChatConfig,
    file: &FileConfig,
    room: Option<String>,
) -> Result<Status> {
    let identity = IdentityStore::new(config.identity_path()).load();
    let room = resolve_room(room.as_deref(), &identity, file);

    let feed = start_feed(file)?;
    let mut events = feed.subscribe();
    feed.join(room.clone()).await?;

    let mut printer = Printer::new(&room);
    let status = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(status) = printer.show(&event) {
                        if status.is_terminal() {
                            break status;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => printer.resync(&feed, skipped).await?,
                Err(RecvError::Closed) => break Status::Errored,
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break feed.status().await?;
            }
        }
    };

    let _ = feed.shutdown().await;
    Ok(status)
}

/// Interactive room session: live transcript plus stdin submissions.
pub async fn chat_command(
    config: &ChatConfig,
    file: &FileConfig,
    room: Option<String>,
    agent: Option<String>,
    kind: Option<String>,
) -> Result<()> {
    let store = IdentityStore::new(config.identity_path());
    let identity = store.load();
    let mut room = resolve_room(room.as_deref(), &identity, file);
    let mut agent = resolve_agent(agent.as_deref(), &identity, file);
    let mut kind = kind.unwrap_or_else(|| file.kind.clone());

    let api = ApiClient::new(&file.server);
    let feed = start_feed(file)?;
    let mut events = feed.subscribe();
    feed.join(room.clone()).await?;

    match &agent {
        Some(name) => eprintln!("[agentchat: posting as {} ({}), /help for commands]", name, kind),
        None => eprintln!("[agentchat: no agent set, use /agent NAME before posting]"),
    }

    let mut printer = Printer::new(&room);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    printer.show(&event);
                }
                Err(RecvError::Lagged(skipped)) => printer.resync(&feed, skipped).await?,
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Say(text) => match &agent {
                        Some(name) => send(&api, &room, name, &kind, &text).await,
                        None => eprintln!("[agentchat: no agent set, use /agent NAME]"),
                    },
                    Input::Room(name) => {
                        room = normalize_room(&name);
                        if let Err(e) = store.set_room(&room) {
                            warn!(error = %e, "failed to persist room");
                        }
                        feed.join(room.clone()).await?;
                    }
                    Input::Reconnect => {
                        feed.join(room.clone()).await?;
                    }
                    Input::Agent(name) => match store.set_agent(&name) {
                        Ok(saved) => {
                            agent = saved.agent;
                            if let Some(name) = &agent {
                                eprintln!("[agentchat: posting as {}]", name);
                            }
                        }
                        Err(e) => eprintln!("[agentchat: {}]", e),
                    },
                    Input::Kind(value) => {
                        kind = value;
                        eprintln!("[agentchat: kind set to {}]", kind);
                    }
                    Input::Help => eprintln!("{}", HELP),
                    Input::Quit => break,
                    Input::MissingArgument(what) => eprintln!("[agentchat: /{} needs a value]", what),
                    Input::Unknown(command) => {
                        eprintln!("[agentchat: unknown command /{}, try /help]", command)
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = feed.shutdown().await;
    Ok(())
}

/// One-shot submission. Content comes from the arguments or, if empty, stdin.
pub async fn post_command(
    config: &ChatConfig,
    file: &FileConfig,
    room: Option<String>,
    agent: Option<String>,
    kind: Option<String>,
    content: Vec<String>,
) -> Result<()> {
    let identity = IdentityStore::new(config.identity_path()).load();
    let room = resolve_room(room.as_deref(), &identity, file);
    let kind = kind.unwrap_or_else(|| file.kind.clone());
    let agent = resolve_agent(agent.as_deref(), &identity, file).context(
        "agent name not set. Use --agent, set AGENTCHAT_AGENT, or run `agentchat whoami --agent NAME`",
    )?;

    let mut content = content.join(" ");
    if content.trim().is_empty() {
        tokio::io::stdin()
            .read_to_string(&mut content)
            .await
            .context("Failed to read content from stdin")?;
    }

    let submission = Submission::new(&room, &agent, &kind, &content)?;
    let api = ApiClient::new(&file.server);
    match api.submit(&submission).await {
        Ok(body) => {
            println!("{}", body);
            Ok(())
        }
        Err(SubmitError::Unavailable) => {
            anyhow::bail!("server {} is unavailable", api.base_url())
        }
        Err(e) => Err(e.into()),
    }
}

/// Print `server: <url> (ok|down)` and report whether it is up.
pub async fn check_command(file: &FileConfig) -> bool {
    let api = ApiClient::new(&file.server);
    let healthy = api.is_healthy().await;
    println!(
        "server: {} ({})",
        api.base_url(),
        if healthy { "ok" } else { "down" }
    );
    healthy
}

/// Show the effective identity, persisting any values given.
pub fn whoami_command(
    config: &ChatConfig,
    file: &FileConfig,
    agent: Option<String>,
    room: Option<String>,
) -> Result<()> {
    let store = IdentityStore::new(config.identity_path());
    if let Some(agent) = agent {
        let saved = store.set_agent(&agent)?;
        if let Some(agent) = saved.agent {
            println!("saved agent={} to {}", agent, store.path().display());
        }
    }
    if let Some(room) = room {
        let saved = store.set_room(&room)?;
        if let Some(room) = saved.room {
            println!("saved room={} to {}", room, store.path().display());
        }
    }

    let identity = store.load();
    println!(
        "agent:    {}",
        resolve_agent(None, &identity, file).unwrap_or_else(|| "<unset>".to_string())
    );
    println!("room:     {}", resolve_room(None, &identity, file));
    println!("server:   {}", file.server);
    println!("identity: {}", store.path().display());
    Ok(())
}

fn start_feed(file: &FileConfig) -> Result<FeedHandle> {
    let endpoint = FeedEndpoint::parse(&file.server)?;
    debug!(endpoint = %endpoint.as_url(), "starting feed");
    Ok(spawn_feed(endpoint, WsConnector::new(), file.channel_capacity))
}

async fn send(api: &ApiClient, room: &str, agent: &str, kind: &str, text: &str) {
    let result = match Submission::new(room, agent, kind, text) {
        Ok(submission) => api.submit(&submission).await.map(|_| ()),
        Err(e) => {
            eprintln!("[agentchat: not sent: {}]", e);
            return;
        }
    };
    if let Err(e) = result {
        warn!(error = %e, "submission failed");
        eprintln!("[agentchat: send failed: {}]", e);
    }
}

/// Room precedence: flag, then the identity file, then config.
fn resolve_room(flag: Option<&str>, identity: &Identity, file: &FileConfig) -> String {
    flag.map(normalize_room)
        .or_else(|| identity.room.clone())
        .unwrap_or_else(|| normalize_room(&file.room))
}

/// Agent precedence: flag, then the identity file, then config / env.
fn resolve_agent(flag: Option<&str>, identity: &Identity, file: &FileConfig) -> Option<String> {
    let non_blank = |value: &str| {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };
    flag.and_then(non_blank)
        .or_else(|| identity.agent.clone())
        .or_else(|| file.agent.as_deref().and_then(non_blank))
}

/// Prints feed events: transcript lines on stdout, banners on stderr.
struct Printer {
    room: String,
    status: Status,
    /// Something was printed since the last reset.
    printed_any: bool,
    /// Dedup key of the last printed line, if it had one.
    last_id: Option<String>,
}

impl Printer {
    fn new(room: &str) -> Self {
        Self {
            room: room.to_string(),
            status: Status::Idle,
            printed_any: false,
            last_id: None,
        }
    }

    /// Returns the new status for status events.
    fn show(&mut self, event: &FeedEvent) -> Option<Status> {
        match event {
            FeedEvent::Status { room, status, .. } => {
                self.room = room.clone();
                self.status = *status;
                eprintln!("{}", render::status_line(room, *status));
                Some(*status)
            }
            // A join empties the transcript before the new history arrives
            FeedEvent::Transcript(TranscriptChange::Reset(messages))
                if messages.is_empty() && self.status == Status::Connecting =>
            {
                self.forget();
                None
            }
            FeedEvent::Transcript(TranscriptChange::Reset(messages)) => {
                self.forget();
                eprintln!("{}", render::history_header(&self.room, messages.len()));
                for message in messages {
                    self.print(message);
                }
                None
            }
            FeedEvent::Transcript(TranscriptChange::Appended(message)) => {
                self.print(message);
                None
            }
        }
    }

    /// Catch up after falling behind the event stream: print what came after
    /// the last printed line, or the whole transcript when that line is gone.
    async fn resync(&mut self, feed: &FeedHandle, skipped: u64) -> Result<()> {
        warn!(skipped, "display fell behind the feed");
        let messages = feed.snapshot().await?;
        match self.unseen(&messages) {
            Some(fresh) => {
                for message in fresh {
                    self.print(message);
                }
            }
            None => {
                self.forget();
                eprintln!("{}", render::resync_header(&self.room, messages.len()));
                for message in &messages {
                    self.print(message);
                }
            }
        }
        Ok(())
    }

    /// The tail of `messages` not printed yet. `None` when the last printed
    /// line cannot be located in `messages`.
    fn unseen<'a>(&self, messages: &'a [Message]) -> Option<&'a [Message]> {
        if !self.printed_any {
            return Some(messages);
        }
        let last = self.last_id.as_deref()?;
        let pos = messages.iter().position(|m| m.dedup_key() == Some(last))?;
        Some(&messages[pos + 1..])
    }

    fn print(&mut self, message: &Message) {
        println!("{}", render::format_line(message));
        self.printed_any = true;
        self.last_id = message.dedup_key().map(str::to_string);
    }

    fn forget(&mut self) {
        self.printed_any = false;
        self.last_id = None;
    }
}

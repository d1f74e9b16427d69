//! Connection Controller
//!
//! Owns at most one session at a time and drives it through
//!
//! ```text
//! idle --join--> connecting --opened--> live --closed--> disconnected
//!                connecting|live --failed--> errored
//! any state --join--> connecting (new session, old handle closed first)
//! ```
//!
//! Decoded frames feed the [`Transcript`]; every status change and transcript
//! change is published as a [`FeedEvent`]. Nothing here reconnects on its own.

use std::fmt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::protocol::{Frame, Message, decode_frame};
use crate::transcript::Transcript;
use crate::transport::{
    Connector, EventSink, FeedEndpoint, SessionEvent, SessionId, TransportEvent, TransportHandle,
};

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No room joined yet.
    Idle,
    Connecting,
    Live,
    /// The far end closed the connection.
    Disconnected,
    /// The transport failed.
    Errored,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Connecting => "connecting",
            Status::Live => "live",
            Status::Disconnected => "disconnected",
            Status::Errored => "errored",
        }
    }

    /// The session has ended; only a new `join` leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Disconnected | Status::Errored)
    }

    fn accepts_transport_events(&self) -> bool {
        matches!(self, Status::Connecting | Status::Live)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the transcript changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptChange {
    /// A history snapshot replaced everything; carries the retained messages.
    Reset(Vec<Message>),
    /// One new message was appended.
    Appended(Message),
}

/// Notifications for the presentation side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Status {
        session: SessionId,
        room: String,
        status: Status,
    },
    Transcript(TranscriptChange),
}

/// Counters for things that are absorbed rather than surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub sessions_opened: u64,
    pub frames_applied: u64,
    pub duplicates_ignored: u64,
    pub decode_failures: u64,
    /// Events that arrived from a superseded session.
    pub stale_events: u64,
}

struct Session {
    id: SessionId,
    room: String,
    handle: Option<Box<dyn TransportHandle>>,
}

pub struct FeedController {
    endpoint: FeedEndpoint,
    connector: Box<dyn Connector>,
    events_tx: mpsc::Sender<SessionEvent>,
    notify: broadcast::Sender<FeedEvent>,
    session: Option<Session>,
    next_session: u64,
    status: Status,
    transcript: Transcript,
    stats: FeedStats,
}

impl FeedController {
    /// `events_tx` is the single channel every session reports into; whoever
    /// owns the receiving end feeds it back through [`FeedController::handle`].
    pub fn new(
        endpoint: FeedEndpoint,
        connector: Box<dyn Connector>,
        events_tx: mpsc::Sender<SessionEvent>,
        notify: broadcast::Sender<FeedEvent>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            events_tx,
            notify,
            session: None,
            next_session: 0,
            status: Status::Idle,
            transcript: Transcript::new(),
            stats: FeedStats::default(),
        }
    }

    /// Start a fresh session for `room`.
    ///
    /// The current transport (if any) is closed before the new one is opened,
    /// even when `room` is the room already joined. The transcript starts empty
    /// and is filled by the new session's history snapshot.
    pub fn join(&mut self, room: &str) -> SessionId {
        if let Some(mut previous) = self.session.take() {
            if let Some(mut handle) = previous.handle.take() {
                handle.close();
            }
            info!(session = %previous.id, room = %previous.room, "session superseded");
        }

        self.next_session += 1;
        let id = SessionId(self.next_session);
        let target = self.endpoint.target(room);
        info!(session = %id, room, url = %target.url, "joining room");

        let sink = EventSink::new(id, self.events_tx.clone());
        let handle = self.connector.open(&target, sink);
        self.session = Some(Session {
            id,
            room: room.to_string(),
            handle: Some(handle),
        });
        self.stats.sessions_opened += 1;
        self.set_status(Status::Connecting);

        // Nothing from the previous session carries over
        if !self.transcript.is_empty() {
            self.transcript.replace(Vec::new());
            self.publish(FeedEvent::Transcript(TranscriptChange::Reset(Vec::new())));
        }
        id
    }

    /// Apply one transport event.
    pub fn handle(&mut self, event: SessionEvent) {
        let SessionEvent { session, event } = event;

        if self.session_id() != Some(session) {
            self.stats.stale_events += 1;
            debug!(%session, current = ?self.session_id(), "dropping event from superseded session");
            return;
        }
        if !self.status.accepts_transport_events() {
            debug!(%session, status = %self.status, "dropping event after session ended");
            return;
        }

        match event {
            TransportEvent::Opened => {
                if self.status == Status::Connecting {
                    self.set_status(Status::Live);
                }
            }
            TransportEvent::Frame(text) => self.apply_frame(session, &text),
            TransportEvent::Closed => {
                info!(%session, "feed disconnected");
                self.release_handle();
                self.set_status(Status::Disconnected);
            }
            TransportEvent::Failed(reason) => {
                warn!(%session, %reason, "feed errored");
                self.release_handle();
                self.set_status(Status::Errored);
            }
        }
    }

    /// Drop the current transport without changing status (engine shutdown).
    pub fn close(&mut self) {
        self.release_handle();
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn room(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.room.as_str())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn stats(&self) -> FeedStats {
        self.stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.notify.subscribe()
    }

    fn apply_frame(&mut self, session: SessionId, text: &str) {
        match decode_frame(text) {
            Ok(Frame::History(messages)) => {
                self.transcript.replace(messages);
                self.stats.frames_applied += 1;
                debug!(%session, count = self.transcript.len(), "history snapshot applied");
                self.publish(FeedEvent::Transcript(TranscriptChange::Reset(
                    self.transcript.snapshot().to_vec(),
                )));
            }
            Ok(Frame::Message(message)) => {
                self.stats.frames_applied += 1;
                let id = message.id.clone();
                if self.transcript.append(message) {
                    if let Some(appended) = self.transcript.last().cloned() {
                        self.publish(FeedEvent::Transcript(TranscriptChange::Appended(appended)));
                    }
                } else {
                    self.stats.duplicates_ignored += 1;
                    debug!(%session, id = ?id, "duplicate message ignored");
                }
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(%session, error = %e, "discarding undecodable frame");
            }
        }
    }

    fn release_handle(&mut self) {
        if let Some(mut handle) = self.session.as_mut().and_then(|s| s.handle.take()) {
            handle.close();
        }
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
        if let Some(session) = &self.session {
            let event = FeedEvent::Status {
                session: session.id,
                room: session.room.clone(),
                status,
            };
            self.publish(event);
        }
    }

    fn publish(&self, event: FeedEvent) {
        // No subscribers is fine
        let _ = self.notify.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FeedTarget;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        opened: Vec<(SessionId, FeedTarget)>,
        closed: Vec<SessionId>,
        open_handles: HashSet<SessionId>,
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        log: Arc<Mutex<Recorded>>,
    }

    impl FakeConnector {
        fn open_handles(&self) -> usize {
            self.log.lock().unwrap().open_handles.len()
        }

        fn opened(&self) -> Vec<(SessionId, FeedTarget)> {
            self.log.lock().unwrap().opened.clone()
        }

        fn closed(&self) -> Vec<SessionId> {
            self.log.lock().unwrap().closed.clone()
        }
    }

    struct FakeHandle {
        session: SessionId,
        log: Arc<Mutex<Recorded>>,
        closed: bool,
    }

    impl TransportHandle for FakeHandle {
        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                let mut log = self.log.lock().unwrap();
                log.closed.push(self.session);
                log.open_handles.remove(&self.session);
            }
        }
    }

    impl Connector for FakeConnector {
        fn open(&mut self, target: &FeedTarget, sink: EventSink) -> Box<dyn TransportHandle> {
            let mut log = self.log.lock().unwrap();
            log.opened.push((sink.session(), target.clone()));
            log.open_handles.insert(sink.session());
            Box::new(FakeHandle {
                session: sink.session(),
                log: self.log.clone(),
                closed: false,
            })
        }
    }

    struct Harness {
        controller: FeedController,
        connector: FakeConnector,
        events: broadcast::Receiver<FeedEvent>,
        _session_rx: mpsc::Receiver<SessionEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let connector = FakeConnector::default();
            let (tx, rx) = mpsc::channel(16);
            let (notify, events) = broadcast::channel(64);
            let endpoint = FeedEndpoint::parse("http://127.0.0.1:8000").unwrap();
            let controller = FeedController::new(endpoint, Box::new(connector.clone()), tx, notify);
            Self {
                controller,
                connector,
                events,
                _session_rx: rx,
            }
        }

        fn send(&mut self, session: SessionId, event: TransportEvent) {
            self.controller.handle(SessionEvent { session, event });
        }

        fn frame(&mut self, session: SessionId, text: &str) {
            self.send(session, TransportEvent::Frame(text.to_string()));
        }

        fn drain(&mut self) -> Vec<FeedEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.events.try_recv() {
                out.push(ev);
            }
            out
        }

        fn ids(&self) -> Vec<Option<String>> {
            self.controller
                .transcript()
                .snapshot()
                .iter()
                .map(|m| m.id.clone())
                .collect()
        }

        fn live_session(&mut self, room: &str) -> SessionId {
            let id = self.controller.join(room);
            self.send(id, TransportEvent::Opened);
            self.drain();
            id
        }
    }

    fn statuses(events: &[FeedEvent]) -> Vec<Status> {
        events
            .iter()
            .filter_map(|e| match e {
                FeedEvent::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn starts_idle_without_session() {
        let h = Harness::new();
        assert_eq!(h.controller.status(), Status::Idle);
        assert!(h.controller.session_id().is_none());
        assert!(h.controller.room().is_none());
        assert!(h.controller.transcript().is_empty());
    }

    #[test]
    fn join_opens_room_scoped_target_and_reports_connecting() {
        let mut h = Harness::new();
        let id = h.controller.join("x");

        assert_eq!(h.controller.status(), Status::Connecting);
        assert_eq!(h.controller.room(), Some("x"));
        let opened = h.connector.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].0, id);
        assert_eq!(opened[0].1.url.as_str(), "ws://127.0.0.1:8000/ws?room=x");

        let events = h.drain();
        assert_eq!(
            events,
            vec![FeedEvent::Status {
                session: id,
                room: "x".to_string(),
                status: Status::Connecting,
            }]
        );
    }

    #[test]
    fn opened_moves_to_live() {
        let mut h = Harness::new();
        let id = h.controller.join("x");
        h.send(id, TransportEvent::Opened);
        assert_eq!(h.controller.status(), Status::Live);
        assert_eq!(
            statuses(&h.drain()),
            vec![Status::Connecting, Status::Live]
        );

        // A second Opened is not a transition
        h.send(id, TransportEvent::Opened);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn history_redelivery_then_new_message() {
        let mut h = Harness::new();
        let id = h.live_session("x");

        h.frame(
            id,
            r#"{"type":"history","data":[{"id":"1","room":"x","agent":"a","kind":"note","content":"hi"}]}"#,
        );
        assert_eq!(h.ids(), vec![Some("1".to_string())]);
        let events = h.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            FeedEvent::Transcript(TranscriptChange::Reset(msgs)) if msgs.len() == 1
        ));

        h.frame(
            id,
            r#"{"type":"message","data":{"id":"1","room":"x","agent":"a","kind":"note","content":"hi"}}"#,
        );
        assert_eq!(h.ids(), vec![Some("1".to_string())]);
        assert!(h.drain().is_empty());
        assert_eq!(h.controller.stats().duplicates_ignored, 1);

        h.frame(id, r#"{"type":"message","data":{"id":"2","content":"yo"}}"#);
        assert_eq!(
            h.ids(),
            vec![Some("1".to_string()), Some("2".to_string())]
        );
        let events = h.drain();
        assert!(matches!(
            &events[..],
            [FeedEvent::Transcript(TranscriptChange::Appended(m))] if m.content == "yo"
        ));
    }

    #[test]
    fn bare_message_frame_is_appended() {
        let mut h = Harness::new();
        let id = h.live_session("x");
        h.frame(id, r#"{"id":"5","agent":"codex","content":"bare"}"#);
        assert_eq!(h.ids(), vec![Some("5".to_string())]);
    }

    #[test]
    fn malformed_frame_is_counted_and_session_stays_live() {
        let mut h = Harness::new();
        let id = h.live_session("x");

        h.frame(id, "not json at all");
        h.frame(id, r#"{"type":"presence"}"#);
        h.frame(id, r#"{"type":"history","data":"nope"}"#);

        assert_eq!(h.controller.status(), Status::Live);
        assert_eq!(h.controller.stats().decode_failures, 3);
        assert!(h.controller.transcript().is_empty());
        assert!(h.drain().is_empty());

        // The session keeps working afterwards
        h.frame(id, r#"{"type":"message","data":{"id":"1","content":"ok"}}"#);
        assert_eq!(h.controller.transcript().len(), 1);
    }

    #[test]
    fn frames_without_a_message_leave_transcript_alone() {
        let mut h = Harness::new();
        let id = h.live_session("x");
        h.frame(id, r#"{"id":"1","content":"kept"}"#);
        h.drain();

        h.frame(id, "{}");
        h.frame(id, r#"{"ping":1}"#);
        h.frame(id, r#"{"ok":true}"#);

        assert_eq!(h.controller.stats().decode_failures, 3);
        assert_eq!(h.ids(), vec![Some("1".to_string())]);
        assert_eq!(h.controller.status(), Status::Live);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn superseded_session_events_are_ignored() {
        let mut h = Harness::new();
        let old = h.live_session("r1");
        h.frame(old, r#"{"type":"history","data":[{"id":"1","room":"r1"}]}"#);
        h.drain();

        let new = h.controller.join("r2");
        assert_ne!(old, new);
        assert_eq!(h.connector.closed(), vec![old]);
        h.drain();

        h.frame(old, r#"{"type":"history","data":[{"id":"9","room":"r1"}]}"#);
        h.frame(old, r#"{"type":"message","data":{"id":"10","room":"r1"}}"#);
        h.send(old, TransportEvent::Opened);
        h.send(old, TransportEvent::Closed);
        h.send(old, TransportEvent::Failed("late".to_string()));

        assert_eq!(h.controller.status(), Status::Connecting);
        assert_eq!(h.controller.room(), Some("r2"));
        assert!(h.controller.transcript().is_empty());
        assert!(h.drain().is_empty());
        assert_eq!(h.controller.stats().stale_events, 5);
    }

    #[test]
    fn join_clears_previous_room_transcript() {
        let mut h = Harness::new();
        let old = h.live_session("r1");
        h.frame(old, r#"{"type":"history","data":[{"id":"1","room":"r1"}]}"#);
        h.drain();

        h.controller.join("r2");
        assert!(h.controller.transcript().is_empty());
        let events = h.drain();
        assert_eq!(
            events.last(),
            Some(&FeedEvent::Transcript(TranscriptChange::Reset(vec![])))
        );

        let new = h.controller.session_id().unwrap();
        h.send(new, TransportEvent::Opened);
        h.frame(new, r#"{"type":"history","data":[{"id":"7","room":"r2"}]}"#);
        assert_eq!(h.ids(), vec![Some("7".to_string())]);
        assert!(h.controller.transcript().snapshot().iter().all(|m| m.room == "r2"));

        // Ids seen in r1 are forgotten
        h.frame(new, r#"{"type":"message","data":{"id":"1","room":"r2"}}"#);
        assert_eq!(h.ids(), vec![Some("7".to_string()), Some("1".to_string())]);
    }

    #[test]
    fn joining_same_room_twice_leaves_one_session() {
        let mut h = Harness::new();
        let first = h.controller.join("r1");
        let second = h.controller.join("r1");

        assert_ne!(first, second);
        assert_eq!(h.controller.session_id(), Some(second));
        assert_eq!(h.connector.opened().len(), 2);
        assert_eq!(h.connector.closed(), vec![first]);
        assert_eq!(h.connector.open_handles(), 1);
        assert_eq!(h.controller.status(), Status::Connecting);

        // The first session opening late does not make the second live
        h.send(first, TransportEvent::Opened);
        assert_eq!(h.controller.status(), Status::Connecting);
        h.send(second, TransportEvent::Opened);
        assert_eq!(h.controller.status(), Status::Live);
    }

    #[test]
    fn never_more_than_one_open_handle() {
        let mut h = Harness::new();
        for room in ["a", "b", "a", "c", "c"] {
            let id = h.controller.join(room);
            assert!(h.connector.open_handles() <= 1);
            h.send(id, TransportEvent::Opened);
            assert!(h.connector.open_handles() <= 1);
        }
        assert_eq!(h.controller.stats().sessions_opened, 5);
    }

    #[test]
    fn remote_close_then_rejoin() {
        let mut h = Harness::new();
        let first = h.live_session("x");
        h.frame(first, r#"{"type":"history","data":[{"id":"1","room":"x"}]}"#);
        h.drain();

        h.send(first, TransportEvent::Closed);
        assert_eq!(h.controller.status(), Status::Disconnected);
        assert_eq!(h.connector.open_handles(), 0);
        assert_eq!(statuses(&h.drain()), vec![Status::Disconnected]);

        // Frames after the close are not applied
        h.frame(first, r#"{"type":"message","data":{"id":"2"}}"#);
        assert_eq!(h.controller.transcript().len(), 1);

        // No retry until the caller joins again
        assert_eq!(h.connector.opened().len(), 1);

        let second = h.controller.join("x");
        assert_eq!(h.controller.status(), Status::Connecting);
        // Pre-close messages do not leak into the new session
        assert!(h.controller.transcript().is_empty());
        h.send(second, TransportEvent::Opened);
        assert_eq!(h.controller.status(), Status::Live);
        assert_eq!(
            statuses(&h.drain()),
            vec![Status::Connecting, Status::Live]
        );

        h.frame(second, r#"{"type":"history","data":[{"id":"3","room":"x"}]}"#);
        assert_eq!(h.ids(), vec![Some("3".to_string())]);
    }

    #[test]
    fn transport_failure_moves_to_errored() {
        let mut h = Harness::new();
        let id = h.live_session("x");
        h.send(id, TransportEvent::Failed("boom".to_string()));
        assert_eq!(h.controller.status(), Status::Errored);
        assert_eq!(h.connector.open_handles(), 0);

        // A close after the failure does not overwrite the status
        h.send(id, TransportEvent::Closed);
        assert_eq!(h.controller.status(), Status::Errored);
        assert_eq!(statuses(&h.drain()), vec![Status::Errored]);
    }

    #[test]
    fn failure_while_connecting_is_errored() {
        let mut h = Harness::new();
        let id = h.controller.join("x");
        h.send(id, TransportEvent::Failed("connection refused".to_string()));
        assert_eq!(h.controller.status(), Status::Errored);

        let again = h.controller.join("x");
        assert_eq!(h.controller.status(), Status::Connecting);
        assert_ne!(again, id);
    }

    #[test]
    fn reset_event_carries_deduplicated_snapshot() {
        let mut h = Harness::new();
        let id = h.live_session("x");
        h.frame(
            id,
            r#"{"type":"history","data":[{"id":"1","content":"a"},{"id":"1","content":"b"},{"content":"s"}]}"#,
        );
        let events = h.drain();
        let FeedEvent::Transcript(TranscriptChange::Reset(msgs)) = &events[0] else {
            panic!("Expected Reset");
        };
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "s"]);
    }

    #[test]
    fn close_releases_handle_without_status_change() {
        let mut h = Harness::new();
        h.live_session("x");
        h.controller.close();
        assert_eq!(h.connector.open_handles(), 0);
        assert_eq!(h.controller.status(), Status::Live);
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::Connecting.to_string(), "connecting");
        assert_eq!(Status::Errored.as_str(), "errored");
        assert!(Status::Disconnected.is_terminal());
        assert!(Status::Errored.is_terminal());
        assert!(!Status::Live.is_terminal());
        assert!(!Status::Idle.is_terminal());
    }
}

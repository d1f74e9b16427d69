use chrono::Local;
use feed_sync::{Message, Status};

/// `[time] (room) agent kind: content`
pub fn format_line(message: &Message) -> String {
    let agent = if message.agent.is_empty() {
        "unknown"
    } else {
        message.agent.as_str()
    };
    let kind = if message.kind.is_empty() {
        "status"
    } else {
        message.kind.as_str()
    };
    format!(
        "[{}] ({}) {} {}: {}",
        format_time(message),
        message.room,
        agent,
        kind,
        message.content
    )
}

/// Local `HH:MM:SS` when the timestamp parses, otherwise the raw value.
pub fn format_time(message: &Message) -> String {
    match message.parsed_timestamp() {
        Some(ts) => ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => message.timestamp.clone().unwrap_or_default(),
    }
}

pub fn status_line(room: &str, status: Status) -> String {
    let label = match status {
        Status::Idle => "idle",
        Status::Connecting => "connecting…",
        Status::Live => "live",
        Status::Disconnected => "disconnected",
        Status::Errored => "error",
    };
    format!("[agentchat: {} ({})]", label, room)
}

pub fn history_header(room: &str, count: usize) -> String {
    match count {
        0 => format!("[agentchat: no history in ({})]", room),
        1 => format!("[agentchat: 1 message in ({})]", room),
        n => format!("[agentchat: {} messages in ({})]", n, room),
    }
}

pub fn resync_header(room: &str, count: usize) -> String {
    format!("[agentchat: resynced ({}), reprinting {} messages]", room, count)
}

/// One line typed into `agentchat chat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    /// Text to submit as a message
    Say(String),
    Room(String),
    Reconnect,
    Agent(String),
    Kind(String),
    Help,
    Quit,
    /// A slash command that needs an argument but got none
    MissingArgument(&'static str),
    Unknown(String),
}

pub const HELP: &str = "\
commands:
  /room NAME     switch room
  /reconnect     rejoin the current room
  /agent NAME    post as NAME (saved)
  /kind KIND     message kind for following posts
  /quit          exit
  //text         send text starting with '/'";

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if let Some(escaped) = line.strip_prefix("//") {
        return Input::Say(format!("/{}", escaped));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    let with_arg = |label: &'static str, make: fn(String) -> Input| {
        if arg.is_empty() {
            Input::MissingArgument(label)
        } else {
            make(arg.to_string())
        }
    };

    match name {
        "room" | "join" => with_arg("room", Input::Room),
        "agent" => with_arg("agent", Input::Agent),
        "kind" => with_arg("kind", Input::Kind),
        "reconnect" => Input::Reconnect,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

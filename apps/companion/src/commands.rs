//! User intents read from the terminal.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Start,
    Stop,
    Status,
    /// Local sorted/filtered view.
    Entities,
    /// `GET /cheat_sheet` straight from the worker.
    Fetch,
    Filter(String),
    Timeline,
    Transcript,
    LlmLog,
    Title(String),
    Ask(String),
    Reset,
    Help,
    Quit,
}

impl UserCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let needs_arg = |usage: &str| {
            if rest.is_empty() {
                Err(format!("usage: {usage}"))
            } else {
                Ok(rest.to_string())
            }
        };

        match verb.to_ascii_lowercase().as_str() {
            "start" | "on" => Ok(UserCommand::Start),
            "stop" | "off" => Ok(UserCommand::Stop),
            "status" => Ok(UserCommand::Status),
            "entities" | "ls" => Ok(UserCommand::Entities),
            "fetch" => Ok(UserCommand::Fetch),
            "filter" => Ok(UserCommand::Filter(if rest.is_empty() {
                "all".to_string()
            } else {
                rest.to_string()
            })),
            "timeline" => Ok(UserCommand::Timeline),
            "transcript" => Ok(UserCommand::Transcript),
            "llm" => Ok(UserCommand::LlmLog),
            "title" => needs_arg("title <text>").map(UserCommand::Title),
            "ask" => needs_arg("ask <question>").map(UserCommand::Ask),
            "reset" | "clear" => Ok(UserCommand::Reset),
            "help" | "?" => Ok(UserCommand::Help),
            "quit" | "exit" | "q" => Ok(UserCommand::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command `{other}`; type `help`")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UserCommand::Start => "start",
            UserCommand::Stop => "stop",
            UserCommand::Status => "status",
            UserCommand::Entities => "entities",
            UserCommand::Fetch => "fetch",
            UserCommand::Filter(_) => "filter",
            UserCommand::Timeline => "timeline",
            UserCommand::Transcript => "transcript",
            UserCommand::LlmLog => "llm",
            UserCommand::Title(_) => "title",
            UserCommand::Ask(_) => "ask",
            UserCommand::Reset => "reset",
            UserCommand::Help => "help",
            UserCommand::Quit => "quit",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(UserCommand),
    /// Unusable line; the loop reports it and keeps reading.
    Invalid(String),
    Closed,
}

/// Next non-blank command line. `buf` holds a partially read line across
/// calls, so the future can be dropped inside `select!` without losing input.
pub async fn read_input<R>(reader: &mut R, buf: &mut Vec<u8>) -> Input
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match reader.read_until(b'\n', buf).await {
            Ok(0) if buf.is_empty() => return Input::Closed,
            Ok(_) => {}
            Err(err) => {
                warn!("reading commands failed: {err}");
                return Input::Closed;
            }
        }
        let decoded = std::str::from_utf8(buf).map(|line| line.trim().to_string());
        buf.clear();
        match decoded {
            Err(_) => return Input::Invalid("input is not valid UTF-8; ignored".to_string()),
            Ok(line) if line.is_empty() => continue,
            Ok(line) => {
                return match UserCommand::parse(&line) {
                    Ok(command) => Input::Command(command),
                    Err(message) => Input::Invalid(message),
                }
            }
        }
    }
}

pub const HELP: &str = "\
commands:
  start | stop            launch / stop the worker
  status                  effective status plus the worker's own report
  entities                cheat sheet view (sorted, filtered)
  fetch                   fetch the cheat sheet from the worker
  filter <type|all>       filter the cheat sheet view by type
  timeline | transcript   timeline / transcript views
  llm                     LLM exchanges seen this session
  title <text>            set the session title (sent before each start)
  ask <question>          ask the worker's LLM
  reset                   clear the local view
  quit";

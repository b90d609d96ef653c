use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::SupervisorEvent;

/// How to launch the worker. Stdin is closed, both output streams are piped
/// and the child is killed if its handle is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Diagnostic stream: every line becomes a log notification.
pub(crate) async fn forward_stderr<R>(stream: R, events: mpsc::UnboundedSender<SupervisorEvent>)
where
    R: AsyncRead + Unpin,
{
    read_lines(stream, "stderr", |line| {
        warn!(target: "worker", "{line}");
        let _ = events.send(SupervisorEvent::Log(line));
    })
    .await;
}

pub(crate) async fn trace_stdout<R>(stream: R)
where
    R: AsyncRead + Unpin,
{
    read_lines(stream, "stdout", |line| debug!(target: "worker", "{line}")).await;
}

/// Drains `stream` until EOF. Bytes that are not UTF-8 are replaced rather
/// than ending the read, so the worker never writes into a closed pipe.
pub(crate) async fn read_lines<R>(stream: R, name: &str, mut on_line: impl FnMut(String))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("supervisor: worker {name} closed");
                return;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(['\r', '\n']).to_string());
            }
            Err(err) => {
                warn!("supervisor: reading worker {name} failed: {err}");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;

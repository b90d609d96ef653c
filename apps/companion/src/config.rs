use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use client_core::ReconnectPolicy;
use serde::Deserialize;
use supervisor::{SupervisorConfig, WorkerCommand};
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "companion.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub event_path: String,
    pub activation_grace_ms: u64,
    pub kill_grace_ms: u64,
    pub request_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Global interpreter used when no virtualenv interpreter is found.
    pub python: String,
    pub venv_python: Option<PathBuf>,
    pub worker_script: PathBuf,
    pub worker_dir: Option<PathBuf>,
    /// Sent to the worker before every start when set.
    pub session_title: Option<String>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            event_path: "/events".into(),
            activation_grace_ms: 3000,
            kill_grace_ms: 3000,
            request_timeout_secs: 10,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 10_000,
            python: default_python().into(),
            venv_python: None,
            worker_script: PathBuf::from("backend").join("app.py"),
            worker_dir: None,
            session_title: None,
            log_filter: "info".into(),
        }
    }
}

fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

impl Settings {
    /// A zero request timeout fails every call and a zero reconnect delay
    /// spins while the worker is down.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_max_ms == 0 {
            anyhow::bail!("reconnect_initial_ms and reconnect_max_ms must be at least 1");
        }
        Ok(())
    }

    pub fn control_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            activation_grace: Duration::from_millis(self.activation_grace_ms),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_initial_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms)),
        }
    }

    /// Prefers the virtualenv interpreter when it exists on disk.
    pub fn resolve_interpreter(&self) -> PathBuf {
        match &self.venv_python {
            Some(venv) if venv.is_file() => {
                info!(interpreter = %venv.display(), "using virtualenv interpreter");
                venv.clone()
            }
            Some(venv) => {
                info!(
                    missing = %venv.display(),
                    interpreter = %self.python,
                    "virtualenv interpreter not found, using global interpreter"
                );
                PathBuf::from(&self.python)
            }
            None => {
                info!(interpreter = %self.python, "using global interpreter");
                PathBuf::from(&self.python)
            }
        }
    }

    /// The worker always runs unbuffered so its output arrives line by line.
    pub fn worker_command(&self) -> WorkerCommand {
        let mut command = WorkerCommand::new(self.resolve_interpreter())
            .arg("-u")
            .arg(self.worker_script.display().to_string())
            .env("PYTHONUNBUFFERED", "1");
        if let Some(dir) = &self.worker_dir {
            command = command.current_dir(dir);
        }
        command
    }
}

/// Defaults, then the TOML file, then environment overrides. CLI flags are
/// applied by the caller on top.
///
/// An explicitly named file must exist; the default `companion.toml` is
/// optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = apply_env_overrides(read_settings_file(path)?, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: Option<&Path>) -> anyhow::Result<Settings> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Settings::default());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()));
        }
    };

    let settings = toml::from_str::<Settings>(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
    info!(path = %path.display(), "loaded config file");
    Ok(settings)
}

/// Both `COMPANION_<KEY>` and `APP__<KEY>` spellings are honoured; `APP__`
/// wins when both are set. Unparseable numbers are ignored.
pub fn apply_env_overrides(
    mut settings: Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Settings {
    let var = |key: &str| {
        lookup(&format!("APP__{key}")).or_else(|| lookup(&format!("COMPANION_{key}")))
    };

    if let Some(v) = var("HOST") {
        settings.host = v;
    }
    override_parsed(&mut settings.port, var("PORT"));
    if let Some(v) = var("EVENT_PATH") {
        settings.event_path = v;
    }
    override_parsed(&mut settings.activation_grace_ms, var("ACTIVATION_GRACE_MS"));
    override_parsed(&mut settings.kill_grace_ms, var("KILL_GRACE_MS"));
    override_parsed(&mut settings.request_timeout_secs, var("REQUEST_TIMEOUT_SECS"));
    override_parsed(&mut settings.reconnect_initial_ms, var("RECONNECT_INITIAL_MS"));
    override_parsed(&mut settings.reconnect_max_ms, var("RECONNECT_MAX_MS"));
    if let Some(v) = var("PYTHON") {
        settings.python = v;
    }
    if let Some(v) = var("VENV_PYTHON") {
        settings.venv_python = Some(PathBuf::from(v));
    }
    if let Some(v) = var("WORKER_SCRIPT") {
        settings.worker_script = PathBuf::from(v);
    }
    if let Some(v) = var("WORKER_DIR") {
        settings.worker_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = var("SESSION_TITLE") {
        settings.session_title = Some(v);
    }
    if let Some(v) = var("LOG_FILTER") {
        settings.log_filter = v;
    }

    settings
}

fn override_parsed<T: FromStr>(slot: &mut T, raw: Option<String>) {
    if let Some(parsed) = raw.and_then(|raw| raw.trim().parse::<T>().ok()) {
        *slot = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

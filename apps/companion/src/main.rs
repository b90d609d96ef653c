use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use client_core::ChannelEvent;
use reconciler::{Change, EntityFilter};
use supervisor::{StartOutcome, StopOutcome, SupervisorEvent};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod controller;

use commands::{read_input, Input, UserCommand, HELP};
use controller::{
    events::{AppEvent, UiError},
    session::{Session, SessionView},
};

#[derive(Parser, Debug)]
#[command(about = "Supervises the companion worker and mirrors its live view")]
struct Args {
    /// TOML config file (defaults to ./companion.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    python: Option<String>,
    #[arg(long)]
    venv_python: Option<PathBuf>,
    #[arg(long)]
    worker_script: Option<PathBuf>,
    #[arg(long)]
    worker_dir: Option<PathBuf>,
    /// Session title sent to the worker before starting.
    #[arg(long)]
    title: Option<String>,
    /// Start the worker right away.
    #[arg(long)]
    autostart: bool,
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn apply(self, settings: &mut config::Settings) {
        if let Some(v) = self.host {
            settings.host = v;
        }
        if let Some(v) = self.port {
            settings.port = v;
        }
        if let Some(v) = self.python {
            settings.python = v;
        }
        if let Some(v) = self.venv_python {
            settings.venv_python = Some(v);
        }
        if let Some(v) = self.worker_script {
            settings.worker_script = v;
        }
        if let Some(v) = self.worker_dir {
            settings.worker_dir = Some(v);
        }
        if let Some(v) = self.title {
            settings.session_title = Some(v);
        }
        if let Some(v) = self.log_filter {
            settings.log_filter = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let autostart = args.autostart;
    let mut settings = config::load_settings(args.config.as_deref())?;
    args.apply(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (session, mut app_rx) = Session::open(&settings)?;
    let mut view = SessionView::new();
    println!("{HELP}");
    if autostart {
        dispatch(&session, &mut view, UserCommand::Start);
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut pending = Vec::new();
    loop {
        tokio::select! {
            input = read_input(&mut stdin, &mut pending) => match input {
                Input::Command(UserCommand::Quit) | Input::Closed => break,
                Input::Command(command) => dispatch(&session, &mut view, command),
                Input::Invalid(message) => println!("{message}"),
            },
            Some(event) = app_rx.recv() => {
                let change = view.apply(&event, Utc::now());
                render_event(&event, change.as_ref(), &view);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    Ok(())
}

/// View commands run inline; anything that talks to the worker runs on its
/// own task and reports back through the event stream.
fn dispatch(session: &Session, view: &mut SessionView, command: UserCommand) {
    tracing::debug!(command = command.name(), "dispatching user command");
    match command {
        UserCommand::Entities => print_entities(view),
        UserCommand::Filter(raw) => {
            view.set_filter(EntityFilter::parse(&raw));
            println!(
                "filter: {:?} (types: {})",
                view.reconciler().filter(),
                view.reconciler().entity_types().join(", ")
            );
            print_entities(view);
        }
        UserCommand::Timeline => {
            for event in view.reconciler().timeline_view() {
                println!(
                    "  {:<12} {} - {}",
                    event.date.as_deref().unwrap_or("(undated)"),
                    event.name,
                    event.description
                );
            }
        }
        UserCommand::Transcript => {
            for line in view.reconciler().transcript() {
                println!("  [{}] {}", line.received_at.format("%H:%M:%S"), line.text);
            }
        }
        UserCommand::LlmLog => {
            for exchange in view.reconciler().llm_log() {
                println!("  [{}]", exchange.received_at.format("%H:%M:%S"));
                if let Some(prompt) = &exchange.prompt {
                    println!("    prompt: {prompt}");
                }
                if let Some(response) = &exchange.response {
                    println!("    response: {response}");
                }
            }
        }
        UserCommand::Reset => {
            view.reset();
            println!("view cleared");
        }
        UserCommand::Help => println!("{HELP}"),
        UserCommand::Status => {
            println!(
                "status: {} (worker: {}, channel: {}, last report: {})",
                view.effective_status().label(),
                session.worker_state(),
                if view.is_channel_connected() { "connected" } else { "disconnected" },
                view.last_status().unwrap_or("-")
            );
            let session = session.clone();
            tokio::spawn(async move {
                let status = session.get_status().await;
                let title = session.session_title().await.unwrap_or_else(|| "-".to_string());
                let report = match status.error {
                    Some(error) => format!("worker status unavailable: {error}"),
                    None => format!(
                        "worker reports listening={} cheat_sheet_size={} title={title}",
                        status.is_listening,
                        status
                            .cheat_sheet_size
                            .map_or_else(|| "?".to_string(), |size| size.to_string())
                    ),
                };
                session.report(AppEvent::Notice(report));
            });
        }
        UserCommand::Start => {
            let session = session.clone();
            tokio::spawn(async move {
                let event = match session.start_worker().await {
                    Ok(StartOutcome::Activated(ack)) => {
                        AppEvent::Notice(format!("worker activated: {}", ack.status))
                    }
                    Ok(StartOutcome::AlreadyActive(state)) => {
                        AppEvent::Notice(format!("worker already {state}"))
                    }
                    Err(err) => AppEvent::Error(err),
                };
                session.report(event);
            });
        }
        UserCommand::Stop => {
            let session = session.clone();
            tokio::spawn(async move {
                let notice = match session.stop_worker().await {
                    StopOutcome::Stopping => "stop requested".to_string(),
                    StopOutcome::AlreadyStopped(state) => format!("nothing to stop ({state})"),
                };
                session.report(AppEvent::Notice(notice));
            });
        }
        UserCommand::Fetch => {
            let session = session.clone();
            tokio::spawn(async move {
                let entities = session.get_entities().await;
                let names: Vec<String> = entities.into_iter().map(|entity| entity.name).collect();
                session.report(AppEvent::Notice(format!(
                    "worker cheat sheet ({}): {}",
                    names.len(),
                    names.join(", ")
                )));
            });
        }
        UserCommand::Title(title) => {
            let session = session.clone();
            tokio::spawn(async move {
                let event = match session.set_session_title(&title).await {
                    Ok(ack) if ack.success => AppEvent::Notice(format!(
                        "title set: {}",
                        ack.title.unwrap_or(title)
                    )),
                    Ok(_) => AppEvent::Notice("worker did not accept the title".to_string()),
                    Err(err) => AppEvent::Error(err),
                };
                session.report(event);
            });
        }
        UserCommand::Ask(question) => {
            let session = session.clone();
            tokio::spawn(async move {
                let event = match session.ask(&question).await {
                    Ok(answer) => AppEvent::Notice(format!("answer: {answer}")),
                    Err(err) => AppEvent::Error(err),
                };
                session.report(event);
            });
        }
        UserCommand::Quit => {}
    }
}

fn print_entities(view: &SessionView) {
    let highlighted = view.reconciler().highlighted();
    for entity in view.reconciler().entity_view() {
        let marker = if highlighted == Some(entity.name.as_str()) { "*" } else { " " };
        println!("{marker} {} [{}]: {}", entity.name, entity.kind, entity.description);
    }
}

fn render_event(event: &AppEvent, change: Option<&Change>, view: &SessionView) {
    match event {
        AppEvent::Supervisor(SupervisorEvent::StateChanged(state)) => {
            println!("[worker] {state} => {}", view.effective_status().label());
        }
        AppEvent::Supervisor(SupervisorEvent::Log(line)) => println!("[worker log] {line}"),
        AppEvent::Supervisor(SupervisorEvent::Exited { code, forced }) => println!(
            "[worker] exited (code {}){}",
            code.map_or_else(|| "none".to_string(), |code| code.to_string()),
            if *forced { ", killed" } else { "" }
        ),
        AppEvent::Supervisor(SupervisorEvent::Failure(message)) => println!("[error] {message}"),
        AppEvent::Channel(ChannelEvent::Connected) => {
            println!("[channel] connected => {}", view.effective_status().label())
        }
        AppEvent::Channel(ChannelEvent::Disconnected { reason }) => {
            println!("[channel] disconnected ({reason}) => {}", view.effective_status().label())
        }
        AppEvent::Channel(ChannelEvent::Malformed { .. }) => {}
        AppEvent::Channel(ChannelEvent::Event(_)) => {
            if let Some(change) = change {
                render_change(change, view);
            }
        }
        AppEvent::Notice(message) => println!("{message}"),
        AppEvent::Error(err) => print_error(err),
    }
}

fn render_change(change: &Change, view: &SessionView) {
    match change {
        Change::Status(message) => {
            println!("[status] {message} => {}", view.effective_status().label())
        }
        Change::EntitiesReplaced { count } => println!("[cheat sheet] {count} entries"),
        Change::EntityUpserted { name, inserted } => {
            let verb = if *inserted { "added" } else { "updated" };
            println!("[cheat sheet] {verb} {name}");
        }
        Change::EntitiesCleared => println!("[cheat sheet] cleared"),
        Change::TranscriptReplaced { count } => println!("[transcript] {count} lines"),
        Change::TranscriptAppended { highlighted } => {
            if let Some(line) = view.reconciler().transcript().last() {
                match highlighted {
                    Some(name) => println!("[transcript] {} (* {name})", line.text),
                    None => println!("[transcript] {}", line.text),
                }
            }
        }
        Change::TranscriptCleared => println!("[transcript] cleared"),
        Change::TimelineReplaced { count } => println!("[timeline] {count} events"),
        Change::TimelineUpserted { name, inserted } => {
            let verb = if *inserted { "added" } else { "updated" };
            println!("[timeline] {verb} {name}");
        }
        Change::LlmExchangeRecorded => println!("[llm] exchange recorded"),
    }
}

fn print_error(err: &UiError) {
    println!("[error] {:?}/{:?}: {}", err.context(), err.category(), err.message());
}

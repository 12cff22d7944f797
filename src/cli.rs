use crate::logging;
use crate::model::SessionConfig;
use crate::modules::load_modules;
use crate::orchestrator::{RunController, RunEvent};
use crate::output::{spawn_output_writer, Console};
use crate::session::{Flow, Session};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

const DATA_DIR_NAME: &str = ".oblivion";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "oblivion",
    version,
    about = "Interactive reconnaissance console with pluggable scan modules"
)]
pub struct Cli {
    /// Session data directory (log file). Defaults to ~/.oblivion
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "oblivion=trace". RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Do not write a session log
    #[arg(long)]
    pub no_log: bool,

    /// Run a console command and exit; repeat for several commands
    #[arg(short = 'x', long = "execute", value_name = "CMD")]
    pub execute: Vec<String>,

    /// Plain output without colours
    #[arg(long)]
    pub no_color: bool,
}

/// Build a `SessionConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SessionConfig {
    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(DATA_DIR_NAME)))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME));
    SessionConfig {
        data_dir,
        log_level: args.log_level.clone(),
        log_to_file: !args.no_log,
        script: args.execute.clone(),
        color: !args.no_color,
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let _log = logging::init(&cfg)?;

    let (out_tx, out_handle) = spawn_output_writer();
    let console = Console::new(out_tx, cfg.color);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let mut session = Session::new(load_modules(), RunController::new(event_tx), console.clone());

    if cfg.script.is_empty() {
        interactive(&mut session, &console, event_rx).await;
    } else {
        scripted(&mut session, &cfg.script, event_rx).await;
    }

    drop(session);
    drop(console);
    let _ = out_handle.await;
    Ok(())
}

/// Run `-x` commands in order, then wait for background runs they started.
async fn scripted(session: &mut Session, script: &[String], mut events: mpsc::UnboundedReceiver<RunEvent>) {
    info!(commands = script.len(), "running scripted session");
    for line in script {
        if session.execute(line).await == Flow::Exit {
            return;
        }
    }
    while session.has_background_runs() {
        match events.recv().await {
            Some(event) => session.report(&event),
            None => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        session.report(&event);
    }
    session.shutdown();
}

async fn interactive(session: &mut Session, console: &Console, mut events: mpsc::UnboundedReceiver<RunEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    console.prompt(&session.prompt());

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if session.execute(&line).await == Flow::Exit {
                        break;
                    }
                }
                // Ctrl-D
                Ok(None) => {
                    console.line("");
                    session.execute("exit").await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "reading console input failed");
                    console.error(format!("Error reading command line: {e}"));
                    session.shutdown();
                    break;
                }
            },
            Some(event) = events.recv() => {
                console.line("");
                session.report(&event);
            }
            _ = tokio::signal::ctrl_c() => {
                console.line("^C");
            }
        }
        console.prompt(&session.prompt());
    }
}

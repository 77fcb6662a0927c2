use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use nanosynth_embed::{
    find_ugen_plugins_path, EmbeddedEngine, EngineEvent, EngineOptions, DEFAULT_BIND_ADDRESS,
    DEFAULT_PORT,
};
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(
    name = "embedded_server",
    about = "Run the embedded synthesis server until it receives /quit"
)]
struct Cli {
    /// Address to bind the UDP command listener
    #[arg(long, default_value = DEFAULT_BIND_ADDRESS)]
    bind: String,
    /// Port for the UDP command listener
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// JSON file with engine options (defaults apply when omitted)
    #[arg(long)]
    options: Option<PathBuf>,
    /// Engine verbosity; negative values silence engine output
    #[arg(long, default_value_t = 0)]
    verbosity: i32,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut options = cli
        .options
        .map(EngineOptions::load_from_file)
        .unwrap_or_default();
    options.verbosity = cli.verbosity;
    if options.ugen_plugins_path.is_none() {
        options.ugen_plugins_path =
            find_ugen_plugins_path().map(|path| path.display().to_string());
    }

    let engine = EmbeddedEngine::new();
    let mut events = engine.subscribe();
    engine
        .boot(&options, &cli.bind, cli.port)
        .with_context(|| format!("booting embedded server on {}:{}", cli.bind, cli.port))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building event runtime")?;

    let code = runtime.block_on(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Quit) => break ExitCode::from(0),
                Ok(EngineEvent::Panic) => break ExitCode::from(2),
                Ok(EngineEvent::Booted) | Ok(EngineEvent::LogLine(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break ExitCode::from(0),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    });

    Ok(code)
}

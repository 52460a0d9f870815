mod cli;
mod commands;
mod error;
mod output;

use std::ffi::OsStr;
use std::io;
use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use depsync_config::{Config, LogFormat, LogSettings};

use crate::cli::{Cli, Command};
use crate::commands::deps::Action;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings live in the config, so resolve it before tracing.
    let config = commands::resolve_config(&cli.global);
    let log = config
        .as_ref()
        .map(|c| c.log.clone())
        .unwrap_or_default();
    let guard = init_tracing(cli.global.verbose, &log);

    if let Err(err) = run(cli, config).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        drop(guard);
        std::process::exit(code);
    }
}

/// Stderr logging per `log.format`, plus an optional plain-text file sink.
/// The returned guard flushes the file writer when dropped.
fn init_tracing(verbosity: u8, log: &LogSettings) -> Option<WorkerGuard> {
    let level = match verbosity {
        0 => log.level.to_ascii_lowercase(),
        1 => "info".into(),
        2 => "debug".into(),
        _ => "trace".into(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = match log.format {
        LogFormat::Text => fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
    };

    let (file_layer, guard) = match &log.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(OsStr::new("depsync.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

async fn run(cli: Cli, config: Result<Config, CliError>) -> Result<(), CliError> {
    let global = &cli.global;
    let action = match cli.command {
        // Config commands don't need a daemon connection
        Command::Config(args) => return commands::config_cmd::handle(&args, global, config),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "depsync", &mut io::stdout());
            return Ok(());
        }

        Command::Watch => return commands::watch::handle(&config?, global).await,

        Command::Show => Action::Show,
        Command::Refresh => Action::Refresh,
        Command::Add(args) => Action::add(&args)?,
        Command::Remove(args) => Action::remove(&args)?,
        Command::Set(args) => Action::set(args.target),
    };

    commands::deps::handle(action, &config?, global).await
}

use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use coldmirror::cli::{Cli, Commands};
use coldmirror::commands;
use coldmirror::config::Config;
use coldmirror::notify::LogNotifier;
use coldmirror::transfer::cancel_pair;

// stderr gets warnings (or RUST_LOG); --verbose adds a debug log file under the state dir
fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));
    if !config.verbose {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    }
    let dir = config.logs_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("cannot create log directory {}: {}", dir.display(), e);
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    }
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "coldmirror.log"));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("coldmirror=debug,cm=debug"));
    tracing_subscriber::registry().with(stderr_layer).with(file_layer).init();
    Some(guard)
}

fn run(command: Option<Commands>, config: &Config) -> anyhow::Result<()> {
    // the handle must outlive the batch; dropping it cancels
    let (cancel, token) = cancel_pair();
    let on_interrupt = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        eprintln!("interrupted, finishing in-flight objects");
        on_interrupt.cancel();
    }) {
        tracing::warn!("failed to set Ctrl-C handler: {}", err);
    }
    match command {
        None | Some(Commands::Backup) => {
            commands::handle_backup(config, &LogNotifier, &token)?;
        }
        Some(Commands::Restore { .. }) => {
            commands::handle_restore(config, &token)?;
        }
        Some(Commands::Decompress { file, output_dir }) => {
            commands::handle_decompress(config, &file, &output_dir)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = cli.global.to_config();
    if let Some(Commands::Restore { archive_bucket: Some(bucket) }) = &cli.command {
        config.archive_bucket = Some(bucket.clone());
    }
    let _guard = init_logging(&config);
    tracing::debug!("config: {}", serde_json::to_string(&config).unwrap_or_default());

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

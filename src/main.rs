//! tcp-relay - Transparent TCP relay
//!
//! This is the main entry point for the tcp-relay CLI application.

use clap::Parser;
use std::process;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use tcp_relay::cli::{self, CliArgs, Commands};
use tcp_relay::common::error::{EXIT_FAILURE, EXIT_USAGE};

// 中継は単一スレッドのイベントループで駆動する
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    // Initialize logging
    let _guard = match init_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_FAILURE);
        }
    };

    // Execute subcommand
    let result = match args.command {
        Commands::Start(cmd) => cli::commands::start::execute(cmd).await,
        Commands::Up(cmd) => cli::commands::up::execute(cmd).await,
        Commands::Config(cmd) => cli::commands::config::execute(cmd).await,
        Commands::Version => cli::commands::version::execute().await,
    };

    // Error handling
    if let Err(e) = result {
        error!("Command execution failed: {}", e);
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

/// Initialize the logging system
fn init_logging(args: &CliArgs) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = || -> Result<EnvFilter, Box<dyn std::error::Error>> {
        Ok(EnvFilter::from_default_env().add_directive("tcp_relay=info".parse()?))
    };

    let console = if args.log_json {
        fmt::layer().json().with_filter(filter()?).boxed()
    } else {
        fmt::layer().with_filter(filter()?).boxed()
    };

    let (file, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| format!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter()?)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).try_init()?;

    info!("tcp-relay {} starting up", tcp_relay::VERSION);
    Ok(guard)
}

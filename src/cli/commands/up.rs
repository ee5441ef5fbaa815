// upコマンドの実装

use crate::cli::commands::{run_relay, CommandResult};
use crate::cli::UpArgs;
use crate::common::{config::Config, error::Error};
use tracing::info;

pub async fn execute(args: UpArgs) -> CommandResult {
    info!("Starting relay from configuration file: {}", args.file.display());

    if !args.file.exists() {
        return Err(Error::config(format!("Configuration file '{}' not found", args.file.display())));
    }

    let config = Config::from_file(&args.file)?;
    run_relay(config).await
}

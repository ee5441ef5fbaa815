// configコマンドの実装

use crate::cli::commands::CommandResult;
use crate::cli::{ConfigAction, ConfigArgs};
use crate::common::config::Config;
use crate::common::error::Error;
use std::path::PathBuf;
use tracing::info;

const DEFAULT_CONFIG_FILE: &str = "relay.toml";

pub async fn execute(args: ConfigArgs) -> CommandResult {
    match args.action {
        ConfigAction::Show { file } => show_config(file).await,
        ConfigAction::Validate { file } => validate_config(file).await,
        ConfigAction::Generate { output } => generate_config(output).await,
    }
}

fn config_path(file: Option<PathBuf>) -> Result<PathBuf, Error> {
    let path = file.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if !path.exists() {
        return Err(Error::config(format!("Configuration file '{}' not found", path.display())));
    }
    Ok(path)
}

async fn show_config(file: Option<PathBuf>) -> CommandResult {
    let config_path = config_path(file)?;

    let config = Config::from_file(&config_path)?;
    let toml_str = toml::to_string_pretty(&config)
        .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;

    println!("Current configuration ({}):", config_path.display());
    println!("{}", toml_str);

    Ok(())
}

async fn validate_config(file: Option<PathBuf>) -> CommandResult {
    let config_path = config_path(file)?;
    info!("Validating configuration file: {}", config_path.display());

    match Config::from_file(&config_path) {
        Ok(config) => {
            println!("✅ Configuration is valid");
            println!(
                "🔗 {}:{} -> {} ({})",
                config.listener.host,
                config.listener.port,
                config.backend_target(),
                config.backend.transport
            );
            println!(
                "🔒 TLS: client side {}, backend side {}",
                on_off(config.listener_tls_enabled()),
                on_off(config.backend_tls_enabled())
            );
            if let Some(overlay) = &config.overlay {
                println!("🌐 Overlay network {} ({})", overlay.network_id, overlay.storage_path.display());
            }
        }
        Err(e) => {
            println!("❌ Configuration validation failed: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

async fn generate_config(output: Option<PathBuf>) -> CommandResult {
    let output_path = output.unwrap_or_else(|| PathBuf::from("relay-sample.toml"));

    if output_path.exists() {
        return Err(Error::config(format!("Output file '{}' already exists", output_path.display())));
    }

    let sample_config = Config::sample();
    sample_config.to_file(&output_path)?;

    println!("✅ Sample configuration generated: {}", output_path.display());
    println!("📝 Edit the file to point at your backend");

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

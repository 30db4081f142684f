//! Command-line surface. `serve` (the default) and a couple of config
//! utilities — everything else the teacher's CLI carries (login, import,
//! systemd, scheduling) has no counterpart here.

use clap::{Parser, Subcommand};
use relay_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "relay-gateway", version, about = "Real-time conversational agent gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as JSON.
    Show,
}

/// Reads `RELAY_CONFIG` (default `config.json`) if it exists, else falls
/// back to [`Config::default`].
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config.json".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

pub fn validate_config(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{config_path}: OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}

pub fn show_config(config: &Config) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

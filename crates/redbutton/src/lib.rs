//! # Red Button - Terminal Client
//!
//! Plays The Red Button from a terminal. The client derives the broker
//! address from the game page's origin, signs in with a player name, prints
//! the game log and room descriptions as they arrive, and sends every line
//! typed as a player action.
//!
//! ## Quick Start
//!
//! ```bash
//! # Connect using redbutton.toml (created with defaults if missing)
//! redbutton
//!
//! # Point at a deployment and skip the name prompt
//! redbutton --origin https://redbutton.example:3000 --name Bob
//!
//! # Talk to a world-dialect server with debug logs on stderr
//! redbutton --dialect world --log-level debug
//! ```
//!
//! ## Commands
//!
//! * `/up`, `/down`: walk through earlier input
//! * `/send`: send the recalled input
//! * `/quit`: leave (as do SIGINT and SIGTERM)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Runs the client: parse arguments, set up logging, run the application.
///
/// Called from `main` under `#[tokio::main]`.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    config.apply_overrides(&args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            eprintln!("❌ Failed to start: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use app::{render_event, Flow};
pub use config::{BrokerSettings, LoggingSettings, SessionSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config_builds_session_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let session = config.to_session_config();
        assert_eq!(session.broker_port, 9222);
        assert_eq!(session.dialect, game_session::Dialect::Game);
    }

    #[tokio::test]
    async fn test_application_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        tokio::fs::write(&path, "[logging]\nlevel = \"loud\"\njson_format = false\n")
            .await
            .unwrap();

        let args = CliArgs::try_parse_from(["redbutton", "--config", path.to_str().unwrap()]).unwrap();
        assert!(Application::new(args).await.is_err());
    }

    #[tokio::test]
    async fn test_cli_log_level_fixes_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        tokio::fs::write(&path, "[logging]\nlevel = \"loud\"\njson_format = false\n")
            .await
            .unwrap();

        let args = CliArgs::try_parse_from([
            "redbutton",
            "--config",
            path.to_str().unwrap(),
            "--log-level",
            "info",
        ])
        .unwrap();
        assert!(Application::new(args).await.is_ok());
    }
}

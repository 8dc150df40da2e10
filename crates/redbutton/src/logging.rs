//! Logging system setup and configuration.
//!
//! Logs are written to stderr so they never interleave with the game log
//! rendered on stdout.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system with the specified configuration.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
/// `json_format` forces JSON output regardless of the file setting.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_target(false),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Shows the client banner on stdout, above the game log.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    println!("╔══════════════════════════════════════════╗");
    println!("║            🔴 THE RED BUTTON 🔴          ║");
    println!("║             terminal client v{:<8}    ║", version);
    println!("║                                          ║");
    println!("║  /up /down   recall earlier input        ║");
    println!("║  /send       send the recalled input     ║");
    println!("║  /quit       leave the game              ║");
    println!("╚══════════════════════════════════════════╝");
}

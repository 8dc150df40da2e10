//! Main application logic and lifecycle management.
//!
//! The `Application` mounts a session against the configured origin, signs
//! the player in, then multiplexes three sources until the player leaves:
//! lines typed on stdin, events from the session, and termination signals.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals};
use broker_client::WsConnector;
use game_session::{
    ConnectionState, RoomState, Session, SessionError, SessionEvent, SignOutReason,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const NAME_PROMPT: &str = "Enter your name:";

/// What to do after handling a line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Application {
    config: AppConfig,
    name: Option<String>,
    session: Session,
}

impl Application {
    /// Loads configuration, applies CLI overrides, validates, and builds the
    /// session on a WebSocket connector.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_overrides(&args);
        config.validate()?;
        info!("✅ Configuration loaded and validated successfully");

        let session = Session::new(Arc::new(WsConnector::default()), config.to_session_config());
        Ok(Self {
            config,
            name: args.name,
            session,
        })
    }

    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        display_banner();

        let origin = self.config.broker.origin.clone();
        if self.session.mount(Some(&origin)).await != ConnectionState::Connected {
            println!("⚠️ Could not reach the game at {origin}; will try again when you sign in.");
        }

        match self.name.take() {
            Some(name) => self.sign_in(&name).await,
            None => println!("{NAME_PROMPT}"),
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let shutdown = signals::wait_for_shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    if let Err(e) = result {
                        error!("❌ Signal handling failed: {e}");
                    }
                    break;
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if self.handle_line(&line).await == Flow::Quit {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.session.next_event() => {
                    for line in render_event(&event) {
                        println!("{line}");
                    }
                }
            }
        }

        self.session.unmount().await;
        println!("Goodbye!");
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let trimmed = line.trim();
        if trimmed == "/quit" {
            return Flow::Quit;
        }

        if !self.session.is_signed_in() {
            self.sign_in(trimmed).await;
            return Flow::Continue;
        }

        match trimmed {
            "/up" => show_recalled(self.session.recall_previous()),
            "/down" => show_recalled(self.session.recall_next()),
            "/send" => self.send_action().await,
            _ => {
                self.session.input_changed(line);
                self.send_action().await;
            }
        }
        Flow::Continue
    }

    async fn sign_in(&mut self, name: &str) {
        let mut result = self.session.submit_name(name).await;
        if matches!(result, Err(SessionError::NotConnected)) {
            let origin = self.config.broker.origin.clone();
            self.session.mount(Some(&origin)).await;
            result = self.session.submit_name(name).await;
        }

        match result {
            Ok(true) => {
                if let Some(identity) = self.session.identity() {
                    println!("Welcome, {identity}!");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!("⚠️ Sign-in failed: {}", e);
                println!("⚠️ {e}");
                println!("{NAME_PROMPT}");
            }
        }
    }

    async fn send_action(&mut self) {
        match self.session.submit_action().await {
            Ok(true) => {}
            Ok(false) => {
                if !self.session.input().trim().is_empty() {
                    println!("⚠️ Not connected; input kept.");
                }
            }
            Err(e) => println!("⚠️ {e}"),
        }
    }
}

fn show_recalled(recalled: Option<&str>) {
    match recalled {
        Some(input) => println!("> {input}"),
        None => println!("(no more history)"),
    }
}

/// Lines to print for a session event.
pub fn render_event(event: &SessionEvent) -> Vec<String> {
    match event {
        SessionEvent::LogAppended { text, .. } => vec![text.clone()],
        SessionEvent::RoomChanged(room) => render_room(room),
        SessionEvent::Notice(notice) => vec![format!("📢 {notice}")],
        SessionEvent::SignedOut { reason, notice } => {
            let mut lines = vec![format!("📢 {notice}")];
            match reason {
                SignOutReason::NameInvalid => lines.push("That name cannot be used.".to_string()),
                SignOutReason::Disconnected => {
                    lines.push("Sign in again to reconnect.".to_string())
                }
                _ => {}
            }
            lines.push(NAME_PROMPT.to_string());
            lines
        }
        SessionEvent::DecodeFailed { kind, error } => {
            vec![format!("⚠️ Could not read {kind:?} message: {error}")]
        }
    }
}

fn render_room(room: &RoomState) -> Vec<String> {
    let mut lines = vec![format!("== {} ==", room.title.as_deref().unwrap_or("?"))];
    if let Some(description) = &room.description {
        lines.push(description.clone());
    }
    if let Some(exits) = &room.exits {
        lines.push(format!("Exits: {exits}"));
    }
    if let Some(image) = &room.image_url {
        lines.push(format!("[image: {image}]"));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_session::{LogStream, TopicKind};

    #[test]
    fn test_render_log_line() {
        let event = SessionEvent::LogAppended {
            stream: LogStream::Updates,
            text: "The button glows.".into(),
            trimmed: 0,
        };
        assert_eq!(render_event(&event), vec!["The button glows."]);
    }

    #[test]
    fn test_render_room_skips_absent_fields() {
        let event = SessionEvent::RoomChanged(RoomState {
            title: Some("Hall".into()),
            exits: Some("north".into()),
            ..Default::default()
        });
        assert_eq!(render_event(&event), vec!["== Hall ==", "Exits: north"]);
    }

    #[test]
    fn test_render_connection_lost_offers_reconnect() {
        let event = SessionEvent::SignedOut {
            reason: SignOutReason::Disconnected,
            notice: game_session::CONNECTION_LOST_NOTICE.into(),
        };
        assert_eq!(
            render_event(&event),
            vec![
                format!("📢 {}", game_session::CONNECTION_LOST_NOTICE),
                "Sign in again to reconnect.".to_string(),
                NAME_PROMPT.to_string(),
            ]
        );
    }

    #[test]
    fn test_render_sign_out_prompts_for_name() {
        let event = SessionEvent::SignedOut {
            reason: SignOutReason::NameInvalid,
            notice: "Name taken".into(),
        };
        let lines = render_event(&event);
        assert_eq!(lines.first().map(String::as_str), Some("📢 Name taken"));
        assert_eq!(lines.last().map(String::as_str), Some(NAME_PROMPT));
    }

    #[test]
    fn test_render_decode_failure() {
        let event = SessionEvent::DecodeFailed {
            kind: TopicKind::RoomUpdate,
            error: "bad json".into(),
        };
        assert_eq!(
            render_event(&event),
            vec!["⚠️ Could not read RoomUpdate message: bad json"]
        );
    }
}

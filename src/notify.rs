// =============================================================================
// Notifier — operator-facing event messages (Telegram)
// =============================================================================
//
// The engine broadcasts only successful level-ups; faults stay in the logs.
// An unconfigured notifier degrades to the no-op implementation at wiring
// time, and delivery failures are logged, never propagated into the engine.
// =============================================================================

use async_trait::async_trait;
use tracing::{error, info};

/// Sink for operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

/// Sends messages through the Telegram bot API.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    http: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, text: &str) -> anyhow::Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        self.http.post(&url).json(&body).send().await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        info!("NOTIFY: {text}");
        if let Err(e) = self.post(text).await {
            error!(error = %e, "Telegram notification failed");
        }
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Null sink
// ---------------------------------------------------------------------------

/// Used when no Telegram credentials are configured: messages go to the log
/// only.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, text: &str) {
        info!("NOTIFY (no sink): {text}");
    }
}

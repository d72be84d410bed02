//! Operator notifications.
//!
//! Fire-and-forget alerts through the Telegram bot API. Delivery is
//! best-effort: failures are logged and never surface to the caller, so a
//! dead notification channel can't block a decision path.

use reqwest::Client;
use tracing::{debug, warn};

use crate::config::{AlertsConfig, AppConfig};
use crate::types::Winner;

#[derive(Clone)]
struct TelegramTarget {
    bot_token: String,
    chat_id: String,
}

/// Notification sink. Cheap to clone; a disabled sink swallows everything.
#[derive(Clone)]
pub struct Notifier {
    http: Client,
    target: Option<TelegramTarget>,
}

impl Notifier {
    /// Build from config. Missing env vars disable the sink with a warning
    /// rather than failing startup.
    pub fn from_config(cfg: &AlertsConfig) -> Self {
        let target = match (&cfg.telegram_bot_token_env, &cfg.telegram_chat_id_env) {
            (Some(token_env), Some(chat_env)) => {
                match (
                    AppConfig::resolve_env(token_env),
                    AppConfig::resolve_env(chat_env),
                ) {
                    (Ok(bot_token), Ok(chat_id)) => Some(TelegramTarget { bot_token, chat_id }),
                    _ => {
                        warn!("Telegram credentials not set; notifications disabled");
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            http: Client::new(),
            target,
        }
    }

    /// A sink that drops everything (tests, notifications switched off).
    pub fn disabled() -> Self {
        Self {
            http: Client::new(),
            target: None,
        }
    }

    /// Send a human-readable alert. Returns immediately; delivery happens
    /// in a background task.
    pub fn send(&self, subject: &str, body: &str) {
        let Some(target) = self.target.clone() else {
            debug!(subject, "Notification dropped (sink disabled)");
            return;
        };

        let http = self.http.clone();
        let text = format!("{subject}\n\n{body}");
        tokio::spawn(async move {
            let url = format!(
                "https://api.telegram.org/bot{}/sendMessage",
                target.bot_token
            );
            let result = http
                .post(&url)
                .json(&serde_json::json!({
                    "chat_id": target.chat_id,
                    "text": text,
                }))
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(status = %resp.status(), "Notification delivery rejected"),
                Err(e) => warn!(error = %e, "Notification delivery failed"),
            }
        });
    }

    pub fn product_published(&self, product_name: &str, item_id: &str, score: i64) {
        self.send(
            "✅ Product published",
            &format!(
                "Product: {product_name}\nItem: {item_id}\nScore: {score}/100\n\n\
                 Published automatically for clearing the auto-publish score."
            ),
        );
    }

    pub fn optimization(&self, action: &str, product_name: &str, details: &str) {
        self.send(
            &format!("⚙️ Optimization: {action}"),
            &format!("Product: {product_name}\nDetails: {details}"),
        );
    }

    pub fn ab_test_completed(&self, product_name: &str, winner: Winner) {
        self.send(
            "🏆 A/B test completed",
            &format!(
                "Product: {product_name}\nWinner: {winner}\n\n\
                 The losing variant has been paused."
            ),
        );
    }

    pub fn error(&self, error_type: &str, message: &str) {
        self.send(
            &format!("❌ Critical error: {error_type}"),
            &format!("{message}\n\nCheck the logs for details."),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_sink_swallows_sends() {
        let notifier = Notifier::disabled();
        // Must not panic or spawn anything that errors loudly.
        notifier.send("subject", "body");
        notifier.product_published("Cable", "MLM1", 85);
        notifier.optimization("Price adjusted", "Cable", "details");
        notifier.ab_test_completed("Cable", Winner::A);
        notifier.error("token refresh", "boom");
    }

    #[test]
    fn test_from_config_without_env_disables() {
        let cfg = AlertsConfig {
            telegram_bot_token_env: Some("LISTERO_TEST_MISSING_TOKEN".to_string()),
            telegram_chat_id_env: Some("LISTERO_TEST_MISSING_CHAT".to_string()),
        };
        let notifier = Notifier::from_config(&cfg);
        assert!(notifier.target.is_none());

        let cfg = AlertsConfig {
            telegram_bot_token_env: None,
            telegram_chat_id_env: None,
        };
        let notifier = Notifier::from_config(&cfg);
        assert!(notifier.target.is_none());
    }
}

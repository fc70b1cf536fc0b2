//! Telegram `Notifier` adapter, grounded on `core/notifier.py::tg_send`: silent no-op when
//! unconfigured (logs locally instead), best-effort fan-out to every configured chat id.

use crate::domain::ports::Notifier;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_ids: Vec<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_ids: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, bot_token, chat_ids }
    }

    fn configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_ids.is_empty()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, title: &str, lines: &[String]) -> Result<()> {
        if !self.configured() {
            info!(title, "notify (telegram unconfigured): {}", lines.join("\n"));
            return Ok(());
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let text = format!("*{title}*\n{}", lines.join("\n"));

        let mut all_ok = true;
        for chat_id in &self.chat_ids {
            let body = json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" });
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    all_ok = false;
                    warn!(chat_id, status = %resp.status(), "telegram notify failed");
                }
                Err(e) => {
                    all_ok = false;
                    warn!(chat_id, error = %e, "telegram notify request failed");
                }
            }
        }

        if !all_ok {
            anyhow::bail!("one or more telegram chat notifications failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_notifier_is_a_silent_no_op() {
        let notifier = TelegramNotifier::new(String::new(), vec![]);
        let result = notifier.notify("test", &["line one".to_string()]).await;
        assert!(result.is_ok());
    }
}

//! Telegram Bot API transport for channel broadcasts and user alerts.
//!
//! Errors are typed so the delivery stages can route them: rate limits
//! requeue with the server's retry-after, invalid recipients and permanent
//! API rejections settle terminally, everything else retries.

mod types;

pub use types::InlineButton;

use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use types::{ApiEnvelope, SentMessage};

const API_URL: &str = "https://api.telegram.org";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("transient transport failure: {0}")]
    Transient(String),

    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Clone)]
pub struct TelegramClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Permanent(e.to_string()))?;
        Ok(Self {
            token: token.into(),
            base_url: API_URL.to_string(),
            http,
        })
    }

    /// Point at a local bot-API server or a test double.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Post up to five photos as one album; the caption rides on the first.
    /// Returns the first message id — that is the one later edits target.
    pub async fn send_media_group(
        &self,
        chat: &str,
        image_urls: &[String],
        caption: &str,
        buttons: &[InlineButton],
    ) -> Result<i64> {
        if image_urls.is_empty() {
            return self.send_message(chat, caption, buttons).await;
        }

        let media: Vec<serde_json::Value> = image_urls
            .iter()
            .take(5)
            .enumerate()
            .map(|(i, url)| {
                if i == 0 {
                    json!({"type": "photo", "media": url, "caption": caption, "parse_mode": "HTML"})
                } else {
                    json!({"type": "photo", "media": url})
                }
            })
            .collect();

        let messages: Vec<SentMessage> = self
            .call("sendMediaGroup", &json!({"chat_id": chat, "media": media}))
            .await?;
        let first = messages
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Transient("empty media group response".into()))?;

        // Albums can't carry inline keyboards; options ride a follow-up message.
        if !buttons.is_empty() {
            self.send_message(chat, "👆 Опции за тази обява:", buttons).await?;
        }

        Ok(first.message_id)
    }

    pub async fn send_message(&self, chat: &str, text: &str, buttons: &[InlineButton]) -> Result<i64> {
        let mut body = json!({"chat_id": chat, "text": text, "parse_mode": "HTML"});
        if !buttons.is_empty() {
            body["reply_markup"] = types::keyboard(buttons);
        }
        let message: SentMessage = self.call("sendMessage", &body).await?;
        Ok(message.message_id)
    }

    /// Rewrite the caption of an already-posted message (price updates).
    pub async fn edit_message_caption(&self, chat: &str, message_id: i64, caption: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat,
            "message_id": message_id,
            "caption": caption,
            "parse_mode": "HTML",
        });
        // Telegram returns the edited message, or `true` for inline ones;
        // either way success is all we care about.
        let _: serde_json::Value = self.call("editMessageCaption", &body).await?;
        Ok(())
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        debug!(method, "Telegram API call");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        if envelope.ok {
            return envelope
                .result
                .ok_or_else(|| TransportError::Transient("ok response without result".into()));
        }

        let description = envelope.description.clone().unwrap_or_default();
        Err(classify(status.as_u16(), envelope.error_code, &description, envelope.retry_after()))
    }
}

/// Map a Bot API failure onto the typed transport errors.
fn classify(
    http_status: u16,
    error_code: Option<i64>,
    description: &str,
    retry_after: Option<u64>,
) -> TransportError {
    let code = error_code.unwrap_or(http_status as i64);
    let lower = description.to_lowercase();

    if code == 429 {
        return TransportError::RateLimited(Duration::from_secs(retry_after.unwrap_or(30)));
    }
    if code == 403 || lower.contains("chat not found") || lower.contains("user is deactivated") {
        return TransportError::InvalidRecipient(description.to_string());
    }
    if code == 400
        && (lower.contains("message to edit not found")
            || lower.contains("message can't be edited")
            || lower.contains("message is not modified"))
    {
        return TransportError::Permanent(description.to_string());
    }
    if (500..600).contains(&code) {
        return TransportError::Transient(description.to_string());
    }
    TransportError::Permanent(description.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_carries_retry_after() {
        match classify(429, Some(429), "Too Many Requests", Some(17)) {
            TransportError::RateLimited(d) => assert_eq!(d, Duration::from_secs(17)),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn blocked_user_is_invalid_recipient() {
        assert!(matches!(
            classify(403, Some(403), "Forbidden: bot was blocked by the user", None),
            TransportError::InvalidRecipient(_)
        ));
    }

    #[test]
    fn stale_edit_is_permanent() {
        assert!(matches!(
            classify(400, Some(400), "Bad Request: message to edit not found", None),
            TransportError::Permanent(_)
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(matches!(
            classify(502, Some(502), "Bad Gateway", None),
            TransportError::Transient(_)
        ));
    }
}

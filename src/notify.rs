//! Telegram Bot API client: audit notifications, broadcasts and the update
//! feed for the bot console.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Clone)]
pub struct Notifier {
    token: Option<String>,
    api_url: String,
    admin_chat_id: Option<i64>,
    client: Client,
}

impl Notifier {
    pub fn new(
        token: Option<String>,
        api_url: String,
        admin_chat_id: Option<i64>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build Telegram HTTP client: {}", e)))?;
        Ok(Self {
            token,
            api_url: api_url.trim_end_matches('/').to_string(),
            admin_chat_id,
            client,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, token, method)
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.client.post(self.method_url(token, method)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Telegram {} failed: {}", method, e)))?;

        let status = response.status();
        let parsed: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Telegram {} returned invalid JSON: {}", method, e)))?;

        match parsed {
            TelegramResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            other => Err(AppError::Upstream(format!(
                "Telegram {} failed ({}): {}",
                method,
                status.as_u16(),
                other.description.unwrap_or_default()
            ))),
        }
    }

    /// Send an HTML message. Returns false (after logging) on any failure.
    pub async fn send_message(&self, chat_id: i64, html: &str) -> bool {
        let Some(token) = self.token.as_deref() else {
            tracing::debug!(chat_id, "TG_BOT_TOKEN not set, message dropped");
            return false;
        };
        let body = SendMessageRequest {
            chat_id,
            text: html,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        match self
            .call::<_, serde_json::Value>(token, "sendMessage", &body, None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "Failed to send Telegram message");
                false
            }
        }
    }

    /// Post to the audit chat (`TG_ADMIN_CHAT_ID`).
    pub async fn notify_admins(&self, html: &str) -> bool {
        match self.admin_chat_id {
            Some(chat_id) => self.send_message(chat_id, html).await,
            None => {
                tracing::debug!("TG_ADMIN_CHAT_ID not set, audit notification dropped");
                false
            }
        }
    }

    /// Long-poll for new messages. Empty when no token is configured.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let Some(token) = self.token.as_deref() else {
            return Ok(Vec::new());
        };
        let body = GetUpdatesRequest {
            offset,
            timeout: timeout_secs,
            allowed_updates: ["message"],
        };
        self.call(
            token,
            "getUpdates",
            &body,
            Some(Duration::from_secs(timeout_secs + 10)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_token_everything_is_a_no_op() {
        let notifier = Notifier::new(
            None,
            "http://127.0.0.1:9".into(),
            Some(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!notifier.is_enabled());
        assert!(!notifier.send_message(1, "hi").await);
        assert!(!notifier.notify_admins("hi").await);
        assert!(notifier.get_updates(0, 1).await.unwrap().is_empty());
    }

    #[test]
    fn test_update_parsing() {
        let body = r#"{"ok":true,"result":[{"update_id":10,"message":{"message_id":1,"chat":{"id":42,"type":"private","username":"op"},"from":{"id":42,"is_bot":false,"username":"op"},"text":"/keys"}}]}"#;
        let parsed: TelegramResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        let updates = parsed.result.unwrap();
        assert_eq!(updates[0].update_id, 10);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.text.as_deref(), Some("/keys"));
    }
}

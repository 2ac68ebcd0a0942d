//! Outgoing email via the SendGrid v3 `mail/send` API.
//!
//! Two messages: key delivery to buyers and login codes to operators.
//! In dev mode without an API key, messages are logged instead of sent.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::Period;
use crate::util::escape_html;

/// How a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Accepted by the provider
    Sent,
    /// Dev mode without an API key: written to the log only
    Logged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Serialize)]
struct SendGridAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridPersonalization<'a> {
    to: Vec<SendGridAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct SendGridContent<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

/// SendGrid v3 request body.
#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<SendGridPersonalization<'a>>,
    from: SendGridAddress<'a>,
    subject: &'a str,
    content: Vec<SendGridContent<'a>>,
}

/// Render the key-delivery message. A custom HTML template may use the
/// placeholders `{uid}`, `{key}`, `{period}` and `{link}`.
pub fn render_key_delivery(
    template: Option<&str>,
    key: &str,
    uid: &str,
    period: Period,
    link: &str,
) -> RenderedEmail {
    let label = period.display_label();
    let subject = "Your key and order code are ready".to_string();
    let text = format!(
        "Thank you for your purchase!\n\nOrder: {}\nPackage: {}\nKey: {}\n{}\nKeep this email: the order code is needed for support.",
        uid,
        label,
        key,
        if link.is_empty() {
            String::new()
        } else {
            format!("Instructions: {}\n", link)
        }
    );

    let html = match template {
        Some(template) => template
            .replace("{uid}", &escape_html(uid))
            .replace("{key}", &escape_html(key))
            .replace("{period}", &escape_html(label))
            .replace("{link}", &escape_html(link))
            .replace('\r', ""),
        None => format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Thank you for your purchase!</h2>
<p>Order <strong>{uid}</strong> &middot; {label} package</p>
<div style="background: #f5f5f5; padding: 20px; border-radius: 8px; text-align: center;">
<code style="font-size: 22px; font-weight: bold; letter-spacing: 1px; color: #333;">{key}</code>
</div>
{link_html}
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;">Keep this email: the order code is needed for support.</p>
</body>
</html>"#,
            uid = escape_html(uid),
            label = escape_html(label),
            key = escape_html(key),
            link_html = if link.is_empty() {
                String::new()
            } else {
                format!(
                    r#"<p><a href="{0}">{0}</a></p>"#,
                    escape_html(link)
                )
            },
        ),
    };

    RenderedEmail {
        subject,
        text,
        html,
    }
}

pub fn render_login_code(code: &str, ttl_minutes: i64) -> RenderedEmail {
    RenderedEmail {
        subject: format!("Your login code: {}", code),
        text: format!(
            "Your dashboard login code is {}\n\nIt expires in {} minutes. If you didn't request this, you can ignore this email.",
            code, ttl_minutes
        ),
        html: format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Dashboard login</h2>
<div style="background: #f5f5f5; padding: 20px; border-radius: 8px; text-align: center;">
<code style="font-size: 28px; font-weight: bold; letter-spacing: 6px; color: #333;">{}</code>
</div>
<p style="color: #666;">This code expires in {} minutes.</p>
<p style="color: #999; font-size: 12px;">If you didn't request this, you can ignore this email.</p>
</body>
</html>"#,
            escape_html(code),
            ttl_minutes
        ),
    }
}

/// SendGrid email client.
#[derive(Clone)]
pub struct EmailService {
    api_key: Option<String>,
    api_url: String,
    from_email: String,
    template_path: Option<PathBuf>,
    delivery_link: String,
    dev_mode: bool,
    http_client: Client,
}

impl EmailService {
    pub fn from_config(config: &Config, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build email HTTP client: {}", e)))?;
        Ok(Self {
            api_key: config.sendgrid_api_key.clone(),
            api_url: config.sendgrid_api_url.trim_end_matches('/').to_string(),
            from_email: config.from_email.clone(),
            template_path: config.email_template_path.clone(),
            delivery_link: config.delivery_link.clone(),
            dev_mode: config.dev_mode,
            http_client,
        })
    }

    /// Send the purchased key. An error means the buyer did not get it.
    pub async fn send_key_delivery(
        &self,
        to_email: &str,
        key: &str,
        uid: &str,
        period: Period,
    ) -> Result<EmailSendResult> {
        let template = match &self.template_path {
            Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Failed to read email template");
                AppError::Internal("Email template is not readable".into())
            })?),
            None => None,
        };
        let email = render_key_delivery(template.as_deref(), key, uid, period, &self.delivery_link);
        let result = self.send(to_email, &email).await?;
        tracing::info!(to = %to_email, uid = %uid, period = %period, "Key delivery email accepted");
        Ok(result)
    }

    pub async fn send_login_code(
        &self,
        to_email: &str,
        code: &str,
        ttl_minutes: i64,
    ) -> Result<EmailSendResult> {
        let email = render_login_code(code, ttl_minutes);
        self.send(to_email, &email).await
    }

    async fn send(&self, to_email: &str, email: &RenderedEmail) -> Result<EmailSendResult> {
        let Some(api_key) = self.api_key.as_deref() else {
            if self.dev_mode {
                tracing::info!(
                    to = %to_email,
                    subject = %email.subject,
                    body = %email.text,
                    "SENDGRID_API_KEY not set, email logged instead of sent"
                );
                return Ok(EmailSendResult::Logged);
            }
            tracing::error!(to = %to_email, "SENDGRID_API_KEY not set, cannot send email");
            return Err(AppError::Upstream("Email delivery is not configured".into()));
        };

        let request = SendGridRequest {
            personalizations: vec![SendGridPersonalization {
                to: vec![SendGridAddress { email: to_email }],
            }],
            from: SendGridAddress {
                email: &self.from_email,
            },
            subject: &email.subject,
            content: vec![
                SendGridContent {
                    content_type: "text/plain",
                    value: &email.text,
                },
                SendGridContent {
                    content_type: "text/html",
                    value: &email.html,
                },
            ],
        };

        let response = self
            .http_client
            .post(format!("{}/v3/mail/send", self.api_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to SendGrid");
                AppError::Upstream(format!("Email service error: {}", e))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(EmailSendResult::Sent);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, "SendGrid returned error");
        Err(AppError::Upstream(format!(
            "Email service error: {} - {}",
            status.as_u16(),
            body
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_template_placeholders() {
        let template = "<p>{uid}</p><p>{key}</p><p>{period}</p><a href=\"{link}\">x</a>\r\n";
        let email = render_key_delivery(
            Some(template),
            "ABC<123>",
            "Q7X2KD",
            Period::SevenDays,
            "https://example.com/guide",
        );
        assert_eq!(
            email.html,
            "<p>Q7X2KD</p><p>ABC&lt;123&gt;</p><p>1 Week</p><a href=\"https://example.com/guide\">x</a>\n"
        );
        assert!(email.text.contains("Key: ABC<123>"));
    }

    #[test]
    fn test_builtin_template_mentions_order_and_key() {
        let email = render_key_delivery(None, "KEY-1", "UID123", Period::NinetyDays, "");
        assert!(email.html.contains("UID123"));
        assert!(email.html.contains("KEY-1"));
        assert!(email.html.contains("1 Season"));
        assert!(!email.text.contains("Instructions"));
    }

    #[test]
    fn test_sendgrid_body_shape() {
        let request = SendGridRequest {
            personalizations: vec![SendGridPersonalization {
                to: vec![SendGridAddress { email: "a@b.c" }],
            }],
            from: SendGridAddress { email: "shop@b.c" },
            subject: "s",
            content: vec![SendGridContent {
                content_type: "text/plain",
                value: "t",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["personalizations"][0]["to"][0]["email"], "a@b.c");
        assert_eq!(json["content"][0]["type"], "text/plain");
    }
}

use std::path::PathBuf;

use crate::error::Result;
use crate::models::Settings;

use super::JsonDocument;

pub struct SettingsStore {
    doc: JsonDocument<Settings>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: JsonDocument::new(path),
        }
    }

    pub fn get(&self) -> Result<Settings> {
        self.doc.load()
    }

    /// Replace the settings document. Emails are stored trimmed and lowercased.
    pub fn set(&self, mut settings: Settings) -> Result<Settings> {
        settings.admin_emails = settings
            .admin_emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        settings.admin_emails.sort();
        settings.admin_emails.dedup();
        settings.admin_chat_ids.sort_unstable();
        settings.admin_chat_ids.dedup();
        self.doc.save(&settings)?;
        Ok(settings)
    }

    /// Dashboard allow-list: `env_emails` plus the stored list.
    pub fn is_admin_email(&self, env_emails: &[String], email: &str) -> Result<bool> {
        let email = email.trim().to_lowercase();
        if env_emails.iter().any(|e| *e == email) {
            return Ok(true);
        }
        Ok(self.get()?.admin_emails.iter().any(|e| *e == email))
    }

    /// Bot operators: the env chat id plus the stored list.
    pub fn is_admin_chat(&self, env_chat: Option<i64>, chat_id: i64) -> Result<bool> {
        if env_chat == Some(chat_id) {
            return Ok(true);
        }
        Ok(self.get()?.admin_chat_ids.contains(&chat_id))
    }
}

//! Telegram admin console.
//!
//! A long-polling loop feeds each message to [`BotConsole::handle`], which
//! checks the sender against the admin list and runs the command against the
//! same stores the HTTP handlers use.

mod commands;

pub use commands::Command;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::models::Period;
use crate::notify::Message;
use crate::util::escape_html;

const POLL_TIMEOUT_SECS: u64 = 25;
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What a chat is expected to send next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Keys(Period),
    BroadcastText,
}

/// Per-chat multi-step command state.
#[derive(Default)]
pub struct Conversations {
    pending: Mutex<HashMap<i64, Pending>>,
}

impl Conversations {
    pub fn set(&self, chat_id: i64, pending: Pending) {
        self.lock().insert(chat_id, pending);
    }

    pub fn take(&self, chat_id: i64) -> Option<Pending> {
        self.lock().remove(&chat_id)
    }

    pub fn get(&self, chat_id: i64) -> Option<Pending> {
        self.lock().get(&chat_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Pending>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct BotConsole {
    state: AppState,
    conversations: Conversations,
}

impl BotConsole {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            conversations: Conversations::default(),
        }
    }

    pub fn conversations(&self) -> &Conversations {
        &self.conversations
    }

    /// Poll for updates until the process exits.
    pub async fn run(self) {
        if !self.state.notifier.is_enabled() {
            tracing::info!("TG_BOT_TOKEN not set, bot console disabled");
            return;
        }
        tracing::info!("Bot console started");

        let mut offset = 0;
        loop {
            let updates = match self
                .state
                .notifier
                .get_updates(offset, POLL_TIMEOUT_SECS)
                .await
            {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!(error = %e, "getUpdates failed, retrying");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let chat_id = message.chat.id;
                match self.handle_message(&message).await {
                    Ok(Some(reply)) => {
                        self.state.notifier.send_message(chat_id, &reply).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(chat_id, error = %e, "Bot command failed");
                        let reply = format!("Error: {}", escape_html(&e.to_string()));
                        self.state.notifier.send_message(chat_id, &reply).await;
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: &Message) -> Result<Option<String>> {
        let Some(text) = message.text.as_deref() else {
            return Ok(None);
        };
        let username = message
            .from
            .as_ref()
            .and_then(|u| u.username.as_deref())
            .or(message.chat.username.as_deref());
        self.handle(message.chat.id, username, text).await
    }

    /// Reply for one incoming text, or `None` when nothing should be sent.
    pub async fn handle(
        &self,
        chat_id: i64,
        username: Option<&str>,
        text: &str,
    ) -> Result<Option<String>> {
        let command = Command::parse(text);

        if matches!(command, Some(Command::Start)) {
            let conn = self.state.db.get()?;
            queries::upsert_bot_chat(&conn, chat_id, username)?;
        }

        let is_admin = self
            .state
            .settings
            .is_admin_chat(self.state.config.telegram_admin_chat_id, chat_id)?;
        if !is_admin {
            return Ok(match command {
                Some(Command::Start) => Some(
                    "Welcome! You will receive shop announcements here.".to_string(),
                ),
                Some(_) => {
                    tracing::warn!(chat_id, username = ?username, "Bot command from non-admin chat");
                    Some("You are not allowed to use this bot.".to_string())
                }
                None => None,
            });
        }

        match command {
            Some(command) => commands::execute(self, chat_id, command).await.map(Some),
            None => match self.conversations.take(chat_id) {
                Some(pending) => commands::resume(self, pending, text).await.map(Some),
                None => Ok(Some("Unknown input. Send /help for the command list.".to_string())),
            },
        }
    }

    pub(crate) fn state(&self) -> &AppState {
        &self.state
    }
}

/// Send `text` to every recorded chat. Returns `(sent, failed)`.
pub async fn broadcast(state: &AppState, text: &str) -> Result<(usize, usize)> {
    let chats = {
        let conn = state.db.get()?;
        queries::list_bot_chats(&conn)?
    };

    let mut sent = 0;
    let mut failed = 0;
    for chat in chats {
        if state.notifier.send_message(chat.chat_id, text).await {
            sent += 1;
        } else {
            failed += 1;
        }
    }
    Ok((sent, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_state_is_per_chat() {
        let conversations = Conversations::default();
        conversations.set(1, Pending::Keys(Period::ThirtyDays));
        conversations.set(2, Pending::BroadcastText);

        assert_eq!(conversations.get(1), Some(Pending::Keys(Period::ThirtyDays)));
        assert_eq!(conversations.take(2), Some(Pending::BroadcastText));
        assert_eq!(conversations.take(2), None);
        assert_eq!(conversations.get(1), Some(Pending::Keys(Period::ThirtyDays)));
    }
}

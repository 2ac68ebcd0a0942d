use serde::Serialize;

/// Persistent dashboard session. Only the token hash is stored.
#[derive(Debug, Clone, Serialize)]
pub struct AdminSession {
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub email: String,
    pub expires_at: i64,
    pub created_at: i64,
}

/// A chat that has talked to the bot; target of broadcasts.
#[derive(Debug, Clone, Serialize)]
pub struct BotChat {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_seen_at: i64,
}

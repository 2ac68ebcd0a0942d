use serde::{Deserialize, Serialize};

/// Operator-editable settings (`settings.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Dashboard operators, in addition to `ADMIN_EMAILS`
    pub admin_emails: Vec<String>,
    /// Bot operators, in addition to `TG_ADMIN_CHAT_ID`
    pub admin_chat_ids: Vec<i64>,
    pub shop_name: String,
    pub support_link: Option<String>,
    /// When set, the storefront refuses new payment checks
    pub maintenance: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_emails: Vec::new(),
            admin_chat_ids: Vec::new(),
            shop_name: "Key Shop".to_string(),
            support_link: None,
            maintenance: false,
        }
    }
}

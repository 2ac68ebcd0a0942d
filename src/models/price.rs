use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub label: String,
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "VND".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdatePrice {
    #[serde(default)]
    pub label: Option<String>,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

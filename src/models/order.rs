use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub uid: String,
    pub email: Option<String>,
    /// The key issued for this order, set only after the delivery email was accepted.
    pub key: Option<String>,
    pub verification_code: String,
    pub promo_code: Option<String>,
    pub paid: bool,
    pub created_at: i64,
}

/// Filter for admin order listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderFilter {
    #[default]
    All,
    Paid,
    Pending,
}

/// One row of the delivery log: what was sent to whom and for how much.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: i64,
    pub uid: String,
    pub email: String,
    pub key: String,
    pub period: String,
    pub original_amount: i64,
    pub discount_percent: i64,
    pub final_amount: i64,
    pub promo_code: Option<String>,
    /// Fingerprint of the bank transaction that paid for this delivery
    pub tx_fingerprint: Option<String>,
    pub delivered_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateDelivery {
    pub uid: String,
    pub email: String,
    pub key: String,
    pub period: String,
    pub original_amount: i64,
    pub discount_percent: i64,
    pub final_amount: i64,
    pub promo_code: Option<String>,
    pub tx_fingerprint: Option<String>,
}

use serde::{Deserialize, Serialize};

/// Legacy database-backed discount code, consulted after the coupon store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub discount: i64,
    pub uses_left: i64,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePromoCode {
    pub code: String,
    pub discount: i64,
    pub uses_left: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl CreatePromoCode {
    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("Promo code must not be empty".into());
        }
        if !(1..=100).contains(&self.discount) {
            return Err("Discount must be between 1 and 100".into());
        }
        if self.uses_left < 1 {
            return Err("uses_left must be at least 1".into());
        }
        Ok(())
    }
}

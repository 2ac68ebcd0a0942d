use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::models::Period;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponKind {
    #[default]
    Limited,
    Unlimited,
}

/// A discount code as stored in `coupons.json`, keyed by its uppercase code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub discount: i64,
    #[serde(rename = "type", default)]
    pub kind: CouponKind,
    /// Uses granted at creation (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<i64>,
    #[serde(default)]
    pub uses_left: i64,
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, shop time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Period codes the coupon applies to. Empty = every period.
    #[serde(default)]
    pub types: Vec<String>,
    /// Set when the coupon is moved to the used archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_at: Option<String>,
}

impl Coupon {
    pub fn is_unlimited(&self) -> bool {
        self.kind == CouponKind::Unlimited
    }

    pub fn is_expired(&self, now: DateTime<FixedOffset>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|s| parse_expiry(s, *now.offset()))
            .is_some_and(|expires| now >= expires)
    }

    pub fn applies_to(&self, period: Period) -> bool {
        self.types.is_empty()
            || self
                .types
                .iter()
                .any(|t| Period::parse(t) == Some(period))
    }
}

/// Parse a coupon expiry in shop time. A bare date expires at the start of that day.
pub fn parse_expiry(value: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    offset.from_local_datetime(&naive).single()
}

/// Coupon as returned to the storefront and the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct CouponView {
    pub code: String,
    pub discount: i64,
    pub uses_left: i64,
    pub unlimited: bool,
    pub expires_at: Option<String>,
    pub types: Vec<String>,
}

impl CouponView {
    pub fn new(code: &str, coupon: &Coupon) -> Self {
        Self {
            code: code.to_string(),
            discount: coupon.discount,
            uses_left: coupon.uses_left,
            unlimited: coupon.is_unlimited(),
            expires_at: coupon.expires_at.clone(),
            types: coupon.types.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCoupon {
    pub code: String,
    pub discount: i64,
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default)]
    pub uses_left: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

impl CreateCoupon {
    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() || self.code.trim().contains(char::is_whitespace) {
            return Err("Coupon code must be a single non-empty word".into());
        }
        validate_discount(self.discount)?;
        if !self.unlimited && self.uses_left.unwrap_or(0) < 1 {
            return Err("A limited coupon needs at least 1 use".into());
        }
        validate_expiry(self.expires_at.as_deref())?;
        validate_types(&self.types)
    }

    pub fn into_coupon(self) -> (String, Coupon) {
        let uses_left = if self.unlimited { 0 } else { self.uses_left.unwrap_or(0) };
        let coupon = Coupon {
            discount: self.discount,
            kind: if self.unlimited {
                CouponKind::Unlimited
            } else {
                CouponKind::Limited
            },
            uses: (!self.unlimited).then_some(uses_left),
            uses_left,
            expires_at: self.expires_at.filter(|s| !s.trim().is_empty()),
            types: normalize_types(&self.types),
            moved_at: None,
        };
        (self.code.trim().to_uppercase(), coupon)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCoupon {
    pub discount: Option<i64>,
    pub unlimited: Option<bool>,
    pub uses_left: Option<i64>,
    /// `Some(None)` clears the expiry
    pub expires_at: Option<Option<String>>,
    pub types: Option<Vec<String>>,
}

impl UpdateCoupon {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(discount) = self.discount {
            validate_discount(discount)?;
        }
        if let Some(uses_left) = self.uses_left {
            if uses_left < 0 {
                return Err("uses_left must not be negative".into());
            }
        }
        if let Some(Some(ref expires)) = self.expires_at {
            validate_expiry(Some(expires))?;
        }
        if let Some(ref types) = self.types {
            validate_types(types)?;
        }
        Ok(())
    }

    pub fn apply(self, coupon: &mut Coupon) {
        if let Some(discount) = self.discount {
            coupon.discount = discount;
        }
        if let Some(unlimited) = self.unlimited {
            coupon.kind = if unlimited {
                CouponKind::Unlimited
            } else {
                CouponKind::Limited
            };
        }
        if let Some(uses_left) = self.uses_left {
            coupon.uses_left = uses_left;
        }
        if let Some(expires_at) = self.expires_at {
            coupon.expires_at = expires_at.filter(|s| !s.trim().is_empty());
        }
        if let Some(types) = self.types {
            coupon.types = normalize_types(&types);
        }
    }
}

fn validate_discount(discount: i64) -> Result<(), String> {
    if !(1..=100).contains(&discount) {
        return Err("Discount must be between 1 and 100 percent".into());
    }
    Ok(())
}

fn validate_expiry(expires_at: Option<&str>) -> Result<(), String> {
    match expires_at {
        Some(s) if !s.trim().is_empty() => {
            let utc = FixedOffset::east_opt(0).ok_or("invalid offset")?;
            parse_expiry(s, utc)
                .map(|_| ())
                .ok_or_else(|| format!("Invalid expiry '{}', expected YYYY-MM-DD", s))
        }
        _ => Ok(()),
    }
}

fn validate_types(types: &[String]) -> Result<(), String> {
    for t in types {
        if Period::parse(t).is_none() {
            return Err(format!("Unknown period '{}'", t));
        }
    }
    Ok(())
}

fn normalize_types(types: &[String]) -> Vec<String> {
    let mut periods: Vec<Period> = types.iter().filter_map(|t| Period::parse(t)).collect();
    periods.sort();
    periods.dedup();
    periods.into_iter().map(|p| p.code().to_string()).collect()
}

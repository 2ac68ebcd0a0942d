use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{AppError, Result};
use crate::models::{Coupon, CouponView, CreateCoupon, Period, UpdateCoupon};

use super::JsonDocument;

pub type CouponMap = BTreeMap<String, Coupon>;

pub const COUPONS_FILE: &str = "coupons.json";
pub const USED_COUPONS_FILE: &str = "used.json";

/// Outcome of checking a code against a period.
#[derive(Debug, Clone, PartialEq)]
pub enum CouponCheck {
    Valid(Coupon),
    /// Reason shown to the buyer as-is
    Invalid(String),
}

impl CouponCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, CouponCheck::Valid(_))
    }
}

enum Redeemed {
    Missing,
    Kept,
    Archived(Coupon),
}

/// Active coupons (`coupons.json`) and the one-way archive of exhausted or
/// expired ones (`used.json`).
pub struct CouponStore {
    active: JsonDocument<CouponMap>,
    used: JsonDocument<CouponMap>,
    offset: FixedOffset,
}

fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

impl CouponStore {
    pub fn new(dir: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        let dir = dir.into();
        Self {
            active: JsonDocument::new(dir.join(COUPONS_FILE)),
            used: JsonDocument::new(dir.join(USED_COUPONS_FILE)),
            offset,
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub fn get(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.active.load()?.remove(&normalize(code)))
    }

    pub fn list(&self) -> Result<CouponMap> {
        self.active.load()
    }

    pub fn list_used(&self) -> Result<CouponMap> {
        self.used.load()
    }

    pub fn validate(&self, code: &str, period: Period) -> Result<CouponCheck> {
        self.validate_at(code, period, self.now())
    }

    /// Existence, then expiry, then remaining uses (limited coupons only), then
    /// period applicability. The first failing check decides the reason.
    pub fn validate_at(
        &self,
        code: &str,
        period: Period,
        now: DateTime<FixedOffset>,
    ) -> Result<CouponCheck> {
        let code = normalize(code);
        let coupon = match self.active.load()?.remove(&code) {
            Some(coupon) => coupon,
            // An archived code is judged on its archived record
            None => match self.used.load()?.remove(&code) {
                Some(coupon) => coupon,
                None => return Ok(CouponCheck::Invalid("Coupon code does not exist".into())),
            },
        };

        if coupon.is_expired(now) {
            return Ok(CouponCheck::Invalid("Coupon code has expired".into()));
        }
        if !coupon.is_unlimited() && coupon.uses_left <= 0 {
            return Ok(CouponCheck::Invalid("Coupon code has no uses left".into()));
        }
        if !coupon.applies_to(period) {
            return Ok(CouponCheck::Invalid(format!(
                "This code does not apply to the {} package",
                period
            )));
        }
        Ok(CouponCheck::Valid(coupon))
    }

    /// Consume one use. A limited coupon reaching zero, or any coupon found past
    /// its expiry, moves to the archive. Returns false if the code is not active.
    pub fn redeem(&self, code: &str) -> Result<bool> {
        let code = normalize(code);
        let now = self.now();

        let outcome = self.active.update(|coupons| {
            let Some(coupon) = coupons.get_mut(&code) else {
                return Redeemed::Missing;
            };
            if !coupon.is_unlimited() {
                coupon.uses_left -= 1;
            }
            let exhausted = !coupon.is_unlimited() && coupon.uses_left <= 0;
            if exhausted || coupon.is_expired(now) {
                coupons
                    .remove(&code)
                    .map_or(Redeemed::Missing, Redeemed::Archived)
            } else {
                Redeemed::Kept
            }
        })?;

        match outcome {
            Redeemed::Missing => Ok(false),
            Redeemed::Kept => Ok(true),
            Redeemed::Archived(mut archived) => {
                archived.moved_at = Some(now.format("%Y-%m-%d %H:%M:%S").to_string());
                self.used.update(|used| {
                    used.insert(code.clone(), archived);
                })?;
                tracing::info!(code = %code, "Coupon archived");
                Ok(true)
            }
        }
    }

    pub fn create(&self, input: CreateCoupon) -> Result<CouponView> {
        input.validate().map_err(AppError::BadRequest)?;
        let (code, coupon) = input.into_coupon();
        let view = CouponView::new(&code, &coupon);

        let inserted = self.active.update(|coupons| {
            if coupons.contains_key(&code) {
                return false;
            }
            coupons.insert(code.clone(), coupon);
            true
        })?;
        if !inserted {
            return Err(AppError::BadRequest(format!(
                "Coupon code {} already exists",
                code
            )));
        }
        Ok(view)
    }

    pub fn update(&self, code: &str, input: UpdateCoupon) -> Result<Option<CouponView>> {
        input.validate().map_err(AppError::BadRequest)?;
        let code = normalize(code);
        self.active.update(|coupons| {
            coupons.get_mut(&code).map(|coupon| {
                input.apply(coupon);
                CouponView::new(&code, coupon)
            })
        })
    }

    pub fn delete(&self, code: &str) -> Result<bool> {
        let code = normalize(code);
        self.active.update(|coupons| coupons.remove(&code).is_some())
    }
}

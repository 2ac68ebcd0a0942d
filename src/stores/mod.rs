//! JSON-backed configuration stores: coupons, prices, settings.

mod coupons;
mod json;
mod prices;
mod settings;

pub use coupons::*;
pub use json::JsonDocument;
pub use prices::*;
pub use settings::*;

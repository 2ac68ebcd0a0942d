mod coupon;
mod order;
mod period;
mod price;
mod promo;
mod session;
mod settings;

pub use coupon::*;
pub use order::*;
pub use period::*;
pub use price::*;
pub use promo::*;
pub use session::*;
pub use settings::*;

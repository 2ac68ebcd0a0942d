//! Dashboard login: emailed one-time codes, a shared-password shortcut, and
//! persistent sessions.

mod otp;
mod session;

pub use otp::*;
pub use session::*;

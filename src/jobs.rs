//! Periodic housekeeping.

use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::db::{AppState, queries};
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub stale_orders: usize,
    pub expired_sessions: usize,
    pub expired_login_codes: usize,
}

/// One janitor pass: stale pending orders, expired admin sessions, expired
/// login codes and idle rate-limit entries.
pub fn sweep(state: &AppState) -> Result<SweepReport> {
    let now = Utc::now().timestamp();
    let (stale_orders, expired_sessions) = {
        let conn = state.db.get()?;
        (
            queries::delete_stale_pending(&conn, state.config.stale_order_minutes)?,
            queries::delete_expired_admin_sessions(&conn, now)?,
        )
    };
    let expired_login_codes = state.otp.prune_expired(now);
    state.otp_limiter.prune(now);
    state.payment_limiter.retain_recent();

    Ok(SweepReport {
        stale_orders,
        expired_sessions,
        expired_login_codes,
    })
}

/// Run [`sweep`] every `JANITOR_INTERVAL_SECS` until the process exits.
pub async fn run_janitor(state: AppState) {
    let period = Duration::from_secs(state.config.janitor_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_secs = period.as_secs(), "Janitor started");
    loop {
        interval.tick().await;
        match sweep(&state) {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(
                    stale_orders = report.stale_orders,
                    expired_sessions = report.expired_sessions,
                    expired_login_codes = report.expired_login_codes,
                    "Janitor sweep"
                );
            }
            Ok(_) => tracing::debug!("Janitor sweep found nothing to clean"),
            Err(e) => tracing::error!(error = %e, "Janitor sweep failed"),
        }
    }
}

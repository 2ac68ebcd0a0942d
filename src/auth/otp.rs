use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rand::Rng;
use subtle::ConstantTimeEq;

pub const OTP_TTL_SECS: i64 = 10 * 60;
pub const OTP_MAX_ATTEMPTS: u32 = 5;

pub const OTP_SENDS_PER_WINDOW: usize = 5;
pub const OTP_SEND_WINDOW_SECS: i64 = 60 * 60;
pub const OTP_COOLDOWN_SECS: i64 = 60 * 60;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug)]
struct PendingCode {
    code: String,
    expires_at: i64,
    attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpVerdict {
    Valid,
    Invalid { attempts_left: u32 },
    /// The code expired, or too many wrong guesses used it up
    Expired,
    TooManyAttempts,
    Missing,
}

/// Pending login codes, keyed by lowercase email. One code per email; issuing a
/// new one replaces the old.
#[derive(Default)]
pub struct OtpStore {
    pending: Mutex<HashMap<String, PendingCode>>,
}

impl OtpStore {
    pub fn issue(&self, email: &str) -> String {
        self.issue_at(email, now())
    }

    pub fn issue_at(&self, email: &str, now: i64) -> String {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        guard(&self.pending).insert(
            normalize(email),
            PendingCode {
                code: code.clone(),
                expires_at: now + OTP_TTL_SECS,
                attempts: 0,
            },
        );
        code
    }

    pub fn verify(&self, email: &str, code: &str) -> OtpVerdict {
        self.verify_at(email, code, now())
    }

    pub fn verify_at(&self, email: &str, code: &str, now: i64) -> OtpVerdict {
        let email = normalize(email);
        let mut pending = guard(&self.pending);
        let Some(entry) = pending.get_mut(&email) else {
            return OtpVerdict::Missing;
        };

        if now >= entry.expires_at {
            pending.remove(&email);
            return OtpVerdict::Expired;
        }

        if bool::from(entry.code.as_bytes().ct_eq(code.trim().as_bytes())) {
            pending.remove(&email);
            return OtpVerdict::Valid;
        }

        entry.attempts += 1;
        if entry.attempts >= OTP_MAX_ATTEMPTS {
            pending.remove(&email);
            return OtpVerdict::TooManyAttempts;
        }
        OtpVerdict::Invalid {
            attempts_left: OTP_MAX_ATTEMPTS - entry.attempts,
        }
    }

    /// Drop expired codes. Returns how many were removed.
    pub fn prune_expired(&self, now: i64) -> usize {
        let mut pending = guard(&self.pending);
        let before = pending.len();
        pending.retain(|_, entry| entry.expires_at > now);
        before - pending.len()
    }
}

#[derive(Debug, Default)]
struct SendHistory {
    sends: VecDeque<i64>,
    blocked_until: Option<i64>,
}

/// Limits how often one email may be sent a login code: 5 sends per rolling
/// hour, after which further requests are refused for an hour.
#[derive(Default)]
pub struct OtpSendLimiter {
    history: Mutex<HashMap<String, SendHistory>>,
}

impl OtpSendLimiter {
    /// Record a send, or return the seconds left in the cooldown.
    pub fn check_and_record(&self, email: &str) -> Result<(), i64> {
        self.check_and_record_at(email, now())
    }

    pub fn check_and_record_at(&self, email: &str, now: i64) -> Result<(), i64> {
        let mut history = guard(&self.history);
        let entry = history.entry(normalize(email)).or_default();

        if let Some(until) = entry.blocked_until {
            if now < until {
                return Err(until - now);
            }
            entry.blocked_until = None;
            entry.sends.clear();
        }

        while entry
            .sends
            .front()
            .is_some_and(|sent| now - sent >= OTP_SEND_WINDOW_SECS)
        {
            entry.sends.pop_front();
        }

        if entry.sends.len() >= OTP_SENDS_PER_WINDOW {
            let until = now + OTP_COOLDOWN_SECS;
            entry.blocked_until = Some(until);
            return Err(until - now);
        }

        entry.sends.push_back(now);
        Ok(())
    }

    pub fn prune(&self, now: i64) -> usize {
        let mut history = guard(&self.history);
        let before = history.len();
        history.retain(|_, entry| {
            entry.blocked_until.is_some_and(|until| until > now)
                || entry
                    .sends
                    .back()
                    .is_some_and(|sent| now - sent < OTP_SEND_WINDOW_SECS)
        });
        before - history.len()
    }
}

pub fn cooldown_message(wait_secs: i64) -> String {
    let minutes = (wait_secs + 59) / 60;
    format!(
        "Too many login codes requested. Try again in {} minutes.",
        minutes.max(1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_six_digits_and_single_use() {
        let store = OtpStore::default();
        let code = store.issue_at("Op@Example.com", 1000);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        assert_eq!(store.verify_at("op@example.com", &code, 1001), OtpVerdict::Valid);
        assert_eq!(store.verify_at("op@example.com", &code, 1002), OtpVerdict::Missing);
    }

    #[test]
    fn test_wrong_guesses_burn_the_code() {
        let store = OtpStore::default();
        let code = store.issue_at("op@example.com", 0);
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for left in (1..OTP_MAX_ATTEMPTS).rev() {
            assert_eq!(
                store.verify_at("op@example.com", wrong, 1),
                OtpVerdict::Invalid { attempts_left: left }
            );
        }
        assert_eq!(
            store.verify_at("op@example.com", wrong, 1),
            OtpVerdict::TooManyAttempts
        );
        // Even the right code is gone now
        assert_eq!(store.verify_at("op@example.com", &code, 2), OtpVerdict::Missing);
    }

    #[test]
    fn test_expiry() {
        let store = OtpStore::default();
        let code = store.issue_at("op@example.com", 0);
        assert_eq!(
            store.verify_at("op@example.com", &code, OTP_TTL_SECS),
            OtpVerdict::Expired
        );

        store.issue_at("a@example.com", 0);
        store.issue_at("b@example.com", 500);
        assert_eq!(store.prune_expired(OTP_TTL_SECS), 1);
    }

    #[test]
    fn test_sixth_send_in_an_hour_starts_cooldown() {
        let limiter = OtpSendLimiter::default();
        for i in 0..5 {
            assert!(limiter.check_and_record_at("op@example.com", i * 60).is_ok());
        }
        let wait = limiter.check_and_record_at("op@example.com", 300).unwrap_err();
        assert_eq!(wait, OTP_COOLDOWN_SECS);
        assert_eq!(cooldown_message(wait), "Too many login codes requested. Try again in 60 minutes.");

        // Still blocked later in the cooldown, even though the window rolled
        assert!(limiter.check_and_record_at("op@example.com", 300 + 3599).is_err());
        assert!(limiter.check_and_record_at("op@example.com", 300 + 3600).is_ok());

        // Other emails are unaffected
        assert!(limiter.check_and_record_at("other@example.com", 300).is_ok());
    }

    #[test]
    fn test_rolling_window_frees_slots() {
        let limiter = OtpSendLimiter::default();
        for i in 0..5 {
            assert!(limiter.check_and_record_at("op@example.com", i).is_ok());
        }
        assert!(limiter.check_and_record_at("op@example.com", OTP_SEND_WINDOW_SECS).is_ok());
    }
}

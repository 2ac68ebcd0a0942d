mod from_row;
pub mod queries;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::auth::{OtpSendLimiter, OtpStore};
use crate::config::Config;
use crate::email::EmailService;
use crate::error::Result;
use crate::fulfillment::InFlightOrders;
use crate::keys::KeyPool;
use crate::middleware::PaymentRateLimiter;
use crate::mirror::RemoteMirror;
use crate::models::Period;
use crate::notify::Notifier;
use crate::payments::BankStatementClient;
use crate::stores::{CouponStore, PriceStore, SettingsStore};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Everything a request handler, the bot console or the janitor needs.
///
/// Built once at startup and cloned into each consumer; the in-memory pieces
/// (login codes, rate limits, per-file locks) live behind `Arc`s here instead
/// of in module-level globals.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub keys: Arc<KeyPool>,
    pub coupons: Arc<CouponStore>,
    pub prices: Arc<PriceStore>,
    pub settings: Arc<SettingsStore>,
    pub bank: BankStatementClient,
    pub email: EmailService,
    pub notifier: Notifier,
    pub mirror: Option<RemoteMirror>,
    pub otp: Arc<OtpStore>,
    pub otp_limiter: Arc<OtpSendLimiter>,
    pub payment_limiter: Arc<PaymentRateLimiter>,
    pub fulfillments: Arc<InFlightOrders>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Result<Self> {
        let offset = config.shop_offset();
        let http_timeout = Duration::from_secs(config.http_timeout_secs);

        let keys = KeyPool::with_offset(config.keys_dir(), offset)?;
        let coupons = CouponStore::new(config.coupon_dir(), offset);
        let prices = PriceStore::new(config.data_dir.join("prices.json"));
        let settings = SettingsStore::new(config.data_dir.join("settings.json"));

        let bank = BankStatementClient::new(
            config.bank_api_url.clone(),
            Duration::from_secs(config.bank_timeout_secs),
            offset,
        )?;
        let email = EmailService::from_config(&config, http_timeout)?;
        let notifier = Notifier::new(
            config.telegram_bot_token.clone(),
            config.telegram_api_url.clone(),
            config.telegram_admin_chat_id,
            http_timeout,
        )?;
        let mirror = config
            .mirror
            .as_ref()
            .map(|m| RemoteMirror::new(m, http_timeout))
            .transpose()?;
        let payment_limiter = PaymentRateLimiter::per_minute(config.payment_checks_per_minute);

        Ok(Self {
            db,
            config: Arc::new(config),
            keys: Arc::new(keys),
            coupons: Arc::new(coupons),
            prices: Arc::new(prices),
            settings: Arc::new(settings),
            bank,
            email,
            notifier,
            mirror,
            otp: Arc::new(OtpStore::default()),
            otp_limiter: Arc::new(OtpSendLimiter::default()),
            payment_limiter: Arc::new(payment_limiter),
            fulfillments: Arc::new(InFlightOrders::default()),
        })
    }

    /// Push one pool to the mirror, if configured. Failures are logged only.
    pub async fn mirror_pool(&self, period: Period) {
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.push_pool(&self.keys, period).await {
                tracing::warn!(period = %period, error = %e, "Failed to push key pool to mirror");
            }
        }
    }
}

pub fn create_pool(database_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Ok(())
    });
    let pool = Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL UNIQUE,
    email TEXT,
    key TEXT,
    verification_code TEXT NOT NULL,
    promo_code TEXT,
    paid INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_paid_created ON orders(paid, created_at);
CREATE INDEX IF NOT EXISTS idx_orders_key ON orders(key);

CREATE TABLE IF NOT EXISTS deliveries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL,
    email TEXT NOT NULL,
    key TEXT NOT NULL,
    period TEXT NOT NULL,
    original_amount INTEGER NOT NULL,
    discount_percent INTEGER NOT NULL DEFAULT 0,
    final_amount INTEGER NOT NULL,
    promo_code TEXT,
    tx_fingerprint TEXT,
    delivered_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_deliveries_tx ON deliveries(tx_fingerprint);
CREATE INDEX IF NOT EXISTS idx_deliveries_uid ON deliveries(uid);

CREATE TABLE IF NOT EXISTS promo_codes (
    code TEXT PRIMARY KEY,
    discount INTEGER NOT NULL,
    uses_left INTEGER NOT NULL,
    expires_at INTEGER
);

CREATE TABLE IF NOT EXISTS admin_sessions (
    token_hash TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS bot_chats (
    chat_id INTEGER PRIMARY KEY,
    username TEXT,
    first_seen_at INTEGER NOT NULL
);
"#,
    )?;
    Ok(())
}

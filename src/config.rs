use std::env;
use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};

const DEFAULT_SENDGRID_API_URL: &str = "https://api.sendgrid.com";
const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Root for key pools (`keys/`), coupons (`coupon/`) and the JSON stores.
    pub data_dir: PathBuf,
    pub dev_mode: bool,
    /// Bank transaction-history endpoint (None = payment checks unavailable)
    pub bank_api_url: Option<String>,
    pub bank_timeout_secs: u64,
    /// Offset of the shop's wall clock (bank timestamps, coupon expiry dates)
    pub shop_utc_offset_hours: i32,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_api_url: String,
    pub from_email: String,
    pub email_template_path: Option<PathBuf>,
    /// Link included in delivery emails (download / instructions page)
    pub delivery_link: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_api_url: String,
    pub telegram_admin_chat_id: Option<i64>,
    pub admin_emails: Vec<String>,
    /// Shared dashboard password. Bypasses per-operator login codes.
    pub admin_password: Option<String>,
    pub mirror: Option<MirrorConfig>,
    pub stale_order_minutes: i64,
    pub janitor_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub payment_checks_per_minute: u32,
    /// Key the payment limiter on `X-Forwarded-For` / `X-Real-IP`. Only safe
    /// behind a reverse proxy that overwrites those headers.
    pub trust_proxy: bool,
}

/// Source-hosting repository used as a best-effort replica of the data dir.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub api_url: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("KEYSHOP_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env_parse("PORT", 5550);

        let admin_emails = env::var("ADMIN_EMAILS")
            .map(|v| {
                v.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mirror = match (
            env_nonempty("GITHUB_TOKEN"),
            env_nonempty("GITHUB_OWNER"),
            env_nonempty("GITHUB_REPO"),
        ) {
            (Some(token), Some(owner), Some(repo)) => Some(MirrorConfig {
                token,
                owner,
                repo,
                branch: env_nonempty("GITHUB_BRANCH"),
                api_url: env::var("GITHUB_API_URL")
                    .unwrap_or_else(|_| DEFAULT_GITHUB_API_URL.to_string()),
            }),
            _ => None,
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "orders.db".to_string()),
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            dev_mode,
            bank_api_url: env_nonempty("BANK_API_URL"),
            bank_timeout_secs: env_parse("BANK_TIMEOUT_SECS", 15),
            shop_utc_offset_hours: env_parse("SHOP_UTC_OFFSET_HOURS", 7),
            sendgrid_api_key: env_nonempty("SENDGRID_API_KEY"),
            sendgrid_api_url: env::var("SENDGRID_API_URL")
                .unwrap_or_else(|_| DEFAULT_SENDGRID_API_URL.to_string()),
            from_email: env::var("FROM_EMAIL").unwrap_or_else(|_| "noreply@localhost".to_string()),
            email_template_path: env_nonempty("EMAIL_TEMPLATE_PATH").map(PathBuf::from),
            delivery_link: env::var("DELIVERY_LINK").unwrap_or_default(),
            telegram_bot_token: env_nonempty("TG_BOT_TOKEN"),
            telegram_api_url: env::var("TG_API_URL")
                .unwrap_or_else(|_| DEFAULT_TELEGRAM_API_URL.to_string()),
            telegram_admin_chat_id: env::var("TG_ADMIN_CHAT_ID")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            admin_emails,
            admin_password: env_nonempty("ADMIN_PASSWORD"),
            mirror,
            stale_order_minutes: env_parse("STALE_ORDER_MINUTES", 24 * 60),
            janitor_interval_secs: env_parse("JANITOR_INTERVAL_SECS", 600),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 10),
            payment_checks_per_minute: env_parse("PAYMENT_CHECKS_PER_MINUTE", 12),
            trust_proxy: env_parse("TRUST_PROXY", false),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The shop's fixed UTC offset. Out-of-range values fall back to UTC.
    pub fn shop_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.shop_utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    pub fn coupon_dir(&self) -> PathBuf {
        self.data_dir.join("coupon")
    }
}

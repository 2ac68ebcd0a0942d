//! Bank-statement payment matcher.
//!
//! The statement endpoint returns the account's recent transactions in one
//! response; a payment is found by scanning it for an inbound transfer with the
//! exact amount and the order's verification code in its memo.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

const TRANSACTION_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const MATCH_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// String with thousands separators (`"1.000"`) or a plain number
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub description: String,
    /// `DD/MM/YYYY HH:MM:SS`, shop time
    #[serde(rename = "transactionDate", default)]
    pub transaction_date: String,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    transactions: Vec<BankTransaction>,
}

impl BankTransaction {
    pub fn is_inbound(&self) -> bool {
        self.kind.eq_ignore_ascii_case("IN") || self.kind.eq_ignore_ascii_case("CREDIT")
    }

    /// Amount with `,` and `.` separators stripped. `None` when unparseable.
    pub fn parsed_amount(&self) -> Option<i64> {
        match &self.amount {
            Value::String(s) => s.replace([',', '.'], "").trim().parse().ok(),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn timestamp(&self, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
        let naive =
            NaiveDateTime::parse_from_str(self.transaction_date.trim(), TRANSACTION_DATE_FORMAT)
                .ok()?;
        offset.from_local_datetime(&naive).single()
    }

    /// Stable identity of a transaction, used to refuse paying two orders with one transfer.
    pub fn fingerprint(&self) -> String {
        let amount = match &self.amount {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut hasher = Sha256::new();
        hasher.update(self.transaction_date.as_bytes());
        hasher.update(b"|");
        hasher.update(amount.as_bytes());
        hasher.update(b"|");
        hasher.update(self.description.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// First transaction that is inbound, has exactly `expected_amount`, carries
/// `code` in its memo (case-insensitive) and is less than 24 hours old.
///
/// Checks run cheapest first. Transactions with an unparseable amount or date
/// are skipped.
pub fn scan_transactions<'a>(
    transactions: &'a [BankTransaction],
    code: &str,
    expected_amount: i64,
    now: DateTime<FixedOffset>,
) -> Option<&'a BankTransaction> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return None;
    }
    let window = chrono::Duration::hours(MATCH_WINDOW_HOURS);

    transactions.iter().find(|tx| {
        if !tx.is_inbound() {
            return false;
        }
        if tx.parsed_amount() != Some(expected_amount) {
            return false;
        }
        if !tx.description.to_uppercase().contains(&code) {
            return false;
        }
        match tx.timestamp(*now.offset()) {
            Some(at) => now.signed_duration_since(at) < window,
            None => false,
        }
    })
}

#[derive(Clone)]
pub struct BankStatementClient {
    client: Client,
    url: Option<String>,
    offset: FixedOffset,
}

impl BankStatementClient {
    pub fn new(url: Option<String>, timeout: Duration, offset: FixedOffset) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build bank HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url,
            offset,
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// One GET of the full recent-transaction list. Every failure is `Upstream`.
    pub async fn fetch_transactions(&self) -> Result<Vec<BankTransaction>> {
        let Some(url) = self.url.as_deref() else {
            return Err(AppError::Upstream(
                "Payment checking is not configured".into(),
            ));
        };

        let response = self
            .client
            .get(url)
            .header("User-Agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64)")
            .header("Accept", "application/json, text/plain, */*")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Bank statement request failed");
                AppError::Upstream(format!("Could not read bank statement: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Bank statement endpoint returned an error");
            return Err(AppError::Upstream(format!(
                "Could not read bank statement: HTTP {}",
                status
            )));
        }

        let statement: StatementResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "Bank statement response was not valid JSON");
            AppError::Upstream(format!("Could not read bank statement: {}", e))
        })?;
        Ok(statement.transactions)
    }

    pub async fn find_matching_transaction(
        &self,
        verification_code: &str,
        expected_amount: i64,
    ) -> Result<Option<BankTransaction>> {
        let transactions = self.fetch_transactions().await?;
        let now = Utc::now().with_timezone(&self.offset);
        let found = scan_transactions(&transactions, verification_code, expected_amount, now).cloned();
        tracing::debug!(
            code = %verification_code,
            amount = expected_amount,
            scanned = transactions.len(),
            matched = found.is_some(),
            "Scanned bank statement"
        );
        Ok(found)
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::models::{Period, PriceEntry, UpdatePrice};

use super::JsonDocument;

pub type PriceMap = BTreeMap<String, PriceEntry>;

fn default_entry(period: Period) -> PriceEntry {
    let amount = match period {
        Period::OneDay => 25_000,
        Period::SevenDays => 70_000,
        Period::ThirtyDays => 250_000,
        Period::NinetyDays => 600_000,
    };
    PriceEntry {
        label: period.display_label().to_string(),
        amount,
        currency: "VND".to_string(),
    }
}

/// Price table (`prices.json`) keyed by period code. Periods missing from the
/// file fall back to the built-in defaults.
pub struct PriceStore {
    doc: JsonDocument<PriceMap>,
}

impl PriceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: JsonDocument::new(path),
        }
    }

    pub fn get(&self, period: Period) -> Result<PriceEntry> {
        Ok(self
            .doc
            .load()?
            .remove(period.code())
            .unwrap_or_else(|| default_entry(period)))
    }

    /// Every period in display order.
    pub fn all(&self) -> Result<Vec<(Period, PriceEntry)>> {
        let mut stored = self.doc.load()?;
        Ok(Period::all()
            .map(|period| {
                let entry = stored
                    .remove(period.code())
                    .unwrap_or_else(|| default_entry(period));
                (period, entry)
            })
            .collect())
    }

    pub fn set(&self, period: Period, input: UpdatePrice) -> Result<PriceEntry> {
        self.doc.update(|prices| {
            let mut entry = prices
                .remove(period.code())
                .unwrap_or_else(|| default_entry(period));
            entry.amount = input.amount;
            if let Some(label) = input.label.filter(|l| !l.trim().is_empty()) {
                entry.label = label.trim().to_string();
            }
            if let Some(currency) = input.currency.filter(|c| !c.trim().is_empty()) {
                entry.currency = currency.trim().to_uppercase();
            }
            prices.insert(period.code().to_string(), entry.clone());
            entry
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_then_override() {
        let dir = tempfile::tempdir().unwrap();
        let store = PriceStore::new(dir.path().join("prices.json"));

        let month = store.get(Period::ThirtyDays).unwrap();
        assert_eq!(month.amount, 250_000);
        assert_eq!(month.label, "1 Month");

        let updated = store
            .set(
                Period::ThirtyDays,
                UpdatePrice {
                    label: None,
                    amount: 199_000,
                    currency: Some("vnd".into()),
                },
            )
            .unwrap();
        assert_eq!(updated.amount, 199_000);
        assert_eq!(updated.label, "1 Month");
        assert_eq!(updated.currency, "VND");

        let all = store.all().unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[2].1.amount, 199_000);
        assert_eq!(all[0].1.amount, 25_000);
    }
}

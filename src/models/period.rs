use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoEnumIterator};

/// License validity window sold by the shop. Doubles as the key-pool selector.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    EnumIter,
)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    #[strum(serialize = "1d")]
    OneDay,
    #[strum(serialize = "7d")]
    SevenDays,
    #[strum(serialize = "30d")]
    ThirtyDays,
    #[strum(serialize = "90d")]
    NinetyDays,
}

impl Period {
    /// Parse a period code. Case-insensitive; the storefront's legacy `_v2`
    /// variants map to the same pools.
    pub fn parse(code: &str) -> Option<Self> {
        let normalized = code.trim().to_lowercase();
        let base = normalized.strip_suffix("_v2").unwrap_or(&normalized);
        base.parse().ok()
    }

    pub fn all() -> impl Iterator<Item = Period> {
        Period::iter()
    }

    pub fn code(&self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::SevenDays => "7d",
            Period::ThirtyDays => "30d",
            Period::NinetyDays => "90d",
        }
    }

    pub fn days(&self) -> u32 {
        match self {
            Period::OneDay => 1,
            Period::SevenDays => 7,
            Period::ThirtyDays => 30,
            Period::NinetyDays => 90,
        }
    }

    pub fn pool_file_name(&self) -> String {
        format!("key{}.txt", self.code())
    }

    /// Human-readable label used in emails and bot messages.
    pub fn display_label(&self) -> &'static str {
        match self {
            Period::OneDay => "1 Day",
            Period::SevenDays => "1 Week",
            Period::ThirtyDays => "1 Month",
            Period::NinetyDays => "1 Season",
        }
    }

    /// The "N day" wording the storefront shows next to a delivered key.
    pub fn duration_text(&self) -> String {
        format!("{} day", self.days())
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Period::parse(&value).ok_or_else(|| format!("unknown period '{}'", value))
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_legacy_suffix_and_case() {
        assert_eq!(Period::parse("30d"), Some(Period::ThirtyDays));
        assert_eq!(Period::parse("30d_v2"), Some(Period::ThirtyDays));
        assert_eq!(Period::parse(" 7D "), Some(Period::SevenDays));
        assert_eq!(Period::parse("2d"), None);
        assert_eq!(Period::parse(""), None);
    }

    #[test]
    fn test_pool_file_names() {
        let names: Vec<String> = Period::all().map(|p| p.pool_file_name()).collect();
        assert_eq!(
            names,
            vec!["key1d.txt", "key7d.txt", "key30d.txt", "key90d.txt"]
        );
    }

    #[test]
    fn test_serde_uses_codes() {
        let json = serde_json::to_string(&Period::NinetyDays).unwrap();
        assert_eq!(json, "\"90d\"");
        let parsed: Period = serde_json::from_str("\"1d_v2\"").unwrap();
        assert_eq!(parsed, Period::OneDay);
        assert!(serde_json::from_str::<Period>("\"365d\"").is_err());
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Data category served by a pool of interchangeable providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Spot prices, market caps, volumes
    MarketData,
    /// Candles for a symbol + interval
    Ohlcv,
    /// Headlines and articles
    News,
    /// Fear & Greed and similar indices
    Sentiment,
    /// Chain metrics (gas, hash rate, whale flows)
    Onchain,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::MarketData,
        Category::Ohlcv,
        Category::News,
        Category::Sentiment,
        Category::Onchain,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::Ohlcv => "ohlcv",
            Self::News => "news",
            Self::Sentiment => "sentiment",
            Self::Onchain => "onchain",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_accepts_dashes_and_case() {
        assert_eq!("market-data".parse::<Category>().unwrap(), Category::MarketData);
        assert_eq!("OHLCV".parse::<Category>().unwrap(), Category::Ohlcv);
        assert!("weather".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_uses_snake_case() {
        let json = serde_json::to_string(&Category::MarketData).unwrap();
        assert_eq!(json, "\"market_data\"");
    }
}

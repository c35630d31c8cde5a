//! 거래 쌍 정의.
//!
//! `Pair`는 기준 자산과 호가 자산으로 이루어진 거래 상품을 나타냅니다.
//! 예: BTC/USDT, ETH/BTC.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FeedError;

/// 문자열 파싱 시 허용하는 구분자.
const DELIMITERS: [char; 3] = ['/', '-', '_'];

/// 거래 쌍.
///
/// 직렬화 시 "BASE/QUOTE" 문자열로 표현됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    /// 기준 자산 (예: BTC)
    pub base: String,
    /// 호가 자산 (예: USDT)
    pub quote: String,
}

impl Pair {
    /// 새 거래 쌍을 생성합니다.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// 지정한 구분자로 연결한 문자열을 반환합니다 (예: "BTC-USDT").
    pub fn format_with(&self, delimiter: &str) -> String {
        format!("{}{}{}", self.base, delimiter, self.quote)
    }

    /// 구분자 없이 소문자로 연결한 문자열을 반환합니다 (예: "btcusdt").
    pub fn lower_concat(&self) -> String {
        format!("{}{}", self.base, self.quote).to_lowercase()
    }
}

impl FromStr for Pair {
    type Err = FeedError;

    /// "BASE/QUOTE", "BASE-QUOTE", "BASE_QUOTE" 형식을 파싱합니다.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(&DELIMITERS[..]);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(FeedError::InvalidInput(format!("잘못된 거래 쌍: {}", s))),
        }
    }
}

impl TryFrom<String> for Pair {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.to_string()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_creation() {
        let pair = Pair::new("btc", "usdt");
        assert_eq!(pair.base, "BTC");
        assert_eq!(pair.quote, "USDT");
        assert_eq!(pair.to_string(), "BTC/USDT");
    }

    #[test]
    fn test_pair_parsing() {
        for input in ["ETH/BTC", "eth-btc", "ETH_BTC"] {
            let pair: Pair = input.parse().unwrap();
            assert_eq!(pair, Pair::new("ETH", "BTC"));
        }

        assert!("ETHBTC".parse::<Pair>().is_err());
        assert!("ETH/".parse::<Pair>().is_err());
        assert!("A/B/C".parse::<Pair>().is_err());
    }

    #[test]
    fn test_pair_serde_as_string() {
        let pair = Pair::new("btc", "usdt");
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(json, "\"BTC/USDT\"");

        let parsed: Pair = serde_json::from_str("\"eth_btc\"").unwrap();
        assert_eq!(parsed, Pair::new("ETH", "BTC"));
        assert!(serde_json::from_str::<Pair>("\"ETHBTC\"").is_err());
    }

    #[test]
    fn test_pair_formatting() {
        let pair = Pair::new("BTC", "USDT");
        assert_eq!(pair.format_with("-"), "BTC-USDT");
        assert_eq!(pair.lower_concat(), "btcusdt");
    }
}

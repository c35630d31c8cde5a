//! 자산 유형 정의.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FeedError;

/// 거래 상품의 자산 유형.
///
/// 같은 거래 쌍이라도 자산 유형이 다르면 별개의 호가창을 가집니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// 현물
    Spot,
    /// 마진
    Margin,
    /// 만기 선물
    Futures,
    /// 무기한 스왑
    PerpetualSwap,
    /// 옵션
    Options,
    /// 지수
    Index,
}

impl AssetType {
    /// 모든 자산 유형 반환.
    pub fn all() -> [AssetType; 6] {
        [
            AssetType::Spot,
            AssetType::Margin,
            AssetType::Futures,
            AssetType::PerpetualSwap,
            AssetType::Options,
            AssetType::Index,
        ]
    }

    /// 파생상품 여부.
    pub fn is_derivative(&self) -> bool {
        matches!(
            self,
            AssetType::Futures | AssetType::PerpetualSwap | AssetType::Options
        )
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Spot => write!(f, "spot"),
            AssetType::Margin => write!(f, "margin"),
            AssetType::Futures => write!(f, "futures"),
            AssetType::PerpetualSwap => write!(f, "perpetual_swap"),
            AssetType::Options => write!(f, "options"),
            AssetType::Index => write!(f, "index"),
        }
    }
}

impl FromStr for AssetType {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spot" => Ok(AssetType::Spot),
            "margin" => Ok(AssetType::Margin),
            "futures" => Ok(AssetType::Futures),
            "perpetual_swap" | "perpetual" | "swap" => Ok(AssetType::PerpetualSwap),
            "options" | "option" => Ok(AssetType::Options),
            "index" => Ok(AssetType::Index),
            _ => Err(FeedError::InvalidInput(format!("알 수 없는 자산 유형: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_from_str() {
        for asset in AssetType::all() {
            assert_eq!(asset.to_string().parse::<AssetType>().unwrap(), asset);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("SWAP".parse::<AssetType>().unwrap(), AssetType::PerpetualSwap);
        assert!("bond".parse::<AssetType>().is_err());
        assert!(AssetType::Options.is_derivative());
        assert!(!AssetType::Spot.is_derivative());
    }
}

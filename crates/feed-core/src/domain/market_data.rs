//! 시장 데이터 타입 및 구조체.
//!
//! 이 모듈은 호가창 외의 정규화된 시장 데이터를 정의합니다:
//! - `Ticker` - 실시간 시세 데이터
//! - `Trade` - 체결 데이터

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Side;
use crate::types::{Amount, AssetType, Pair, Price};

/// 실시간 시세 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// 거래소 이름
    #[serde(default)]
    pub exchange: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
    /// 최우선 매수 호가
    pub bid: Price,
    /// 최우선 매도 호가
    pub ask: Price,
    /// 최근 체결가
    pub last: Price,
    /// 24시간 거래량
    #[serde(default)]
    pub volume_24h: Amount,
    /// 24시간 최고가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<Price>,
    /// 24시간 최저가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<Price>,
    /// 타임스탬프
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// 매수/매도 스프레드를 반환합니다.
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// 스프레드를 백분율로 반환합니다.
    pub fn spread_pct(&self) -> Decimal {
        if self.bid.is_zero() {
            return Decimal::ZERO;
        }
        (self.spread() / self.bid) * Decimal::from(100)
    }

    /// 중간 가격을 반환합니다.
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }
}

/// 체결 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// 거래소 이름
    #[serde(default)]
    pub exchange: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
    /// 체결 ID
    #[serde(default)]
    pub id: String,
    /// 가격
    pub price: Price,
    /// 수량
    pub amount: Amount,
    /// 테이커 방향 (매수 체결이면 Ask를 소진)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    /// 타임스탬프
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// 체결 대금을 반환합니다.
    pub fn notional(&self) -> Decimal {
        self.price * self.amount
    }
}

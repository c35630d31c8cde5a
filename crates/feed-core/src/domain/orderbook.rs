//! 호가창 도메인 타입.
//!
//! - `Orderbook` - 거래소/거래 쌍/자산 유형별 전체 호가창 (스냅샷 단위)
//! - `PriceLevel` - 가격 레벨 (ID 기반 호가창에서는 주문 ID 포함)
//! - `DepthUpdate` / `UpdateRecord` - 정규화된 델타 변경분
//! - `BookKey` - 호가창 저장소의 파티션 키

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::types::{is_valid_price, Amount, AssetType, Pair, Price};

/// 호가 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// 매수 호가
    Bid,
    /// 매도 호가
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// ID 기반 호가창의 델타 동작.
///
/// 제거 의도는 항상 명시적인 `Delete`로 표현되며, 잔량 크기로 추론하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    /// 새 레벨 삽입
    Insert,
    /// 기존 레벨 수정
    Update,
    /// 기존 레벨 삭제
    Delete,
    /// 있으면 수정, 없으면 삽입
    Upsert,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateAction::Insert => write!(f, "insert"),
            UpdateAction::Update => write!(f, "update"),
            UpdateAction::Delete => write!(f, "delete"),
            UpdateAction::Upsert => write!(f, "upsert"),
        }
    }
}

/// 호가창 가격 레벨.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// 가격
    pub price: Price,
    /// 잔량 (존재하는 동안 항상 양수)
    pub amount: Amount,
    /// 주문 ID (ID 기반 호가창 전용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl PriceLevel {
    /// 가격 기반 레벨을 생성합니다.
    pub fn new(price: Price, amount: Amount) -> Self {
        Self {
            price,
            amount,
            id: None,
        }
    }

    /// ID 기반 레벨을 생성합니다.
    pub fn with_id(id: impl Into<String>, price: Price, amount: Amount) -> Self {
        Self {
            price,
            amount,
            id: Some(id.into()),
        }
    }
}

/// 호가창 저장소의 파티션 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookKey {
    /// 거래소 이름
    pub exchange: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
}

impl BookKey {
    /// 새 키를 생성합니다.
    pub fn new(exchange: impl Into<String>, pair: Pair, asset: AssetType) -> Self {
        Self {
            exchange: exchange.into(),
            pair,
            asset,
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.pair, self.asset)
    }
}

/// 호가창 데이터.
///
/// 항상 전체 스냅샷으로만 생성되며, 이후 델타로 갱신됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orderbook {
    /// 거래소 이름
    pub exchange: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
    /// 매수 호가 - 가격 내림차순 정렬
    pub bids: Vec<PriceLevel>,
    /// 매도 호가 - 가격 오름차순 정렬
    pub asks: Vec<PriceLevel>,
    /// 마지막 업데이트 타임스탬프
    pub last_updated: DateTime<Utc>,
    /// 거래소가 부여한 마지막 업데이트 시퀀스
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_id: Option<i64>,
    /// 거래소 체크섬
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
    /// 주문 ID로 레벨을 식별하는 호가창 여부
    #[serde(default)]
    pub id_aligned: bool,
}

impl Orderbook {
    /// 빈 호가창을 생성합니다.
    pub fn new(exchange: impl Into<String>, pair: Pair, asset: AssetType) -> Self {
        Self {
            exchange: exchange.into(),
            pair,
            asset,
            bids: Vec::new(),
            asks: Vec::new(),
            last_updated: Utc::now(),
            last_update_id: None,
            checksum: None,
            id_aligned: false,
        }
    }

    /// 매수/매도 레벨을 지정합니다.
    pub fn with_levels(mut self, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        self.bids = bids;
        self.asks = asks;
        self
    }

    /// ID 기반 호가창으로 표시합니다.
    pub fn id_aligned(mut self) -> Self {
        self.id_aligned = true;
        self
    }

    /// 저장소 키를 반환합니다.
    pub fn key(&self) -> BookKey {
        BookKey::new(self.exchange.clone(), self.pair.clone(), self.asset)
    }

    /// 양쪽 모두 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// 방향별 레벨을 반환합니다.
    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// 최우선 매수 호가를 반환합니다.
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    /// 최우선 매도 호가를 반환합니다.
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    /// 스프레드를 반환합니다.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// 중간 가격을 반환합니다.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// 호가창 불변식을 검증합니다.
    ///
    /// - 모든 레벨의 가격과 잔량은 양수
    /// - 매수는 내림차순, 매도는 오름차순
    /// - 가격 기반 호가창은 가격 중복 불가 (엄격한 정렬)
    /// - ID 기반 호가창은 같은 방향 내 ID 중복 불가, 모든 레벨에 ID 필요
    pub fn verify(&self) -> Result<(), String> {
        self.verify_side(Side::Bid)?;
        self.verify_side(Side::Ask)
    }

    fn verify_side(&self, side: Side) -> Result<(), String> {
        let levels = self.side(side);
        let mut ids = HashSet::new();

        for (i, level) in levels.iter().enumerate() {
            if !is_valid_price(level.price) {
                return Err(format!("{} level {} has invalid price {}", side, i, level.price));
            }
            if level.amount <= Decimal::ZERO {
                return Err(format!(
                    "{} level {} at {} has non-positive amount {}",
                    side, i, level.price, level.amount
                ));
            }

            if self.id_aligned {
                match &level.id {
                    Some(id) if !ids.insert(id.as_str()) => {
                        return Err(format!("{} level id {} is duplicated", side, id));
                    }
                    Some(_) => {}
                    None => return Err(format!("{} level {} is missing an id", side, i)),
                }
            }

            if i == 0 {
                continue;
            }
            let prev = levels[i - 1].price;
            let ordered = match (side, self.id_aligned) {
                (Side::Bid, false) => level.price < prev,
                (Side::Ask, false) => level.price > prev,
                (Side::Bid, true) => level.price <= prev,
                (Side::Ask, true) => level.price >= prev,
            };
            if !ordered {
                return Err(format!(
                    "{} levels out of order at index {}: {} after {}",
                    side, i, level.price, prev
                ));
            }
        }

        Ok(())
    }
}

/// 정규화된 레벨 변경분.
///
/// 방향은 레코드가 담긴 목록(`bids`/`asks`)으로 결정됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// 가격 (ID 기반 삭제에서는 무시됨)
    pub price: Price,
    /// 잔량 (가격 기반 호가창에서 0은 레벨 제거)
    pub amount: Amount,
    /// 주문 ID (ID 기반 호가창 전용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl UpdateRecord {
    /// 가격 기반 레코드를 생성합니다.
    pub fn new(price: Price, amount: Amount) -> Self {
        Self {
            price,
            amount,
            id: None,
        }
    }

    /// ID 기반 레코드를 생성합니다.
    pub fn with_id(id: impl Into<String>, price: Price, amount: Amount) -> Self {
        Self {
            price,
            amount,
            id: Some(id.into()),
        }
    }
}

/// 한 번의 델타 메시지로 전달되는 호가 변경분.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    /// 거래소 이름
    #[serde(default)]
    pub exchange: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
    /// 매수 변경분
    #[serde(default)]
    pub bids: Vec<UpdateRecord>,
    /// 매도 변경분
    #[serde(default)]
    pub asks: Vec<UpdateRecord>,
    /// 거래소 타임스탬프
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// 거래소 업데이트 시퀀스
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<i64>,
    /// ID 기반 동작 (None이면 가격 기반 델타)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<UpdateAction>,
}

impl DepthUpdate {
    /// 가격 기반 델타를 생성합니다.
    pub fn new(exchange: impl Into<String>, pair: Pair, asset: AssetType) -> Self {
        Self {
            exchange: exchange.into(),
            pair,
            asset,
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: Utc::now(),
            update_id: None,
            action: None,
        }
    }

    /// 매수/매도 변경분을 지정합니다.
    pub fn with_changes(mut self, bids: Vec<UpdateRecord>, asks: Vec<UpdateRecord>) -> Self {
        self.bids = bids;
        self.asks = asks;
        self
    }

    /// 업데이트 시퀀스를 지정합니다.
    pub fn with_update_id(mut self, update_id: i64) -> Self {
        self.update_id = Some(update_id);
        self
    }

    /// ID 기반 동작을 지정합니다.
    pub fn with_action(mut self, action: UpdateAction) -> Self {
        self.action = Some(action);
        self
    }

    /// 저장소 키를 반환합니다.
    pub fn key(&self) -> BookKey {
        BookKey::new(self.exchange.clone(), self.pair.clone(), self.asset)
    }

    /// 전체 변경 레코드 수.
    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    /// 변경 레코드가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

//! 이벤트 버스로 전달되는 이벤트.
//!
//! 모든 이벤트는 거래소 이름을 포함하며, 호가창/시장 데이터 이벤트는
//! 거래 쌍과 자산 유형도 포함합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{BookKey, Subscription, Ticker, Trade};
use crate::types::{AssetType, Pair};

/// 호가창 갱신 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookAction {
    /// 전체 스냅샷 적용
    Snapshot,
    /// 델타 적용
    Update,
}

/// 호가창 갱신 알림.
///
/// 호출 한 번당 하나만 발행됩니다 (레벨 단위가 아님).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookNotice {
    /// 거래소 이름
    pub exchange: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
    /// 갱신 종류
    pub action: BookAction,
    /// 적용 후 호가창의 업데이트 시퀀스
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<i64>,
    /// 적용 시각
    pub timestamp: DateTime<Utc>,
}

impl OrderbookNotice {
    /// 키와 갱신 종류로 알림을 생성합니다.
    pub fn new(key: &BookKey, action: BookAction, update_id: Option<i64>) -> Self {
        Self {
            exchange: key.exchange.clone(),
            pair: key.pair.clone(),
            asset: key.asset,
            action,
            update_id,
            timestamp: Utc::now(),
        }
    }
}

/// 연결 에러 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    /// 연결 실패
    Dial,
    /// 핸드셰이크 실패
    Handshake,
    /// 수신 에러
    Read,
    /// 트래픽/퐁 부재
    Stale,
    /// 원격 종료
    Closed,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionErrorKind::Dial => write!(f, "dial"),
            ConnectionErrorKind::Handshake => write!(f, "handshake"),
            ConnectionErrorKind::Read => write!(f, "read"),
            ConnectionErrorKind::Stale => write!(f, "stale"),
            ConnectionErrorKind::Closed => write!(f, "closed"),
        }
    }
}

/// 이벤트 버스 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// 시세
    Ticker(Ticker),
    /// 체결
    Trade(Trade),
    /// 호가창 갱신 알림
    OrderbookUpdate(OrderbookNotice),
    /// 서버가 보낸 에러 프레임
    ProtocolError {
        exchange: String,
        code: Option<String>,
        message: String,
    },
    /// 연결 수준 에러
    ConnectionError {
        exchange: String,
        kind: ConnectionErrorKind,
        message: String,
    },
    /// 서버의 재연결 요청
    ResetRequested {
        exchange: String,
        reason: Option<String>,
    },
    /// 호가창 계약 위반 (재스냅샷 필요 여부 포함)
    BookError {
        exchange: String,
        pair: Pair,
        asset: AssetType,
        message: String,
        resync_required: bool,
    },
    /// 구독 실패 또는 거부
    SubscriptionError {
        exchange: String,
        subscription: Subscription,
        message: String,
    },
}

impl Event {
    /// 이벤트의 거래소 이름.
    pub fn exchange(&self) -> &str {
        match self {
            Event::Ticker(t) => &t.exchange,
            Event::Trade(t) => &t.exchange,
            Event::OrderbookUpdate(n) => &n.exchange,
            Event::ProtocolError { exchange, .. }
            | Event::ConnectionError { exchange, .. }
            | Event::ResetRequested { exchange, .. }
            | Event::BookError { exchange, .. }
            | Event::SubscriptionError { exchange, .. } => exchange,
        }
    }

    /// 이벤트가 가리키는 호가창 키 (해당하는 경우).
    pub fn book_key(&self) -> Option<BookKey> {
        match self {
            Event::OrderbookUpdate(n) => {
                Some(BookKey::new(n.exchange.clone(), n.pair.clone(), n.asset))
            }
            Event::BookError {
                exchange,
                pair,
                asset,
                ..
            } => Some(BookKey::new(exchange.clone(), pair.clone(), *asset)),
            _ => None,
        }
    }

    /// 에러 계열 이벤트인지 확인합니다.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::ProtocolError { .. }
                | Event::ConnectionError { .. }
                | Event::BookError { .. }
                | Event::SubscriptionError { .. }
        )
    }
}

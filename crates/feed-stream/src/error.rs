//! 스트림 에러 타입.

use feed_core::{BookKey, FeedError, Side, UpdateRecord};
use std::fmt;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// 부분 적용에서 건너뛴 변경분.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedUpdate {
    /// 레코드가 속한 방향
    pub side: Side,
    /// 원본 레코드
    pub record: UpdateRecord,
    /// 건너뛴 사유
    pub reason: String,
}

impl fmt::Display for SkippedUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record.id {
            Some(id) => write!(f, "{} id={} ({})", self.side, id, self.reason),
            None => write!(f, "{} price={} ({})", self.side, self.record.price, self.reason),
        }
    }
}

/// 스트림 관련 에러.
#[derive(Debug, Error)]
pub enum StreamError {
    /// 연결/핸드셰이크 에러 (해당 연결에 치명적)
    #[error("Connection error: {0}")]
    Connection(String),

    /// 프레임 전송 실패
    #[error("Send error: {0}")]
    Send(String),

    /// 프레임 디코딩 실패
    #[error("Decode error: {0}")]
    Decode(String),

    /// 서버가 보고한 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 스냅샷 없는 호가창에 델타 적용
    #[error("Order book not found: {0}")]
    BookNotFound(BookKey),

    /// 양쪽 모두 빈 스냅샷 (기존 호가창은 폐기됨)
    #[error("Empty order book snapshot: {0}")]
    EmptyBook(BookKey),

    /// 정렬/유효성 불변식 위반 스냅샷
    #[error("Invalid order book {key}: {reason}")]
    InvalidBook { key: BookKey, reason: String },

    /// 시퀀스가 역행한 델타
    #[error("Out of order update for {key}: {update_id} <= {last_update_id}")]
    OutOfOrder {
        key: BookKey,
        update_id: i64,
        last_update_id: i64,
    },

    /// 일부 레코드만 적용됨
    #[error("Partial update for {key}: {} record(s) skipped", .skipped.len())]
    PartialUpdate {
        key: BookKey,
        skipped: Vec<SkippedUpdate>,
    },

    /// 구독 에러
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// 비활성화된 연결
    #[error("Stream disabled: {0}")]
    Disabled(String),
}

/// 스트림 작업을 위한 Result 타입.
pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// 연결을 더 이상 사용할 수 없는 치명적 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Connection(_) | StreamError::Disabled(_))
    }

    /// 호가창 재스냅샷이 필요한 에러인지 확인.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            StreamError::BookNotFound(_)
                | StreamError::EmptyBook(_)
                | StreamError::InvalidBook { .. }
                | StreamError::OutOfOrder { .. }
        )
    }

    /// 호출자가 재시도할 수 있는 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Connection(_) | StreamError::Send(_))
    }

    /// 호가창 계약 에러라면 해당 키를 반환합니다.
    pub fn book_key(&self) -> Option<&BookKey> {
        match self {
            StreamError::BookNotFound(key)
            | StreamError::EmptyBook(key)
            | StreamError::InvalidBook { key, .. }
            | StreamError::OutOfOrder { key, .. }
            | StreamError::PartialUpdate { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Decode(err.to_string())
    }
}

impl From<tungstenite::Error> for StreamError {
    fn from(err: tungstenite::Error) -> Self {
        StreamError::Connection(err.to_string())
    }
}

impl From<FeedError> for StreamError {
    fn from(err: FeedError) -> Self {
        StreamError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::{AssetType, Pair};
    use rust_decimal_macros::dec;

    fn key() -> BookKey {
        BookKey::new("alpha", Pair::new("BTC", "USDT"), AssetType::Spot)
    }

    #[test]
    fn test_classification() {
        assert!(StreamError::Connection("refused".into()).is_fatal());
        assert!(StreamError::Connection("refused".into()).is_retryable());
        assert!(!StreamError::Decode("bad".into()).is_fatal());

        assert!(StreamError::BookNotFound(key()).requires_resync());
        assert!(StreamError::OutOfOrder {
            key: key(),
            update_id: 3,
            last_update_id: 5
        }
        .requires_resync());
        assert!(StreamError::EmptyBook(key()).requires_resync());
        assert!(!StreamError::Decode("bad".into()).requires_resync());
    }

    #[test]
    fn test_partial_update_message() {
        let err = StreamError::PartialUpdate {
            key: key(),
            skipped: vec![SkippedUpdate {
                side: Side::Bid,
                record: UpdateRecord::new(dec!(100), dec!(-1)),
                reason: "negative amount".to_string(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "Partial update for alpha:BTC/USDT:spot: 1 record(s) skipped"
        );
        assert_eq!(err.book_key(), Some(&key()));
    }
}

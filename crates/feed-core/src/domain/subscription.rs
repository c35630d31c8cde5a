//! 채널 구독과 연결 상태 타입.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{AssetType, Pair};

/// 구독 식별 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// 채널 이름
    pub channel: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.channel, self.pair, self.asset)
    }
}

/// 채널 구독.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// 채널 이름 (예: "book", "trades")
    pub channel: String,
    /// 거래 쌍
    pub pair: Pair,
    /// 자산 유형
    pub asset: AssetType,
    /// 프로토콜별 추가 옵션
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl Subscription {
    /// 새 구독을 생성합니다.
    pub fn new(channel: impl Into<String>, pair: Pair, asset: AssetType) -> Self {
        Self {
            channel: channel.into(),
            pair,
            asset,
            params: BTreeMap::new(),
        }
    }

    /// 추가 옵션을 지정합니다.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// 구독 키를 반환합니다.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            channel: self.channel.clone(),
            pair: self.pair.clone(),
            asset: self.asset,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.channel, self.pair, self.asset)
    }
}

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 연결 없음
    #[default]
    Disconnected,
    /// 연결 시도 중
    Connecting,
    /// 연결됨 (미인증)
    Connected,
    /// 인증 프레임 전송 후 응답 대기
    Authenticating,
    /// 인증 완료
    Authenticated,
    /// 종료 진행 중
    ShuttingDown,
}

impl ConnectionState {
    /// 프레임을 주고받을 수 있는 상태인지 확인합니다.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected
                | ConnectionState::Authenticating
                | ConnectionState::Authenticated
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::ShuttingDown => "shutting_down",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_key_ignores_params() {
        let a = Subscription::new("book", Pair::new("BTC", "USDT"), AssetType::Spot);
        let b = a.clone().with_param("depth", "50");
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().to_string(), "book:BTC/USDT:spot");
    }

    #[test]
    fn test_connection_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Authenticating.is_open());
        assert!(!ConnectionState::ShuttingDown.is_open());
    }
}

//! 거래소 프로토콜 훅.
//!
//! 연결 관리자와 디스패처는 거래소별 와이어 형식을 알지 못합니다.
//! 각 거래소 어댑터는 `StreamProtocol`을 구현하여 수신 프레임을 정규화된
//! `Envelope`로 디코딩하고, 구독/인증/하트비트 프레임을 만들어 줍니다.
//!
//! `NormalizedProtocol`은 정규화된 JSON 봉투 형식을 그대로 사용하는
//! 기본 어댑터입니다:
//!
//! ```text
//! 수신: {"event": "snapshot", "data": {...}}
//! 발신: {"op": "subscribe", "channel": "book", "pair": "BTC/USDT", "asset": "spot"}
//! ```

use chrono::{DateTime, Utc};
use feed_core::{
    AssetType, DepthUpdate, Orderbook, Pair, PriceLevel, Subscription, Ticker, Trade,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{StreamError, StreamResult};

/// 서버 핸드셰이크 정보.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Handshake {
    /// 서버가 부여한 세션 ID
    #[serde(default)]
    pub session_id: Option<String>,
    /// 서버 버전
    #[serde(default)]
    pub version: Option<String>,
}

/// 하트비트 방식.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heartbeat {
    /// WebSocket Ping 제어 프레임
    WebSocketPing,
    /// 프로토콜 텍스트 ping 프레임
    Text(String),
    /// 하트비트 없음 (트래픽 감시만 수행)
    Disabled,
}

/// 구독 요청 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// 구독
    Subscribe,
    /// 구독 해제
    Unsubscribe,
}

/// 구독/구독 해제 응답.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionAck {
    /// 응답 종류
    pub kind: AckKind,
    /// 대상 구독
    pub subscription: Subscription,
    /// 서버가 요청을 수락했는지 여부
    pub success: bool,
    /// 거부 사유
    pub message: Option<String>,
}

/// 정규화된 수신 봉투.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// 핸드셰이크 (연결 직후 이후에 다시 오면 무시)
    Welcome(Handshake),
    /// 시세
    Ticker(Ticker),
    /// 체결
    Trade(Trade),
    /// 전체 호가창 스냅샷
    Snapshot(Orderbook),
    /// 호가 델타
    Update(DepthUpdate),
    /// 구독 응답
    SubscriptionAck(SubscriptionAck),
    /// 인증 결과
    Auth {
        success: bool,
        message: Option<String>,
    },
    /// 하트비트 응답
    Pong,
    /// 서버의 재연결 요청
    Reset { reason: Option<String> },
    /// 서버 에러 프레임
    Error {
        code: Option<String>,
        message: String,
        /// 인증 관련 에러 여부
        auth: bool,
    },
    /// 알 수 없는 판별자
    Unknown { event: String },
}

/// 거래소 어댑터가 구현하는 프로토콜 훅.
pub trait StreamProtocol: Send + Sync {
    /// 거래소 이름.
    fn exchange(&self) -> &str;

    /// 연결 직후 서버 핸드셰이크 프레임을 기다려야 하는지 여부.
    fn expects_handshake(&self) -> bool {
        false
    }

    /// 핸드셰이크 프레임을 디코딩합니다.
    fn decode_handshake(&self, _text: &str) -> StreamResult<Handshake> {
        Ok(Handshake::default())
    }

    /// 인증 프레임 (인증이 필요 없으면 `None`).
    fn auth_frame(&self) -> StreamResult<Option<String>> {
        Ok(None)
    }

    /// 하트비트 방식.
    fn heartbeat(&self) -> Heartbeat {
        Heartbeat::WebSocketPing
    }

    /// 수신 텍스트 프레임을 디코딩합니다.
    fn decode(&self, text: &str) -> StreamResult<Envelope>;

    /// 구독 요청 프레임.
    fn subscribe_frames(&self, subscriptions: &[Subscription]) -> StreamResult<Vec<String>>;

    /// 구독 해제 요청 프레임.
    fn unsubscribe_frames(&self, subscriptions: &[Subscription]) -> StreamResult<Vec<String>>;

    /// 설정에 채널이 없을 때 사용하는 기본 채널.
    fn default_channels(&self) -> Vec<String>;

    /// 채널이 호가창 데이터를 전달하는지 여부.
    fn carries_orderbook(&self, channel: &str) -> bool;
}

// ============================================================================
// 정규화 JSON 프로토콜
// ============================================================================

/// 판별자만 먼저 읽는 봉투.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct SnapshotData {
    pair: Pair,
    asset: AssetType,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
    #[serde(default)]
    update_id: Option<i64>,
    #[serde(default)]
    checksum: Option<u32>,
    #[serde(default)]
    id_aligned: bool,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AckData {
    #[serde(flatten)]
    subscription: Subscription,
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AuthData {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResetData {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    code: Option<Value>,
    message: String,
    #[serde(default)]
    auth: bool,
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    op: &'a str,
    channel: &'a str,
    pair: &'a Pair,
    asset: AssetType,
    #[serde(skip_serializing_if = "no_params")]
    params: &'a BTreeMap<String, String>,
}

fn no_params(params: &&BTreeMap<String, String>) -> bool {
    params.is_empty()
}

fn decode_data<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> StreamResult<T> {
    serde_json::from_value(data)
        .map_err(|e| StreamError::Decode(format!("{} payload: {}", event, e)))
}

/// 정규화 JSON 봉투 프로토콜.
#[derive(Debug, Clone)]
pub struct NormalizedProtocol {
    exchange: String,
    expects_handshake: bool,
    credentials: Option<(String, String)>,
    heartbeat: Heartbeat,
    channels: Vec<String>,
    orderbook_channels: Vec<String>,
}

impl NormalizedProtocol {
    /// 기본 채널(ticker, trade, book)을 쓰는 프로토콜을 생성합니다.
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            expects_handshake: false,
            credentials: None,
            heartbeat: Heartbeat::Text(json!({ "op": "ping" }).to_string()),
            channels: vec!["ticker".to_string(), "trade".to_string(), "book".to_string()],
            orderbook_channels: vec!["book".to_string()],
        }
    }

    /// 연결 직후 `welcome` 프레임을 기다리도록 설정합니다.
    pub fn with_handshake(mut self) -> Self {
        self.expects_handshake = true;
        self
    }

    /// 인증 자격증명을 지정합니다.
    pub fn with_credentials(mut self, key: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials = Some((key.into(), token.into()));
        self
    }

    /// 하트비트 방식을 지정합니다.
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// 기본 채널과 호가창 채널을 지정합니다.
    pub fn with_channels(mut self, channels: Vec<String>, orderbook_channels: Vec<String>) -> Self {
        self.channels = channels;
        self.orderbook_channels = orderbook_channels;
        self
    }

    fn request_frames(&self, op: &str, subscriptions: &[Subscription]) -> StreamResult<Vec<String>> {
        subscriptions
            .iter()
            .map(|sub| {
                let request = SubscribeRequest {
                    op,
                    channel: &sub.channel,
                    pair: &sub.pair,
                    asset: sub.asset,
                    params: &sub.params,
                };
                serde_json::to_string(&request).map_err(StreamError::from)
            })
            .collect()
    }

    fn decode_ack(&self, kind: AckKind, event: &str, data: Value) -> StreamResult<Envelope> {
        let ack: AckData = decode_data(event, data)?;
        Ok(Envelope::SubscriptionAck(SubscriptionAck {
            kind,
            subscription: ack.subscription,
            success: ack.success,
            message: ack.message,
        }))
    }
}

impl StreamProtocol for NormalizedProtocol {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    fn expects_handshake(&self) -> bool {
        self.expects_handshake
    }

    fn decode_handshake(&self, text: &str) -> StreamResult<Handshake> {
        match self.decode(text)? {
            Envelope::Welcome(handshake) => Ok(handshake),
            other => Err(StreamError::Decode(format!(
                "expected welcome frame, got {:?}",
                other
            ))),
        }
    }

    fn auth_frame(&self) -> StreamResult<Option<String>> {
        Ok(self
            .credentials
            .as_ref()
            .map(|(key, token)| json!({ "op": "auth", "key": key, "token": token }).to_string()))
    }

    fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    fn decode(&self, text: &str) -> StreamResult<Envelope> {
        let RawEnvelope { event, data } = serde_json::from_str(text)?;

        let envelope = match event.as_str() {
            "welcome" => Envelope::Welcome(if data.is_null() {
                Handshake::default()
            } else {
                decode_data(&event, data)?
            }),
            "ticker" => {
                let mut ticker: Ticker = decode_data(&event, data)?;
                ticker.exchange = self.exchange.clone();
                Envelope::Ticker(ticker)
            }
            "trade" => {
                let mut trade: Trade = decode_data(&event, data)?;
                trade.exchange = self.exchange.clone();
                Envelope::Trade(trade)
            }
            "snapshot" => {
                let snapshot: SnapshotData = decode_data(&event, data)?;
                let mut book = Orderbook::new(self.exchange.clone(), snapshot.pair, snapshot.asset)
                    .with_levels(snapshot.bids, snapshot.asks);
                book.last_update_id = snapshot.update_id;
                book.checksum = snapshot.checksum;
                book.id_aligned = snapshot.id_aligned;
                if let Some(ts) = snapshot.timestamp {
                    book.last_updated = ts;
                }
                Envelope::Snapshot(book)
            }
            "update" => {
                let mut update: DepthUpdate = decode_data(&event, data)?;
                update.exchange = self.exchange.clone();
                Envelope::Update(update)
            }
            "subscribed" => self.decode_ack(AckKind::Subscribe, &event, data)?,
            "unsubscribed" => self.decode_ack(AckKind::Unsubscribe, &event, data)?,
            "auth" => {
                let auth: AuthData = decode_data(&event, data)?;
                Envelope::Auth {
                    success: auth.success,
                    message: auth.message,
                }
            }
            "pong" => Envelope::Pong,
            "reconnect" => {
                let reset: ResetData = if data.is_null() {
                    ResetData::default()
                } else {
                    decode_data(&event, data)?
                };
                Envelope::Reset {
                    reason: reset.reason,
                }
            }
            "error" => {
                let error: ErrorData = decode_data(&event, data)?;
                Envelope::Error {
                    code: error.code.map(|code| match code {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }),
                    message: error.message,
                    auth: error.auth,
                }
            }
            _ => Envelope::Unknown { event },
        };

        Ok(envelope)
    }

    fn subscribe_frames(&self, subscriptions: &[Subscription]) -> StreamResult<Vec<String>> {
        self.request_frames("subscribe", subscriptions)
    }

    fn unsubscribe_frames(&self, subscriptions: &[Subscription]) -> StreamResult<Vec<String>> {
        self.request_frames("unsubscribe", subscriptions)
    }

    fn default_channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    fn carries_orderbook(&self, channel: &str) -> bool {
        self.orderbook_channels.iter().any(|c| c == channel)
    }
}

//! 수신 메시지 디스패처.
//!
//! 프레임을 프로토콜 훅으로 디코딩한 뒤 정확히 하나의 처리기로 보냅니다:
//!
//! | 봉투 | 처리 |
//! |---|---|
//! | ticker / trade | 이벤트 버스 |
//! | snapshot | `OrderbookStore::load_snapshot` |
//! | update | `update` / `update_using_id` (알림은 저장소가 발행) |
//! | subscribed / unsubscribed | 구독 레지스트리 |
//! | auth | 연결 상태 |
//! | pong | 하트비트 알림 |
//! | reconnect | `ResetRequested` 이벤트 |
//! | error | `ProtocolError` 이벤트 |
//!
//! 디코딩 실패와 알 수 없는 판별자는 로그만 남기고 버립니다.

use feed_core::{BookKey, ConnectionState, DepthUpdate, Event, Orderbook};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::connection::ConnectionStatus;
use crate::error::StreamError;
use crate::orderbook::OrderbookStore;
use crate::protocol::{AckKind, Envelope, StreamProtocol, SubscriptionAck};
use crate::subscription::SubscriptionRegistry;

/// 프레임이 전달된 처리기.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 시세 이벤트 발행
    Ticker,
    /// 체결 이벤트 발행
    Trade,
    /// 스냅샷 적용
    Snapshot,
    /// 델타 적용
    Update,
    /// 구독 응답 처리
    Subscription,
    /// 인증 결과 처리
    Auth,
    /// 하트비트 응답
    Pong,
    /// 재연결 요청 이벤트 발행
    Reset,
    /// 프로토콜 에러 이벤트 발행
    ProtocolError,
    /// 연결 이후의 핸드셰이크 프레임 (무시)
    Handshake,
    /// 알 수 없는 판별자 (버림)
    Unknown,
    /// 디코딩 실패 (버림)
    Dropped,
}

/// 연결 하나의 메시지 디스패처.
pub struct MessageDispatcher {
    exchange: String,
    protocol: Arc<dyn StreamProtocol>,
    store: Arc<OrderbookStore>,
    bus: EventBus,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    status: Arc<ConnectionStatus>,
    pong: Arc<Notify>,
    verbose: bool,
}

impl MessageDispatcher {
    /// 새 디스패처를 생성합니다.
    pub fn new(
        protocol: Arc<dyn StreamProtocol>,
        store: Arc<OrderbookStore>,
        bus: EventBus,
        registry: Arc<Mutex<SubscriptionRegistry>>,
        status: Arc<ConnectionStatus>,
        pong: Arc<Notify>,
    ) -> Self {
        Self {
            exchange: protocol.exchange().to_string(),
            protocol,
            store,
            bus,
            registry,
            status,
            pong,
            verbose: false,
        }
    }

    /// 프레임 단위 디버그 로그를 켭니다.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// 텍스트 프레임 하나를 처리합니다.
    pub async fn dispatch(&self, text: &str) -> Route {
        if self.verbose {
            debug!(exchange = %self.exchange, frame = text, "수신 프레임");
        }

        let envelope = match self.protocol.decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(exchange = %self.exchange, error = %e, "프레임 디코딩 실패, 버림");
                return Route::Dropped;
            }
        };

        match envelope {
            Envelope::Ticker(ticker) => {
                self.bus.publish(Event::Ticker(ticker)).await;
                Route::Ticker
            }
            Envelope::Trade(trade) => {
                self.bus.publish(Event::Trade(trade)).await;
                Route::Trade
            }
            Envelope::Snapshot(book) => {
                self.handle_snapshot(book).await;
                Route::Snapshot
            }
            Envelope::Update(update) => {
                self.handle_update(update).await;
                Route::Update
            }
            Envelope::SubscriptionAck(ack) => {
                self.handle_ack(ack).await;
                Route::Subscription
            }
            Envelope::Auth { success, message } => {
                self.handle_auth(success, message).await;
                Route::Auth
            }
            Envelope::Pong => {
                self.pong.notify_waiters();
                Route::Pong
            }
            Envelope::Reset { reason } => {
                info!(exchange = %self.exchange, ?reason, "서버가 재연결을 요청함");
                self.bus
                    .publish(Event::ResetRequested {
                        exchange: self.exchange.clone(),
                        reason,
                    })
                    .await;
                Route::Reset
            }
            Envelope::Error {
                code,
                message,
                auth,
            } => {
                warn!(exchange = %self.exchange, ?code, %message, auth, "프로토콜 에러 수신");
                if auth {
                    self.clear_authentication();
                }
                self.bus
                    .publish(Event::ProtocolError {
                        exchange: self.exchange.clone(),
                        code,
                        message,
                    })
                    .await;
                Route::ProtocolError
            }
            Envelope::Welcome(_) => {
                debug!(exchange = %self.exchange, "연결 이후 핸드셰이크 프레임 무시");
                Route::Handshake
            }
            Envelope::Unknown { event } => {
                debug!(exchange = %self.exchange, event = %event, "알 수 없는 이벤트, 버림");
                Route::Unknown
            }
        }
    }

    async fn handle_snapshot(&self, book: Orderbook) {
        let key = BookKey::new(self.exchange.clone(), book.pair.clone(), book.asset);
        if let Err(e) = self.store.load_snapshot(book, &self.exchange, false).await {
            self.report_book_error(key, e).await;
        }
    }

    async fn handle_update(&self, mut update: DepthUpdate) {
        update.exchange = self.exchange.clone();
        let result = match update.action {
            None => self.store.update(&update).await,
            Some(action) => self.store.update_using_id(&update, action).await,
        };
        if let Err(e) = result {
            self.report_book_error(update.key(), e).await;
        }
    }

    async fn report_book_error(&self, key: BookKey, err: StreamError) {
        let resync_required = err.requires_resync();
        warn!(book = %key, error = %err, resync_required, "호가창 갱신 실패");

        if resync_required && self.store.invalidate(&key).await {
            debug!(book = %key, "재스냅샷 전까지 호가창 폐기");
        }

        self.bus
            .publish(Event::BookError {
                exchange: key.exchange,
                pair: key.pair,
                asset: key.asset,
                message: err.to_string(),
                resync_required,
            })
            .await;
    }

    async fn handle_ack(&self, ack: SubscriptionAck) {
        let key = ack.subscription.key();

        let rejected = {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            match (ack.kind, ack.success) {
                (AckKind::Subscribe, true) => {
                    registry.confirm_subscribe(&ack.subscription);
                    false
                }
                (AckKind::Subscribe, false) => {
                    registry.rollback_subscribe(&key);
                    true
                }
                (AckKind::Unsubscribe, true) => {
                    registry.confirm_unsubscribe(&key);
                    false
                }
                (AckKind::Unsubscribe, false) => {
                    registry.rollback_unsubscribe(&key);
                    true
                }
            }
        };

        if rejected {
            let message = ack
                .message
                .unwrap_or_else(|| format!("{:?} rejected by server", ack.kind));
            warn!(exchange = %self.exchange, subscription = %key, %message, "구독 요청 거부됨");
            self.bus
                .publish(Event::SubscriptionError {
                    exchange: self.exchange.clone(),
                    subscription: ack.subscription,
                    message,
                })
                .await;
            return;
        }

        debug!(exchange = %self.exchange, subscription = %key, kind = ?ack.kind, "구독 응답 반영");
        if ack.kind == AckKind::Unsubscribe && self.protocol.carries_orderbook(&key.channel) {
            let book = BookKey::new(self.exchange.clone(), key.pair, key.asset);
            self.store.invalidate(&book).await;
        }
    }

    async fn handle_auth(&self, success: bool, message: Option<String>) {
        if success {
            self.status.set_authenticated(true);
            self.status.transition(
                &[ConnectionState::Connected, ConnectionState::Authenticating],
                ConnectionState::Authenticated,
            );
            info!(exchange = %self.exchange, "인증 성공");
            return;
        }

        self.clear_authentication();
        let message = message.unwrap_or_else(|| "authentication failed".to_string());
        warn!(exchange = %self.exchange, %message, "인증 실패");
        self.bus
            .publish(Event::ProtocolError {
                exchange: self.exchange.clone(),
                code: None,
                message,
            })
            .await;
    }

    fn clear_authentication(&self) {
        self.status.set_authenticated(false);
        self.status.transition(
            &[ConnectionState::Authenticating, ConnectionState::Authenticated],
            ConnectionState::Connected,
        );
    }
}

//! 연결 관리자.
//!
//! 영속 WebSocket 연결 하나의 수명주기를 관리합니다:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (인증 프레임 전송) Authenticating
//!              -> Authenticated | Connected
//! shutdown(): ShuttingDown -> (모든 태스크 종료 확인) -> Disconnected
//! ```
//!
//! 세션마다 `CancellationToken` 하나를 읽기/하트비트/감시 루프가 공유하고,
//! `TaskTracker`가 종료 대기 지점 역할을 합니다. 루프의 토큰은 세션 종료
//! 토큰의 자식이므로, 읽기 루프가 스스로 세션을 취소한 뒤에도 마지막
//! 에러 보고는 `shutdown()`이 끊을 수 있습니다. 연결이 끊겨도 스스로
//! 재연결하지 않으며, 재연결 여부는 호출자가 결정합니다.

use async_trait::async_trait;
use feed_core::{ConnectionErrorKind, ConnectionState, Event, StreamConfig, Subscription};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use super::dial::{dial, WsStream};
use super::heartbeat::{run_heartbeat, FrameSink, HeartbeatSettings};
use super::state::ConnectionStatus;
use crate::bus::EventBus;
use crate::dispatcher::MessageDispatcher;
use crate::error::{StreamError, StreamResult};
use crate::orderbook::OrderbookStore;
use crate::protocol::StreamProtocol;
use crate::rate_limit::RateLimiter;
use crate::subscription::SubscriptionRegistry;
use crate::watchdog::TrafficWatchdog;

/// 감시 루프 최소 점검 간격.
const MIN_WATCHDOG_INTERVAL: Duration = Duration::from_millis(10);

/// WebSocket 쓰기 절반.
struct WsWriter {
    sink: AsyncMutex<SplitSink<WsStream, Message>>,
}

impl WsWriter {
    async fn close(&self) -> StreamResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None))
            .await
            .map_err(|e| StreamError::Send(e.to_string()))?;
        sink.close().await.map_err(|e| StreamError::Send(e.to_string()))
    }
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send_frame(&self, frame: Message) -> StreamResult<()> {
        self.sink
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| StreamError::Send(e.to_string()))
    }
}

/// 연결된 세션.
struct Session {
    writer: Arc<WsWriter>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// 모든 루프를 멈추고 종료를 기다립니다.
    async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// 읽기 루프가 사용하는 공유 상태.
struct ReadContext {
    exchange: String,
    writer: Arc<WsWriter>,
    dispatcher: MessageDispatcher,
    watchdog: Arc<TrafficWatchdog>,
    pong: Arc<Notify>,
    store: Arc<OrderbookStore>,
    status: Arc<ConnectionStatus>,
    bus: EventBus,
    shutdown: CancellationToken,
    cancel: CancellationToken,
}

impl ReadContext {
    /// 프레임 하나를 처리합니다. 처리 도중 취소되면 `false`.
    async fn dispatch(&self, text: &str) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.dispatcher.dispatch(text) => true,
        }
    }

    async fn run(self, mut stream: SplitStream<WsStream>) {
        let failure = loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    self.watchdog.signal();
                    if !self.dispatch(&text).await {
                        break None;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    self.watchdog.signal();
                    match std::str::from_utf8(&data) {
                        Ok(text) => {
                            if !self.dispatch(text).await {
                                break None;
                            }
                        }
                        Err(_) => warn!(exchange = %self.exchange, "UTF-8이 아닌 바이너리 프레임 무시"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    self.watchdog.signal();
                    debug!("Ping 수신, Pong 응답");
                    let sent = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break None,
                        sent = self.writer.send_frame(Message::Pong(data)) => sent,
                    };
                    if let Err(e) = sent {
                        warn!(exchange = %self.exchange, "Pong 전송 실패: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    self.watchdog.signal();
                    self.pong.notify_waiters();
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    break Some((ConnectionErrorKind::Closed, format!("서버에서 연결 종료: {}", reason)));
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    break Some((ConnectionErrorKind::Read, format!("WebSocket 수신 에러: {}", e)));
                }
                None => {
                    break Some((ConnectionErrorKind::Closed, "WebSocket 스트림 종료".to_string()));
                }
            }
        };

        let Some((kind, message)) = failure else {
            debug!(exchange = %self.exchange, "읽기 루프 취소됨");
            return;
        };

        error!(exchange = %self.exchange, kind = %kind, "{}", message);
        // 하트비트/감시 루프를 먼저 멈춘 뒤 상태를 정리
        self.cancel.cancel();
        let dropped = self.store.invalidate_exchange(&self.exchange).await;
        debug!(exchange = %self.exchange, dropped, "연결 종료로 호가창 폐기");
        self.status.set_authenticated(false);
        self.status.set(ConnectionState::Disconnected);
        let event = Event::ConnectionError {
            exchange: self.exchange.clone(),
            kind,
            message,
        };
        if !self.bus.publish_until(event, &self.shutdown).await {
            debug!(exchange = %self.exchange, "연결 에러 보고 생략");
        }
    }
}

/// 영속 스트리밍 연결 관리자.
pub struct ConnectionManager {
    exchange: String,
    config: StreamConfig,
    protocol: Arc<dyn StreamProtocol>,
    store: Arc<OrderbookStore>,
    bus: EventBus,
    status: Arc<ConnectionStatus>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    limiter: RateLimiter,
    session: AsyncMutex<Option<Session>>,
}

impl ConnectionManager {
    /// 새 연결 관리자를 생성합니다.
    pub fn new(
        config: StreamConfig,
        protocol: Arc<dyn StreamProtocol>,
        store: Arc<OrderbookStore>,
        bus: EventBus,
    ) -> Self {
        let exchange = protocol.exchange().to_string();
        Self {
            status: Arc::new(ConnectionStatus::new(exchange.clone())),
            limiter: RateLimiter::new(&config.rate_limit),
            exchange,
            config,
            protocol,
            store,
            bus,
            registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            session: AsyncMutex::new(None),
        }
    }

    /// 거래소 이름.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// 연결 설정.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// 공유 호가창 저장소.
    pub fn store(&self) -> &Arc<OrderbookStore> {
        &self.store
    }

    /// 현재 연결 상태.
    pub fn state(&self) -> ConnectionState {
        self.status.get()
    }

    /// 연결 상태 변경 수신자.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// 인증 여부.
    pub fn is_authenticated(&self) -> bool {
        self.status.is_authenticated()
    }

    /// 서버가 확인한 구독 목록.
    pub fn active_subscriptions(&self) -> Vec<Subscription> {
        self.lock_registry().active()
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connection_error(&self, kind: ConnectionErrorKind, err: &StreamError) -> Event {
        Event::ConnectionError {
            exchange: self.exchange.clone(),
            kind,
            message: err.to_string(),
        }
    }

    /// 서버에 연결합니다.
    ///
    /// 실패하면 `Disconnected`로 돌아가고 `Connection` 에러를 반환합니다.
    /// 재시도는 하지 않습니다. 이미 연결되어 있으면 아무것도 하지 않습니다.
    pub async fn connect(&self) -> StreamResult<()> {
        if !self.config.enabled {
            return Err(StreamError::Disabled(self.exchange.clone()));
        }

        let mut slot = self.session.lock().await;
        if let Some(previous) = slot.take() {
            if previous.is_live() {
                debug!(exchange = %self.exchange, "이미 연결되어 있음");
                *slot = Some(previous);
                return Ok(());
            }
            previous.stop().await;
        }

        self.status.set(ConnectionState::Connecting);
        self.status.set_authenticated(false);

        let span = feed_core::feed_span!("connect", self.exchange);
        match self.open().instrument(span).await {
            Ok(session) => {
                *slot = Some(session);
                Ok(())
            }
            Err((kind, err)) => {
                self.status.set(ConnectionState::Disconnected);
                error!(exchange = %self.exchange, kind = %kind, "연결 실패: {}", err);
                self.bus.publish(self.connection_error(kind, &err)).await;
                Err(err)
            }
        }
    }

    async fn open(&self) -> Result<Session, (ConnectionErrorKind, StreamError)> {
        info!(url = %self.config.url, proxy = ?self.config.proxy_url, "연결 중");
        let ws = dial(
            &self.config.url,
            self.config.proxy_url.as_deref(),
            self.config.connect_timeout(),
        )
        .await
        .map_err(|e| (ConnectionErrorKind::Dial, e))?;

        let (sink, mut stream) = ws.split();
        let writer = Arc::new(WsWriter {
            sink: AsyncMutex::new(sink),
        });

        if self.protocol.expects_handshake() {
            self.read_handshake(&mut stream, &writer)
                .await
                .map_err(|e| (ConnectionErrorKind::Handshake, e))?;
        }
        self.status.set(ConnectionState::Connected);

        let shutdown = CancellationToken::new();
        let cancel = shutdown.child_token();
        let tracker = TaskTracker::new();
        let pong = Arc::new(Notify::new());
        let watchdog = Arc::new(TrafficWatchdog::new(
            self.exchange.clone(),
            self.config.liveness_timeout(),
            self.bus.clone(),
        ));

        let dispatcher = MessageDispatcher::new(
            self.protocol.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.registry.clone(),
            self.status.clone(),
            pong.clone(),
        )
        .with_verbose(self.config.verbose);

        let reader = ReadContext {
            exchange: self.exchange.clone(),
            writer: writer.clone(),
            dispatcher,
            watchdog: watchdog.clone(),
            pong: pong.clone(),
            store: self.store.clone(),
            status: self.status.clone(),
            bus: self.bus.clone(),
            shutdown: shutdown.clone(),
            cancel: cancel.clone(),
        };
        tracker.spawn(
            reader
                .run(stream)
                .instrument(feed_core::feed_span!("read_loop", self.exchange)),
        );

        let settings = HeartbeatSettings {
            heartbeat: self.protocol.heartbeat(),
            interval: self.config.heartbeat_interval(),
            liveness_timeout: self.config.liveness_timeout(),
        };
        tracker.spawn(
            run_heartbeat(
                writer.clone(),
                settings,
                pong,
                watchdog.clone(),
                cancel.clone(),
            )
            .instrument(feed_core::feed_span!("heartbeat", self.exchange)),
        );

        let check_interval = (self.config.liveness_timeout() / 2).max(MIN_WATCHDOG_INTERVAL);
        let watchdog_cancel = cancel.clone();
        let loop_watchdog = watchdog.clone();
        tracker.spawn(async move { loop_watchdog.run(check_interval, watchdog_cancel).await });

        watchdog.signal();
        info!("연결 완료");

        let session = Session {
            writer,
            shutdown,
            cancel,
            tracker,
        };

        if let Err(e) = self.authenticate(&session).await {
            warn!("인증 프레임 전송 실패: {}", e);
        }
        if let Err(e) = self.restore_subscriptions(&session).await {
            warn!("구독 복원 실패: {}", e);
        }

        Ok(session)
    }

    async fn read_handshake(
        &self,
        stream: &mut SplitStream<WsStream>,
        writer: &WsWriter,
    ) -> StreamResult<()> {
        let timeout = self.config.handshake_timeout();
        let read = async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                    Some(Ok(Message::Binary(data))) => {
                        return String::from_utf8(data.to_vec())
                            .map_err(|e| StreamError::Decode(e.to_string()))
                    }
                    Some(Ok(Message::Ping(data))) => {
                        writer.send_frame(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(StreamError::Connection(
                            "핸드셰이크 전에 연결이 닫혔습니다".to_string(),
                        ))
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(StreamError::from(e)),
                }
            }
        };

        let text = tokio::time::timeout(timeout, read).await.map_err(|_| {
            StreamError::Connection(format!("핸드셰이크 시간 초과 ({}ms)", timeout.as_millis()))
        })??;

        let handshake = self
            .protocol
            .decode_handshake(&text)
            .map_err(|e| StreamError::Connection(format!("핸드셰이크 디코딩 실패: {}", e)))?;
        debug!(session_id = ?handshake.session_id, version = ?handshake.version, "핸드셰이크 완료");
        Ok(())
    }

    async fn authenticate(&self, session: &Session) -> StreamResult<()> {
        let Some(frame) = self.protocol.auth_frame()? else {
            return Ok(());
        };
        self.status.set(ConnectionState::Authenticating);
        if let Err(e) = self.send_on(session, frame).await {
            self.status.transition(&[ConnectionState::Authenticating], ConnectionState::Connected);
            return Err(e);
        }
        debug!("인증 프레임 전송");
        Ok(())
    }

    /// 재연결이면 추적 중인 구독을, 처음이면 설정된 기본 구독을 전송합니다.
    async fn restore_subscriptions(&self, session: &Session) -> StreamResult<()> {
        let to_send = {
            let mut registry = self.lock_registry();
            let resend = registry.reset_for_reconnect();
            if resend.is_empty() {
                let channels = if self.config.channels.is_empty() {
                    self.protocol.default_channels()
                } else {
                    self.config.channels.clone()
                };
                let defaults =
                    registry.generate_default_subscriptions(&channels, &self.config.instruments);
                registry.begin_subscribe(&defaults)
            } else {
                info!(count = resend.len(), "추적 중인 구독 재전송");
                resend
            }
        };

        self.send_subscribe_frames(session, &to_send).await
    }

    async fn send_on(&self, session: &Session, text: String) -> StreamResult<()> {
        if !session.is_live() {
            return Err(StreamError::Send("연결이 종료되었습니다".to_string()));
        }
        self.limiter.acquire().await;
        session.writer.send_frame(Message::Text(text.into())).await
    }

    async fn send_all(&self, session: &Session, frames: StreamResult<Vec<String>>) -> StreamResult<()> {
        for frame in frames? {
            self.send_on(session, frame).await?;
        }
        Ok(())
    }

    async fn send_subscribe_frames(
        &self,
        session: &Session,
        subscriptions: &[Subscription],
    ) -> StreamResult<()> {
        if subscriptions.is_empty() {
            return Ok(());
        }

        let result = self
            .send_all(session, self.protocol.subscribe_frames(subscriptions))
            .await;

        if let Err(e) = &result {
            {
                let mut registry = self.lock_registry();
                for sub in subscriptions {
                    registry.rollback_subscribe(&sub.key());
                }
            }
            for sub in subscriptions {
                self.bus
                    .publish(Event::SubscriptionError {
                        exchange: self.exchange.clone(),
                        subscription: sub.clone(),
                        message: e.to_string(),
                    })
                    .await;
            }
        } else {
            debug!(count = subscriptions.len(), "구독 요청 전송");
        }
        result
    }

    async fn with_session<T, F, Fut>(&self, f: F) -> StreamResult<T>
    where
        F: FnOnce(Arc<WsWriter>, CancellationToken) -> Fut,
        Fut: std::future::Future<Output = StreamResult<T>>,
    {
        let (writer, cancel) = {
            let slot = self.session.lock().await;
            match slot.as_ref() {
                Some(session) if session.is_live() => {
                    (session.writer.clone(), session.cancel.clone())
                }
                _ => return Err(StreamError::Send("연결되어 있지 않습니다".to_string())),
            }
        };
        f(writer, cancel).await
    }

    /// 메시지를 JSON 텍스트 프레임으로 전송합니다.
    ///
    /// 연결이 없거나 쓰기에 실패하면 `Send` 에러를 반환하며, 재시도하거나
    /// 대기열에 넣지 않습니다.
    pub async fn send_message<T: Serialize + ?Sized>(&self, payload: &T) -> StreamResult<()> {
        let text = serde_json::to_string(payload).map_err(|e| StreamError::Send(e.to_string()))?;
        self.send_text(text).await
    }

    /// 텍스트 프레임을 그대로 전송합니다.
    pub async fn send_text(&self, text: String) -> StreamResult<()> {
        self.with_session(|writer, cancel| async move {
            if cancel.is_cancelled() {
                return Err(StreamError::Send("연결이 종료되었습니다".to_string()));
            }
            self.limiter.acquire().await;
            writer.send_frame(Message::Text(text.into())).await
        })
        .await
    }

    /// 구독을 요청합니다.
    ///
    /// 항목은 `Pending`으로 등록되고 서버 응답이 와야 `Active`가 됩니다.
    /// 전송에 실패하면 등록을 되돌립니다.
    pub async fn subscribe(&self, subscriptions: &[Subscription]) -> StreamResult<()> {
        let slot = self.session.lock().await;
        let session = match slot.as_ref() {
            Some(session) if session.is_live() => session,
            _ => return Err(StreamError::Send("연결되어 있지 않습니다".to_string())),
        };

        let to_send = self.lock_registry().begin_subscribe(subscriptions);
        self.send_subscribe_frames(session, &to_send).await
    }

    /// 구독 해제를 요청합니다.
    ///
    /// 추적하지 않는 항목이 있으면 나머지를 처리한 뒤 `Subscription` 에러를
    /// 반환합니다. 항목은 서버 응답이 와야 제거됩니다.
    pub async fn unsubscribe(&self, subscriptions: &[Subscription]) -> StreamResult<()> {
        let slot = self.session.lock().await;
        let session = match slot.as_ref() {
            Some(session) if session.is_live() => session,
            _ => return Err(StreamError::Send("연결되어 있지 않습니다".to_string())),
        };

        let (to_send, missing) = self.lock_registry().begin_unsubscribe(subscriptions);

        if !to_send.is_empty() {
            let result = self
                .send_all(session, self.protocol.unsubscribe_frames(&to_send))
                .await;

            if let Err(e) = result {
                let mut registry = self.lock_registry();
                for sub in &to_send {
                    registry.rollback_unsubscribe(&sub.key());
                }
                return Err(e);
            }
            debug!(count = to_send.len(), "구독 해제 요청 전송");
        }

        if missing.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = missing.iter().map(|s| s.to_string()).collect();
        for sub in missing {
            self.bus
                .publish(Event::SubscriptionError {
                    exchange: self.exchange.clone(),
                    subscription: sub,
                    message: "not subscribed".to_string(),
                })
                .await;
        }
        Err(StreamError::Subscription(format!(
            "추적하지 않는 구독: {}",
            names.join(", ")
        )))
    }

    /// 연결을 종료합니다.
    ///
    /// 모든 루프가 끝난 것을 확인한 뒤에 `Disconnected`를 보고합니다.
    pub async fn shutdown(&self) -> StreamResult<()> {
        let session = self.session.lock().await.take();
        let Some(session) = session else {
            self.status.set(ConnectionState::Disconnected);
            return Ok(());
        };

        info!(exchange = %self.exchange, "연결 종료 중");
        self.status.set(ConnectionState::ShuttingDown);
        session.stop().await;

        if let Err(e) = session.writer.close().await {
            debug!(exchange = %self.exchange, "종료 프레임 전송 실패: {}", e);
        }

        self.store.invalidate_exchange(&self.exchange).await;
        self.status.set_authenticated(false);
        self.status.set(ConnectionState::Disconnected);
        info!(exchange = %self.exchange, "연결 종료 완료");
        Ok(())
    }
}

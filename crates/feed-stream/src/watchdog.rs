//! 트래픽 생존 감시.
//!
//! 연결의 마지막 수신 시각을 기록하고, 한도를 넘기면 `Stale` 연결 에러를
//! 발행합니다. 재연결 등의 조치는 하지 않으며 외부 정책이 판단합니다.
//! 한 번 발행하면 다음 수신 신호가 올 때까지 다시 발행하지 않습니다.

use feed_core::{ConnectionErrorKind, Event};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::EventBus;

/// 연결 하나의 트래픽 감시기.
#[derive(Debug)]
pub struct TrafficWatchdog {
    exchange: String,
    timeout: Duration,
    last_signal: Mutex<Instant>,
    flagged: AtomicBool,
    bus: EventBus,
}

impl TrafficWatchdog {
    /// 새 감시기를 생성합니다.
    pub fn new(exchange: impl Into<String>, timeout: Duration, bus: EventBus) -> Self {
        Self {
            exchange: exchange.into(),
            timeout,
            last_signal: Mutex::new(Instant::now()),
            flagged: AtomicBool::new(false),
            bus,
        }
    }

    /// 수신 트래픽을 기록합니다.
    pub fn signal(&self) {
        if let Ok(mut last) = self.last_signal.lock() {
            *last = Instant::now();
        }
        self.flagged.store(false, Ordering::Release);
    }

    /// 마지막 수신 이후 경과 시간.
    pub fn elapsed(&self) -> Duration {
        self.last_signal
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// 현재 구간에서 이미 staleness를 보고했는지 여부.
    pub fn is_flagged(&self) -> bool {
        self.flagged.load(Ordering::Acquire)
    }

    /// 한도 초과 여부를 확인하고, 초과했으면 보고합니다.
    ///
    /// 이번 호출에서 이벤트를 발행했으면 `true`.
    pub async fn check(&self) -> bool {
        let elapsed = self.elapsed();
        if elapsed <= self.timeout {
            return false;
        }
        self.flag_stale(&format!(
            "no inbound traffic for {}ms (limit {}ms)",
            elapsed.as_millis(),
            self.timeout.as_millis()
        ))
        .await
    }

    /// staleness를 보고합니다 (하트비트의 퐁 누락 등).
    ///
    /// 같은 구간에서 이미 보고했으면 아무것도 하지 않고 `false`.
    pub async fn flag_stale(&self, reason: &str) -> bool {
        if self.flagged.swap(true, Ordering::AcqRel) {
            return false;
        }
        warn!(exchange = %self.exchange, reason, "연결 트래픽 정체 감지");
        self.bus
            .publish(Event::ConnectionError {
                exchange: self.exchange.clone(),
                kind: ConnectionErrorKind::Stale,
                message: reason.to_string(),
            })
            .await;
        true
    }

    /// 주기적으로 `check`를 수행합니다. 취소되면 종료합니다.
    ///
    /// 버스가 가득 차 보고가 막혀 있어도 취소에는 바로 응답합니다.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.check() => {}
                    }
                }
            }
        }
        debug!(exchange = %self.exchange, "트래픽 감시 종료");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn watchdog(timeout_ms: u64) -> (TrafficWatchdog, tokio::sync::mpsc::Receiver<Event>) {
        let (bus, rx) = EventBus::channel(16);
        (
            TrafficWatchdog::new("alpha", Duration::from_millis(timeout_ms), bus),
            rx,
        )
    }

    fn is_stale(event: &Event) -> bool {
        matches!(
            event,
            Event::ConnectionError {
                kind: ConnectionErrorKind::Stale,
                ..
            }
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_flags_once_per_window() {
        let (dog, mut rx) = watchdog(100);
        assert!(!dog.check().await);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(dog.check().await);
        assert!(!dog.check().await);
        assert!(is_stale(&rx.recv().await.unwrap()));
        assert!(rx.try_recv().is_err());

        dog.signal();
        assert!(!dog.is_flagged());
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(dog.check().await);
        assert!(is_stale(&rx.recv().await.unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_stale_shares_window_with_check() {
        let (dog, mut rx) = watchdog(100);
        assert!(dog.flag_stale("pong not received").await);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!dog.check().await);

        match rx.recv().await.unwrap() {
            Event::ConnectionError { message, .. } => assert_eq!(message, "pong not received"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_reports_and_stops() {
        let (dog, mut rx) = watchdog(100);
        let dog = Arc::new(dog);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let dog = dog.clone();
            let cancel = cancel.clone();
            async move { dog.run(Duration::from_millis(50), cancel).await }
        });

        let event = rx.recv().await.unwrap();
        assert!(is_stale(&event));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_stops_while_bus_is_full() {
        let (bus, _rx) = EventBus::channel(1);
        bus.publish(Event::ResetRequested {
            exchange: "alpha".to_string(),
            reason: None,
        })
        .await;
        let dog = Arc::new(TrafficWatchdog::new("alpha", Duration::from_millis(100), bus));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let dog = dog.clone();
            let cancel = cancel.clone();
            async move { dog.run(Duration::from_millis(50), cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(dog.is_flagged());
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watchdog did not stop")
            .unwrap();
    }
}

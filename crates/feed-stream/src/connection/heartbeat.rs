//! 하트비트 루프.
//!
//! 일정 간격으로 ping을 보내고 `liveness_timeout` 동안 pong을 기다립니다.
//! pong이 오지 않으면 감시기에 staleness로 보고할 뿐 연결을 끊지 않습니다.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StreamResult;
use crate::protocol::Heartbeat;
use crate::watchdog::TrafficWatchdog;

/// 발신 프레임 싱크.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// 프레임 하나를 전송합니다.
    async fn send_frame(&self, frame: Message) -> StreamResult<()>;
}

/// 하트비트 루프 설정.
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    /// 하트비트 방식
    pub heartbeat: Heartbeat,
    /// ping 간격
    pub interval: Duration,
    /// pong 대기 한도
    pub liveness_timeout: Duration,
}

fn ping_frame(heartbeat: &Heartbeat) -> Option<Message> {
    match heartbeat {
        Heartbeat::WebSocketPing => Some(Message::Ping(Vec::new().into())),
        Heartbeat::Text(text) => Some(Message::Text(text.clone().into())),
        Heartbeat::Disabled => None,
    }
}

/// 하트비트 루프를 실행합니다. 취소되거나 ping 전송에 실패하면 종료합니다.
///
/// `pong`은 연결 범위의 알림이며, 수신 측이 pong을 받을 때
/// `notify_waiters`로 깨웁니다.
pub async fn run_heartbeat(
    sink: Arc<dyn FrameSink>,
    settings: HeartbeatSettings,
    pong: Arc<Notify>,
    watchdog: Arc<TrafficWatchdog>,
    cancel: CancellationToken,
) {
    if settings.heartbeat == Heartbeat::Disabled || settings.interval.is_zero() {
        cancel.cancelled().await;
        return;
    }

    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(frame) = ping_frame(&settings.heartbeat) else {
            break;
        };

        // ping 전송 전에 등록해야 빠른 pong을 놓치지 않음
        let notified = pong.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sink.send_frame(frame) => sent,
        };
        if let Err(e) = sent {
            warn!("Ping 전송 실패: {}", e);
            break;
        }
        debug!("Ping 전송");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = &mut notified => debug!("Pong 수신"),
            _ = tokio::time::sleep(settings.liveness_timeout) => {
                let reason = format!(
                    "pong not received within {}ms",
                    settings.liveness_timeout.as_millis()
                );
                // 버스가 막혀 있어도 취소에는 응답
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = watchdog.flag_stale(&reason) => {}
                }
            }
        }
    }

    debug!("하트비트 루프 종료");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::error::StreamError;
    use feed_core::{ConnectionErrorKind, Event};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Message>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, frame: Message) -> StreamResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StreamError::Send("closed".to_string()));
            }
            self.frames.lock().await.push(frame);
            Ok(())
        }
    }

    fn settings(heartbeat: Heartbeat) -> HeartbeatSettings {
        HeartbeatSettings {
            heartbeat,
            interval: Duration::from_millis(100),
            liveness_timeout: Duration::from_millis(40),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pong_is_reported_as_stale() {
        let (bus, mut rx) = EventBus::channel(8);
        let watchdog = Arc::new(TrafficWatchdog::new("alpha", Duration::from_secs(60), bus));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_heartbeat(
            sink.clone(),
            settings(Heartbeat::WebSocketPing),
            Arc::new(Notify::new()),
            watchdog,
            cancel.clone(),
        ));

        match rx.recv().await.unwrap() {
            Event::ConnectionError { kind, message, .. } => {
                assert_eq!(kind, ConnectionErrorKind::Stale);
                assert!(message.contains("pong"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(sink.frames.lock().await[0], Message::Ping(_)));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_missing_pongs_report_once() {
        let (bus, mut rx) = EventBus::channel(8);
        let watchdog = Arc::new(TrafficWatchdog::new("alpha", Duration::from_secs(600), bus));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_heartbeat(
            sink.clone(),
            HeartbeatSettings {
                heartbeat: Heartbeat::WebSocketPing,
                interval: Duration::from_secs(30),
                liveness_timeout: Duration::from_secs(10),
            },
            Arc::new(Notify::new()),
            watchdog.clone(),
            cancel.clone(),
        ));

        // ping: 30s, 60s / 누락 판정: 40s, 70s
        tokio::time::sleep(Duration::from_secs(75)).await;
        cancel.cancel();
        handle.await.unwrap();

        let pings = sink
            .frames
            .lock()
            .await
            .iter()
            .filter(|frame| matches!(frame, Message::Ping(_)))
            .count();
        assert_eq!(pings, 2);

        let mut stale = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(
                event,
                Event::ConnectionError {
                    kind: ConnectionErrorKind::Stale,
                    ..
                }
            ) {
                stale += 1;
            }
        }
        assert_eq!(stale, 1);
        assert!(watchdog.is_flagged());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_stale_report_is_blocked() {
        let (bus, _rx) = EventBus::channel(1);
        bus.publish(Event::ResetRequested {
            exchange: "alpha".to_string(),
            reason: None,
        })
        .await;
        let watchdog = Arc::new(TrafficWatchdog::new("alpha", Duration::from_secs(60), bus));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_heartbeat(
            sink.clone(),
            settings(Heartbeat::WebSocketPing),
            Arc::new(Notify::new()),
            watchdog.clone(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(watchdog.is_flagged());
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("heartbeat did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_prevents_staleness() {
        let (bus, mut rx) = EventBus::channel(8);
        let watchdog = Arc::new(TrafficWatchdog::new("alpha", Duration::from_secs(60), bus));
        let sink = Arc::new(RecordingSink::default());
        let pong = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_heartbeat(
            sink.clone(),
            settings(Heartbeat::Text("{\"op\":\"ping\"}".to_string())),
            pong.clone(),
            watchdog,
            cancel.clone(),
        ));

        for sent in 0..3 {
            while sink.frames.lock().await.len() <= sent {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            pong.notify_waiters();
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(rx.try_recv().is_err());
        let frames = sink.frames.lock().await;
        assert!(!frames.is_empty());
        assert!(matches!(&frames[0], Message::Text(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_stops_loop() {
        let (bus, _rx) = EventBus::channel(8);
        let watchdog = Arc::new(TrafficWatchdog::new("alpha", Duration::from_secs(60), bus));
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);

        run_heartbeat(
            sink,
            settings(Heartbeat::WebSocketPing),
            Arc::new(Notify::new()),
            watchdog,
            CancellationToken::new(),
        )
        .await;
    }

    #[tokio::test]
    async fn test_disabled_waits_for_cancel() {
        let (bus, _rx) = EventBus::channel(8);
        let watchdog = Arc::new(TrafficWatchdog::new("alpha", Duration::from_secs(60), bus));
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_heartbeat(
            Arc::new(RecordingSink::default()),
            settings(Heartbeat::Disabled),
            Arc::new(Notify::new()),
            watchdog,
            cancel,
        )
        .await;
    }
}

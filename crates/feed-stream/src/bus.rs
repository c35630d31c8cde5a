//! 이벤트 버스.
//!
//! 연결/디스패처/호가창 저장소가 발행하는 이벤트를 하류 관찰자
//! (REST API, 알림 엔진 등)에게 전달하는 bounded 채널입니다.
//!
//! 버퍼가 가득 차면 `publish`는 여유 공간이 생길 때까지 대기합니다.
//! 소비자가 느리면 발행자(읽기 루프 포함)가 함께 멈출 수 있으며,
//! 이벤트를 조용히 버리지는 않습니다. 연결 태스크는 `publish_until`로
//! 대기 중에도 취소에 응답합니다.

use async_trait::async_trait;
use feed_core::Event;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 기본 이벤트 버퍼 크기.
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// 이벤트 발행 핸들.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
}

impl EventBus {
    /// 지정한 버퍼 크기로 버스와 수신자를 생성합니다.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// 이벤트를 발행합니다.
    ///
    /// 수신자가 닫혀 있으면 `false`를 반환합니다.
    pub async fn publish(&self, event: Event) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                warn!(
                    exchange = event.exchange(),
                    "이벤트 수신자가 닫혀 이벤트를 전달하지 못했습니다"
                );
                false
            }
        }
    }

    /// 취소 토큰과 경쟁하며 이벤트를 발행합니다.
    ///
    /// 버퍼가 가득 찬 채로 취소되면 이벤트를 버리고 `false`를 반환합니다.
    pub async fn publish_until(&self, event: Event, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("취소되어 이벤트 발행을 포기합니다");
                false
            }
            published = self.publish(event) => published,
        }
    }

    /// 수신자가 닫혔는지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 현재 남은 버퍼 용량.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// 이벤트 관찰자.
#[async_trait]
pub trait EventObserver: Send + Sync {
    /// 관찰자 이름 (로깅용).
    fn name(&self) -> &str;

    /// 이벤트를 처리합니다.
    async fn on_event(&self, event: &Event);
}

/// 수신자에서 이벤트를 꺼내 모든 관찰자에게 순서대로 전달합니다.
///
/// 취소되거나 채널이 닫히면 종료하며, 전달한 이벤트 수를 반환합니다.
pub async fn run_observers(
    mut rx: mpsc::Receiver<Event>,
    observers: Vec<Arc<dyn EventObserver>>,
    cancel: CancellationToken,
) -> usize {
    let mut delivered = 0;
    let names: Vec<&str> = observers.iter().map(|o| o.name()).collect();
    debug!(observers = ?names, "관찰자 루프 시작");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("관찰자 루프 취소됨");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    debug!("이벤트 채널 닫힘");
                    break;
                };
                for observer in &observers {
                    observer.on_event(&event).await;
                }
                delivered += 1;
            }
        }
    }

    delivered
}

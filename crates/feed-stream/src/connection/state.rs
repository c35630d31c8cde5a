//! 연결 상태 공유.
//!
//! 상태는 `watch` 채널 하나가 단일 출처이며, 관찰자는 `subscribe`로
//! 전이를 기다릴 수 있습니다.

use feed_core::ConnectionState;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

/// 연결 상태와 인증 여부.
#[derive(Debug)]
pub struct ConnectionStatus {
    exchange: String,
    state: watch::Sender<ConnectionState>,
    authenticated: AtomicBool,
}

impl ConnectionStatus {
    /// `Disconnected` 상태로 생성합니다.
    pub fn new(exchange: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            exchange: exchange.into(),
            state,
            authenticated: AtomicBool::new(false),
        }
    }

    /// 현재 상태.
    pub fn get(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 상태를 전이합니다. 이전 상태를 반환합니다.
    pub fn set(&self, next: ConnectionState) -> ConnectionState {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(exchange = %self.exchange, from = %prev, to = %next, "연결 상태 전이");
        }
        prev
    }

    /// 현재 상태가 `expected`일 때만 전이합니다.
    pub fn transition(&self, expected: &[ConnectionState], next: ConnectionState) -> bool {
        let mut changed = false;
        self.state.send_if_modified(|state| {
            if expected.contains(state) && *state != next {
                *state = next;
                changed = true;
            }
            changed
        });
        if changed {
            debug!(exchange = %self.exchange, to = %next, "연결 상태 전이");
        }
        changed
    }

    /// 상태 변경 수신자.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// 인증 여부를 기록합니다.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    /// 인증 여부.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }
}

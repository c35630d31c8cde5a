//! 스트리밍 연결 관리 및 호가창 동기화.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 영속 WebSocket 연결 관리자 (핸드셰이크, 인증, 하트비트, 종료)
//! - 구독 등록부 (요청/확인/해제 추적)
//! - 교환별 메시지 디코딩 트레이트와 정규화 프로토콜
//! - 스냅샷/델타 기반 호가창 저장소
//! - 이벤트 버스와 트래픽 감시기
//! - 발신 rate limiting

pub mod bus;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod orderbook;
pub mod protocol;
pub mod rate_limit;
pub mod subscription;
pub mod watchdog;

pub use bus::{run_observers, EventBus, EventObserver, DEFAULT_EVENT_BUFFER};
pub use connection::{ConnectionManager, ConnectionStatus, FrameSink};
pub use dispatcher::{MessageDispatcher, Route};
pub use error::*;
pub use orderbook::OrderbookStore;
pub use protocol::{
    AckKind, Envelope, Handshake, Heartbeat, NormalizedProtocol, StreamProtocol, SubscriptionAck,
};
pub use rate_limit::RateLimiter;
pub use subscription::{SubscriptionRegistry, SubscriptionState};
pub use watchdog::TrafficWatchdog;

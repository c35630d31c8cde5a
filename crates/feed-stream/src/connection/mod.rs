//! 영속 스트리밍 연결.

mod dial;
mod heartbeat;
mod manager;
mod state;

pub use dial::{dial, WsStream};
pub use heartbeat::{run_heartbeat, FrameSink, HeartbeatSettings};
pub use manager::ConnectionManager;
pub use state::ConnectionStatus;

//! 호가창 동기화 엔진.
//!
//! - `depth`: 한 방향 레벨 목록에 델타를 적용하는 순수 알고리즘
//! - `store`: 키별 잠금을 갖는 동시 접근 저장소

pub mod depth;
mod store;

pub use store::OrderbookStore;

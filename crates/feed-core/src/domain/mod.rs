//! 시장 데이터 피드의 도메인 모델.

mod event;
mod market_data;
mod orderbook;
mod subscription;

pub use event::*;
pub use market_data::*;
pub use orderbook::*;
pub use subscription::*;

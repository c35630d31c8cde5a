//! 피드 전반에서 사용되는 공통 타입.

mod asset;
mod decimal;
mod pair;

pub use asset::*;
pub use decimal::*;
pub use pair::*;

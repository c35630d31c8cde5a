//! # Feed Core
//!
//! 스트리밍 시장 데이터 피드의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 피드 시스템 전반에서 사용되는 기본 타입을 제공합니다:
//! - 거래 쌍 및 자산 유형 정의
//! - 호가창, 가격 레벨, 델타 변경분
//! - 시세/체결 데이터
//! - 구독 및 연결 상태
//! - 이벤트 버스 이벤트
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;

//! 피드 코어의 에러 타입.
//!
//! 도메인 타입 파싱과 설정 처리에서 발생하는 에러를 정의합니다.

use thiserror::Error;

/// 피드 코어 에러.
#[derive(Debug, Error)]
pub enum FeedError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),
}

/// 피드 코어 작업을 위한 Result 타입.
pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    /// 호출자 입력 문제로 인한 에러인지 확인합니다.
    pub fn is_input_error(&self) -> bool {
        matches!(self, FeedError::InvalidInput(_) | FeedError::Serialization(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for FeedError {
    fn from(err: config::ConfigError) -> Self {
        FeedError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_classification() {
        assert!(FeedError::InvalidInput("pair".to_string()).is_input_error());
        assert!(!FeedError::Config("missing".to_string()).is_input_error());
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let feed_err: FeedError = err.into();
        assert!(matches!(feed_err, FeedError::Serialization(_)));
    }
}

//! tracing을 사용한 로깅 초기화.
//!
//! 필터는 `[logging]` 섹션의 기본 레벨에, `verbose`가 켜진 거래소마다
//! `exchange` 필드로 좁힌 debug 지시자를 더해 만듭니다. 연결 태스크는
//! 모두 [`feed_span!`] span 안에서 돌기 때문에 거래소 하나만 자세히 볼 수
//! 있습니다. `RUST_LOG`가 설정되어 있으면 그것이 우선합니다.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{FeedConfig, LoggingConfig};
use crate::error::{FeedError, FeedResult};

/// verbose 거래소 지시자가 적용되는 크레이트.
const STREAM_TARGET: &str = "feed_stream";

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 사람이 읽기 쉬운 형식 (개발용)
    #[default]
    Pretty,
    /// 로그 집계용 JSON 형식
    Json,
    /// 한 줄 형식
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(FeedError::Config(format!("알 수 없는 로그 형식: {}", s))),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// 기본 필터 (예: "info", "feed_stream=debug")
    pub level: String,
    /// 출력 형식
    pub format: LogFormat,
    /// 프레임 단위 로그를 켤 거래소
    pub verbose_exchanges: Vec<String>,
}

impl LogConfig {
    /// 새 로그 설정을 생성합니다.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// 로그 형식을 설정합니다.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// 거래소 하나의 debug 로그를 켭니다.
    pub fn with_verbose_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.verbose_exchanges.push(exchange.into());
        self
    }

    /// 피드 설정 전체에서 로그 설정을 만듭니다.
    ///
    /// 활성화되어 있고 `verbose`인 거래소만 포함하며 이름순으로 정렬합니다.
    pub fn from_feed_config(config: &FeedConfig) -> Self {
        let mut verbose_exchanges: Vec<String> = config
            .enabled_exchanges()
            .filter(|(_, stream)| stream.verbose)
            .map(|(name, _)| name.clone())
            .collect();
        verbose_exchanges.sort();

        Self {
            verbose_exchanges,
            ..Self::from(&config.logging)
        }
    }

    /// `EnvFilter` 지시자 문자열.
    pub fn directives(&self) -> String {
        let base = if self.level.trim().is_empty() {
            "info"
        } else {
            self.level.trim()
        };

        std::iter::once(base.to_string())
            .chain(
                self.verbose_exchanges
                    .iter()
                    .map(|exchange| format!("{}[{{exchange={}}}]=debug", STREAM_TARGET, exchange)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::builder().parse_lossy(self.directives()))
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            format: config.format.parse().unwrap_or_default(),
            verbose_exchanges: Vec::new(),
        }
    }
}

/// 전역 로깅을 초기화합니다. 두 번째 호출은 `Config` 에러입니다.
///
/// ```no_run
/// use feed_core::{init_logging, FeedConfig, LogConfig};
///
/// let config = FeedConfig::load_default().unwrap();
/// init_logging(&LogConfig::from_feed_config(&config)).unwrap();
/// ```
pub fn init_logging(config: &LogConfig) -> FeedResult<()> {
    let layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(layer)
        .try_init()
        .map_err(|e| FeedError::Config(format!("로깅 초기화 실패: {}", e)))?;

    tracing::info!(
        format = ?config.format,
        filter = %config.directives(),
        "로깅 초기화"
    );
    Ok(())
}

/// 거래소/거래 쌍/자산 필드가 포함된 span을 생성하는 매크로.
#[macro_export]
macro_rules! feed_span {
    ($name:expr, $exchange:expr) => {
        tracing::info_span!($name, exchange = %$exchange)
    };
    ($name:expr, $exchange:expr, $pair:expr) => {
        tracing::info_span!($name, exchange = %$exchange, pair = %$pair)
    };
    ($name:expr, $exchange:expr, $pair:expr, $asset:expr) => {
        tracing::info_span!(
            $name,
            exchange = %$exchange,
            pair = %$pair,
            asset = %$asset
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("COMPACT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!("xml".parse::<LogFormat>(), Err(FeedError::Config(_))));
    }

    #[test]
    fn test_unknown_format_falls_back_to_pretty() {
        let section = LoggingConfig {
            level: "info".to_string(),
            format: "yaml".to_string(),
        };
        assert_eq!(LogConfig::from(&section).format, LogFormat::Pretty);
    }

    #[test]
    fn test_verbose_exchanges_from_feed_config() {
        let config = FeedConfig::from_toml_str(
            r#"
            [logging]
            level = "warn"
            format = "compact"

            [exchanges.gamma]
            url = "wss://gamma.example/ws"
            verbose = true

            [exchanges.alpha]
            url = "wss://alpha.example/ws"
            verbose = true

            [exchanges.beta]
            url = "wss://beta.example/ws"

            [exchanges.delta]
            enabled = false
            url = "wss://delta.example/ws"
            verbose = true
            "#,
        )
        .unwrap();

        let log = LogConfig::from_feed_config(&config);
        assert_eq!(log.format, LogFormat::Compact);
        assert_eq!(log.verbose_exchanges, vec!["alpha", "gamma"]);
        assert_eq!(
            log.directives(),
            "warn,feed_stream[{exchange=alpha}]=debug,feed_stream[{exchange=gamma}]=debug"
        );
    }

    #[test]
    fn test_directives_parse_as_filter() {
        let log = LogConfig::new("").with_verbose_exchange("alpha");
        assert_eq!(log.directives(), "info,feed_stream[{exchange=alpha}]=debug");
        assert!(EnvFilter::try_new(log.directives()).is_ok());

        assert_eq!(LogConfig::new("feed_stream=trace").directives(), "feed_stream=trace");
    }
}

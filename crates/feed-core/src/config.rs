//! 설정 관리.
//!
//! 스트림 연결과 로깅에 필요한 설정을 정의합니다. 설정은 외부 로더가
//! 채워 넣는 것이 기본이지만, 파일/환경 변수 로딩도 제공합니다.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::types::{AssetType, Pair};

/// 피드 프로세스 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeedConfig {
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 거래소별 스트림 설정
    #[serde(default)]
    pub exchanges: HashMap<String, StreamConfig>,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 연결 하나의 스트림 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// 이 연결 활성화 여부
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// WebSocket 엔드포인트 (ws:// 또는 wss://)
    #[serde(default)]
    pub url: String,
    /// HTTP CONNECT 프록시 URL (예: "http://127.0.0.1:3128")
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// 수신 프레임 단위 디버그 로그
    #[serde(default)]
    pub verbose: bool,
    /// 하트비트(ping) 간격 (밀리초)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// 수신 트래픽/퐁 대기 한도 (밀리초)
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    /// 핸드셰이크 프레임 대기 한도 (밀리초)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// TCP/WebSocket 연결 한도 (밀리초)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 이벤트 버스 버퍼 크기
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// 기본 구독 채널 (비어 있으면 프로토콜 기본값 사용)
    #[serde(default)]
    pub channels: Vec<String>,
    /// 기본 구독 대상 상품
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    /// 발신 프레임 요청 한도
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// 구독 대상 상품.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstrumentConfig {
    /// 거래 쌍 (예: "BTC/USDT")
    pub pair: Pair,
    /// 자산 유형
    #[serde(default = "default_asset")]
    pub asset: AssetType,
}

impl InstrumentConfig {
    /// 새 상품 설정을 생성합니다.
    pub fn new(pair: Pair, asset: AssetType) -> Self {
        Self { pair, asset }
    }
}

fn default_asset() -> AssetType {
    AssetType::Spot
}

fn default_enabled() -> bool {
    true
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_liveness_timeout_ms() -> u64 {
    10_000
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_event_buffer() -> usize {
    1000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            url: String::new(),
            proxy_url: None,
            verbose: false,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            event_buffer: default_event_buffer(),
            channels: Vec::new(),
            instruments: Vec::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl StreamConfig {
    /// 엔드포인트를 지정한 설정을 생성합니다.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// 하트비트 간격.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// 트래픽 생존 한도.
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// 핸드셰이크 대기 한도.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// 연결 대기 한도.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 프록시를 지정합니다.
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    /// 기본 구독 대상 상품을 추가합니다.
    pub fn with_instrument(mut self, pair: Pair, asset: AssetType) -> Self {
        self.instruments.push(InstrumentConfig::new(pair, asset));
        self
    }

    /// 발신 요청 한도를 지정합니다.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// 하트비트 간격과 생존 한도를 지정합니다.
    pub fn with_heartbeat(mut self, interval: Duration, liveness_timeout: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self.liveness_timeout_ms = liveness_timeout.as_millis() as u64;
        self
    }
}

/// 발신 요청 한도 설정.
///
/// `requests_per_second`가 0이면 제한하지 않습니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// 초당 최대 발신 프레임 수
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// 버스트 허용량
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

fn default_requests_per_second() -> u32 {
    10
}
fn default_burst_size() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

impl RateLimitConfig {
    /// 제한 없는 설정.
    pub fn unlimited() -> Self {
        Self {
            requests_per_second: 0,
            burst_size: 0,
        }
    }

    /// 제한이 비활성화되어 있는지 확인합니다.
    pub fn is_unlimited(&self) -> bool {
        self.requests_per_second == 0
    }
}

impl FeedConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(config::File::from(path.as_ref()))
            // 환경 변수로 오버라이드 (예: FEED__LOGGING__LEVEL=debug)
            .add_source(
                config::Environment::with_prefix("FEED")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// TOML 문자열에서 설정을 로드합니다.
    pub fn from_toml_str(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/feed.toml")
    }

    /// 활성화된 거래소 설정만 반환합니다.
    pub fn enabled_exchanges(&self) -> impl Iterator<Item = (&String, &StreamConfig)> {
        self.exchanges.iter().filter(|(_, cfg)| cfg.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert!(config.enabled);
        assert!(config.proxy_url.is_none());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.liveness_timeout(), Duration::from_secs(10));
        assert!(!config.rate_limit.is_unlimited());
    }

    #[test]
    fn test_load_from_toml() {
        let toml = r#"
            [logging]
            level = "debug"
            format = "json"

            [exchanges.alpha]
            url = "wss://stream.alpha.test/ws"
            channels = ["book"]
            instruments = [
                { pair = "BTC/USDT" },
                { pair = "ETH-USD", asset = "perpetual_swap" },
            ]
            proxy_url = "http://127.0.0.1:3128"
            verbose = true
            heartbeat_interval_ms = 15000

            [exchanges.beta]
            enabled = false

            [exchanges.beta.rate_limit]
            requests_per_second = 0
        "#;

        let config = FeedConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.logging.level, "debug");

        let alpha = &config.exchanges["alpha"];
        assert!(alpha.enabled);
        assert!(alpha.verbose);
        assert_eq!(alpha.proxy_url.as_deref(), Some("http://127.0.0.1:3128"));
        assert_eq!(alpha.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(alpha.liveness_timeout_ms, 10_000);
        assert_eq!(alpha.url, "wss://stream.alpha.test/ws");
        assert_eq!(alpha.event_buffer, 1000);
        assert_eq!(alpha.channels, vec!["book".to_string()]);
        assert_eq!(
            alpha.instruments,
            vec![
                InstrumentConfig::new(Pair::new("BTC", "USDT"), AssetType::Spot),
                InstrumentConfig::new(Pair::new("ETH", "USD"), AssetType::PerpetualSwap),
            ]
        );

        let beta = &config.exchanges["beta"];
        assert!(beta.rate_limit.is_unlimited());

        let enabled: Vec<_> = config.enabled_exchanges().map(|(name, _)| name.clone()).collect();
        assert_eq!(enabled, vec!["alpha".to_string()]);
    }

    #[test]
    fn test_with_heartbeat() {
        let config = StreamConfig::default()
            .with_heartbeat(Duration::from_millis(500), Duration::from_millis(200));
        assert_eq!(config.heartbeat_interval_ms, 500);
        assert_eq!(config.liveness_timeout_ms, 200);
    }
}

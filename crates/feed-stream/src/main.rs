//! 스트리밍 피드 데몬.
//!
//! 설정 파일의 활성 거래소마다 연결을 열고, 이벤트를 로그로 남기다가
//! Ctrl-C를 받으면 모든 연결을 종료합니다.

use async_trait::async_trait;
use clap::Parser;
use feed_core::{init_logging, Event, FeedConfig, LogConfig, LogFormat};
use feed_stream::{
    run_observers, ConnectionManager, EventBus, EventObserver, NormalizedProtocol,
    OrderbookStore, StreamProtocol, DEFAULT_EVENT_BUFFER,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "feed-stream")]
#[command(about = "Streaming market-data feed", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로
    #[arg(short, long, default_value = "config/feed.toml")]
    config: String,

    /// 로그 필터 (설정 파일보다 우선)
    #[arg(long)]
    log_level: Option<String>,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

/// 버스 이벤트를 로그로 남기는 관찰자.
struct LogObserver;

#[async_trait]
impl EventObserver for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_event(&self, event: &Event) {
        if event.is_error() {
            warn!(exchange = event.exchange(), ?event, "피드 에러");
        } else {
            debug!(exchange = event.exchange(), ?event, "피드 이벤트");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = FeedConfig::load(&cli.config)?;
    let mut log_config = LogConfig::from_feed_config(&config);
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config)?;

    let buffer = config
        .enabled_exchanges()
        .map(|(_, stream)| stream.event_buffer)
        .max()
        .unwrap_or(DEFAULT_EVENT_BUFFER);
    let (bus, rx) = EventBus::channel(buffer);
    let store = Arc::new(OrderbookStore::with_bus(bus.clone()));

    let cancel = CancellationToken::new();
    let observers: Vec<Arc<dyn EventObserver>> = vec![Arc::new(LogObserver)];
    let observer_task = tokio::spawn(run_observers(rx, observers, cancel.clone()));

    let mut managers = Vec::new();
    for (name, stream) in config.enabled_exchanges() {
        let protocol: Arc<dyn StreamProtocol> = Arc::new(NormalizedProtocol::new(name.clone()));
        let manager = ConnectionManager::new(stream.clone(), protocol, store.clone(), bus.clone());
        if let Err(e) = manager.connect().await {
            error!(exchange = %name, "연결 실패: {}", e);
        }
        managers.push(manager);
    }
    info!(connections = managers.len(), "피드 시작");

    tokio::signal::ctrl_c().await?;
    info!("종료 신호 수신, 연결 종료 중...");

    for manager in &managers {
        if let Err(e) = manager.shutdown().await {
            warn!(exchange = manager.exchange(), "종료 실패: {}", e);
        }
    }
    cancel.cancel();
    let delivered = observer_task.await?;
    info!(delivered, "피드 종료");
    Ok(())
}

//! WebSocket 연결 수립.
//!
//! 직접 TCP 연결 또는 HTTP CONNECT 프록시를 거친 뒤 WebSocket 업그레이드를
//! 수행합니다. `wss` URL이면 TLS를 사용합니다.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{StreamError, StreamResult};

/// 연결된 WebSocket 스트림.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 프록시 응답 헤더 최대 크기.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

fn host_port(uri: &Uri) -> StreamResult<(String, u16)> {
    let host = uri
        .host()
        .ok_or_else(|| StreamError::Connection(format!("URL에 호스트가 없습니다: {}", uri)))?;
    let default_port = match uri.scheme_str() {
        Some("wss") | Some("https") => 443,
        _ => 80,
    };
    Ok((
        host.trim_start_matches('[').trim_end_matches(']').to_string(),
        uri.port_u16().unwrap_or(default_port),
    ))
}

/// HTTP CONNECT 터널을 엽니다.
async fn connect_via_proxy(proxy_url: &str, host: &str, port: u16) -> StreamResult<TcpStream> {
    let proxy: Uri = proxy_url
        .parse()
        .map_err(|e| StreamError::Connection(format!("잘못된 프록시 URL {}: {}", proxy_url, e)))?;
    let (proxy_host, proxy_port) = host_port(&proxy)?;

    debug!(proxy = %proxy_url, target = %format!("{}:{}", host, port), "프록시 터널 연결");
    let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port))
        .await
        .map_err(|e| StreamError::Connection(format!("프록시 연결 실패: {}", e)))?;

    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| StreamError::Connection(format!("프록시 요청 실패: {}", e)))?;

    let mut response = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() >= MAX_PROXY_RESPONSE {
            return Err(StreamError::Connection("프록시 응답 헤더가 너무 깁니다".to_string()));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| StreamError::Connection(format!("프록시 응답 수신 실패: {}", e)))?;
        if n == 0 {
            return Err(StreamError::Connection("프록시가 연결을 닫았습니다".to_string()));
        }
        response.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&response);
    let status_line = head.lines().next().unwrap_or_default();
    let status_ok = status_line
        .split_whitespace()
        .nth(1)
        .is_some_and(|code| code == "200");
    if !status_ok {
        return Err(StreamError::Connection(format!(
            "프록시 터널 거부: {}",
            status_line
        )));
    }

    Ok(stream)
}

async fn dial_inner(url: &str, proxy_url: Option<&str>) -> StreamResult<WsStream> {
    let request = url
        .into_client_request()
        .map_err(|e| StreamError::Connection(format!("잘못된 WebSocket URL {}: {}", url, e)))?;
    let (host, port) = host_port(request.uri())?;

    let tcp = match proxy_url {
        Some(proxy) => connect_via_proxy(proxy, &host, port).await?,
        None => TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| StreamError::Connection(format!("TCP 연결 실패 {}:{}: {}", host, port, e)))?,
    };
    let _ = tcp.set_nodelay(true);

    let (ws, response) = client_async_tls(request, tcp)
        .await
        .map_err(|e| StreamError::Connection(format!("WebSocket 업그레이드 실패: {}", e)))?;
    info!(url, status = %response.status(), "WebSocket 연결 성공");

    Ok(ws)
}

/// `timeout` 안에 WebSocket 연결을 수립합니다.
pub async fn dial(url: &str, proxy_url: Option<&str>, timeout: Duration) -> StreamResult<WsStream> {
    tokio::time::timeout(timeout, dial_inner(url, proxy_url))
        .await
        .map_err(|_| {
            StreamError::Connection(format!("연결 시간 초과 ({}ms): {}", timeout.as_millis(), url))
        })?
}

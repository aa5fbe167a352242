//! Prometheus 指标 HTTP 端点
//!
//! run 模式下按 `observability.metrics_bind` 开放 `GET /metrics`

use crate::error::{Error, Result};
use axum::{Router, routing::get};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> String {
    attendix_common::metrics::export_metrics()
}

fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// 绑定地址并在后台提供 `/metrics`，取消令牌触发后优雅退出
///
/// 返回实际监听地址，端口为 0 时由系统分配。
pub async fn start(
    bind_addr: &str,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| Error::custom(format!("Invalid metrics bind address '{bind_addr}': {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind metrics endpoint to '{addr}': {e}"))?;
    let local_addr = listener.local_addr()?;
    info!("Metrics endpoint listening on http://{}/metrics", local_addr);

    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, router()).with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Metrics endpoint received shutdown signal");
        });
        if let Err(e) = server.await {
            error!("Metrics endpoint error: {}", e);
        }
        info!("Metrics endpoint stopped");
    });

    Ok((local_addr, handle))
}

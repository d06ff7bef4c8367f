//! Passgate 宿主进程
//!
//! 从 stdin 逐行读取 JSON 请求，逐行向 stdout 写出 JSON 响应；日志走 stderr。

use anyhow::Context;
use passgate::config::load_config;
use passgate::core::ErrorResponse;
use passgate::{observability, MessageRouter, Request, SessionBuilder, VaultError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    std::fs::create_dir_all(&config.app.data_dir).context("Failed to create data dir")?;

    let manager = SessionBuilder::new(config)
        .build()
        .context("Failed to build session")?;
    let phase = manager.init().await.context("Session init failed")?;
    tracing::info!(?phase, "Passgate ready");

    let router = MessageRouter::new(manager);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => serde_json::to_string(&router.handle(request).await)?,
            Err(e) => {
                let err = VaultError::Validation(format!("malformed request: {}", e));
                serde_json::to_string(&ErrorResponse::from(&err))?
            }
        };
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

//! 条目使用时间戳（最近使用 / 最近启动），按条目 id 持久化，不含任何机密

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::core::{Clock, VaultError};
use crate::storage::{KeyValueStore, ITEM_USAGE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStamp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_launched_at: Option<i64>,
}

pub struct UsageLedger {
    durable: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// None 表示尚未从持久化存储加载
    stamps: RwLock<Option<HashMap<String, UsageStamp>>>,
}

impl UsageLedger {
    pub fn new(durable: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            durable,
            clock,
            stamps: RwLock::new(None),
        }
    }

    async fn load(&self) -> HashMap<String, UsageStamp> {
        match self.durable.get(ITEM_USAGE).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable usage map: {}", e);
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Failed to read usage map: {}", e);
                HashMap::new()
            }
        }
    }

    /// 当前全部时间戳
    pub async fn snapshot(&self) -> HashMap<String, UsageStamp> {
        if let Some(stamps) = self.stamps.read().await.as_ref() {
            return stamps.clone();
        }
        let loaded = self.load().await;
        let mut guard = self.stamps.write().await;
        guard.get_or_insert(loaded).clone()
    }

    pub async fn record_used(&self, item_id: &str) -> Result<(), VaultError> {
        let now = self.clock.now_ms();
        self.update(item_id, |stamp| stamp.last_used_at = Some(now)).await
    }

    pub async fn record_launched(&self, item_id: &str) -> Result<(), VaultError> {
        let now = self.clock.now_ms();
        self.update(item_id, |stamp| stamp.last_launched_at = Some(now)).await
    }

    async fn update(&self, item_id: &str, f: impl FnOnce(&mut UsageStamp)) -> Result<(), VaultError> {
        let current = self.snapshot().await;
        let mut guard = self.stamps.write().await;
        let stamps = guard.get_or_insert(current);
        f(stamps.entry(item_id.to_string()).or_default());
        let value = serde_json::to_value(&*stamps)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        self.durable.set(ITEM_USAGE, value).await?;
        Ok(())
    }

    /// 丢弃内存副本（登出时持久化数据由 SessionManager 删除）
    pub async fn reset(&self) {
        *self.stamps.write().await = None;
    }
}

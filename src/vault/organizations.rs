//! 组织目录：拉取并缓存会话所属组织，失败时回退到最近一次持久化快照
//!
//! reset() 推进代数；刷新只在代数未变时提交到内存与快照，锁定或登出之后完成的刷新被丢弃。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{Organization, VaultApi};
use crate::core::VaultError;
use crate::storage::{KeyValueStore, ORGANIZATIONS};

pub struct OrganizationDirectory {
    api: Arc<dyn VaultApi>,
    durable: Arc<dyn KeyValueStore>,
    organizations: RwLock<Vec<Organization>>,
    generation: AtomicU64,
}

impl OrganizationDirectory {
    pub fn new(api: Arc<dyn VaultApi>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self {
            api,
            durable,
            organizations: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// 拉取组织列表
    ///
    /// 成功且非空：替换内存列表并覆盖持久化快照。
    /// 失败或为空：回退到非空快照；两者都为空时返回 NoOrgs。401/403 直接返回 AuthExpired。
    /// 期间发生 reset() 时不提交任何内容，返回 NoAuth。
    pub async fn refresh(&self) -> Result<Vec<Organization>, VaultError> {
        self.refresh_from(self.generation()).await
    }

    /// 当前代数；后台刷新在派生任务之前取得，晚于 reset() 启动的任务同样被丢弃
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 仅当代数仍为 generation 时提交的刷新
    pub async fn refresh_from(&self, generation: u64) -> Result<Vec<Organization>, VaultError> {
        match self.api.list_organizations().await {
            Ok(orgs) if !orgs.is_empty() => {
                // 持有写锁直到快照落盘，reset() 在其后执行
                let mut current = self.organizations.write().await;
                self.ensure_generation(generation)?;
                info!(count = orgs.len(), "Organization list refreshed");
                *current = orgs.clone();
                match serde_json::to_value(&orgs) {
                    Ok(snapshot) => {
                        if let Err(e) = self.durable.set(ORGANIZATIONS, snapshot).await {
                            warn!("Failed to persist organization snapshot: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to encode organization snapshot: {}", e),
                }
                Ok(orgs)
            }
            Ok(_) => {
                debug!("Live organization list is empty, trying snapshot");
                self.fall_back_to_snapshot(generation).await
            }
            Err(e) => {
                let err = e.into_fetch_error();
                if err == VaultError::AuthExpired {
                    return Err(err);
                }
                warn!(error = %err, "Organization refresh failed, trying snapshot");
                self.fall_back_to_snapshot(generation).await
            }
        }
    }

    fn ensure_generation(&self, generation: u64) -> Result<(), VaultError> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            debug!("Organization refresh outlived a reset, discarding");
            Err(VaultError::NoAuth)
        }
    }

    async fn fall_back_to_snapshot(&self, generation: u64) -> Result<Vec<Organization>, VaultError> {
        let snapshot = match self.durable.get(ORGANIZATIONS).await {
            Ok(Some(value)) => serde_json::from_value::<Vec<Organization>>(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable organization snapshot: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read organization snapshot: {}", e);
                Vec::new()
            }
        };
        if snapshot.is_empty() {
            return Err(VaultError::NoOrgs);
        }
        let mut current = self.organizations.write().await;
        self.ensure_generation(generation)?;
        info!(count = snapshot.len(), "Using organization snapshot");
        *current = snapshot.clone();
        Ok(snapshot)
    }

    /// 目录为空时刷新（进程重启后的冷启动）
    pub async fn ensure_loaded(&self) -> Result<Vec<Organization>, VaultError> {
        let current = self.list().await;
        if !current.is_empty() {
            return Ok(current);
        }
        self.refresh().await
    }

    pub async fn list(&self) -> Vec<Organization> {
        self.organizations.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.organizations.read().await.is_empty()
    }

    pub async fn find(&self, org_id: &str) -> Option<Organization> {
        self.organizations
            .read()
            .await
            .iter()
            .find(|o| o.id == org_id)
            .cloned()
    }

    /// 默认组织：标记为 default 的，否则第一个，否则 None
    pub async fn get_default(&self) -> Option<Organization> {
        let orgs = self.organizations.read().await;
        orgs.iter()
            .find(|o| o.is_default)
            .or_else(|| orgs.first())
            .cloned()
    }

    /// 清空内存列表（快照由 SessionManager 在登出时删除）
    pub async fn reset(&self) {
        let mut current = self.organizations.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        current.clear();
    }
}

//! Mock 条目服务（用于测试，无需网络）
//!
//! 记录调用次数；可设置单个组织失败、全局 401、人为延迟，以及「过于宽松」的服务端过滤。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ApiError, NewItem, Organization, VaultApi, VaultItem};

#[derive(Debug, Default)]
pub struct MockVaultApi {
    organizations: Mutex<Vec<Organization>>,
    items: Mutex<Vec<VaultItem>>,
    failing_orgs: Mutex<HashSet<String>>,
    fail_org_listing: AtomicBool,
    unauthorized: AtomicBool,
    /// 忽略域名过滤，返回组织内全部条目
    permissive: AtomicBool,
    latency_ms: AtomicU64,
    list_org_calls: AtomicUsize,
    list_item_calls: AtomicUsize,
    get_item_calls: AtomicUsize,
    writes: Mutex<Vec<(Option<String>, NewItem)>>,
}

impl MockVaultApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_organization(&self, org: Organization) {
        self.organizations.lock().unwrap().push(org);
    }

    pub fn add_item(&self, item: VaultItem) {
        self.items.lock().unwrap().push(item);
    }

    pub fn fail_org(&self, org_id: &str) {
        self.failing_orgs.lock().unwrap().insert(org_id.to_string());
    }

    pub fn fail_org_listing(&self, fail: bool) {
        self.fail_org_listing.store(fail, Ordering::SeqCst);
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.unauthorized.store(unauthorized, Ordering::SeqCst);
    }

    pub fn set_permissive(&self, permissive: bool) {
        self.permissive.store(permissive, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn list_org_calls(&self) -> usize {
        self.list_org_calls.load(Ordering::SeqCst)
    }

    pub fn list_item_calls(&self) -> usize {
        self.list_item_calls.load(Ordering::SeqCst)
    }

    pub fn get_item_calls(&self) -> usize {
        self.get_item_calls.load(Ordering::SeqCst)
    }

    /// 写入记录：(被更新的条目 id，请求体)；创建时 id 为 None
    pub fn writes(&self) -> Vec<(Option<String>, NewItem)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn item(&self, item_id: &str) -> Option<VaultItem> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
    }

    async fn simulate(&self) -> Result<(), ApiError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized(401));
        }
        Ok(())
    }
}

#[async_trait]
impl VaultApi for MockVaultApi {
    async fn list_organizations(&self) -> Result<Vec<Organization>, ApiError> {
        self.list_org_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        if self.fail_org_listing.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection reset".to_string()));
        }
        Ok(self.organizations.lock().unwrap().clone())
    }

    async fn list_items(&self, org_id: &str, domains: &[String]) -> Result<Vec<VaultItem>, ApiError> {
        self.list_item_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        if self.failing_orgs.lock().unwrap().contains(org_id) {
            return Err(ApiError::Status(500));
        }
        let permissive = self.permissive.load(Ordering::SeqCst);
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.organization_id == org_id)
            .filter(|i| {
                permissive
                    || i.domain_hint
                        .as_ref()
                        .map(|h| domains.contains(h))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn get_item(&self, item_id: &str) -> Result<VaultItem, ApiError> {
        self.get_item_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        self.item(item_id).ok_or(ApiError::NotFound)
    }

    async fn create_item(&self, item: NewItem) -> Result<VaultItem, ApiError> {
        self.simulate().await?;
        let created = VaultItem {
            id: format!("item_{}", uuid::Uuid::new_v4()),
            organization_id: item.organization_id.clone(),
            folder_id: item.folder_id.clone(),
            item_type: item.item_type,
            domain_hint: item.domain_hint.clone(),
            data: item.data.clone(),
            auto_fill: item.auto_fill,
            auto_login: item.auto_login,
            reprompt: item.reprompt,
        };
        self.items.lock().unwrap().push(created.clone());
        self.writes.lock().unwrap().push((None, item));
        Ok(created)
    }

    async fn update_item(&self, item_id: &str, item: NewItem) -> Result<VaultItem, ApiError> {
        self.simulate().await?;
        let mut items = self.items.lock().unwrap();
        let existing = items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(ApiError::NotFound)?;
        existing.folder_id = item.folder_id.clone();
        existing.item_type = item.item_type;
        existing.domain_hint = item.domain_hint.clone();
        existing.data = item.data.clone();
        existing.auto_fill = item.auto_fill;
        existing.auto_login = item.auto_login;
        existing.reprompt = item.reprompt;
        let updated = existing.clone();
        drop(items);
        self.writes
            .lock()
            .unwrap()
            .push((Some(item_id.to_string()), item));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, org: &str, hint: &str) -> VaultItem {
        VaultItem {
            id: id.into(),
            organization_id: org.into(),
            folder_id: None,
            item_type: Default::default(),
            domain_hint: Some(hint.into()),
            data: "blob".into(),
            auto_fill: true,
            auto_login: false,
            reprompt: false,
        }
    }

    #[tokio::test]
    async fn test_mock_filters_by_domain_unless_permissive() {
        let api = MockVaultApi::new();
        api.add_item(item("a", "o1", "bank.com"));
        api.add_item(item("b", "o1", "other.com"));

        let hits = api.list_items("o1", &["bank.com".into()]).await.unwrap();
        assert_eq!(hits.len(), 1);

        api.set_permissive(true);
        let hits = api.list_items("o1", &["bank.com".into()]).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(api.list_item_calls(), 2);
    }
}

//! 待保存 TOTP 密钥：每个标签页一条，TTL 更短，并按域名限定读取
//!
//! 读取时请求域名与暂存域名不一致视为未命中，并立即清除条目，防止密钥跨越无关导航泄露。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::{Clock, VaultError};
use crate::domain::DomainMatcher;
use crate::pending::TabId;

/// 一次捕获（SET_PENDING_TOTP 的载荷）
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpCapture {
    pub item_id: Option<String>,
    pub secret: Option<String>,
    pub domain: Option<String>,
}

#[derive(Clone, Default)]
pub struct PendingTotp {
    pub item_id: String,
    pub secret: Zeroizing<String>,
    pub domain: String,
    pub expires_at: i64,
}

impl std::fmt::Debug for PendingTotp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTotp")
            .field("item_id", &self.item_id)
            .field("secret", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// GET_PENDING_TOTP 的响应（域名已校验）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTotpView {
    pub item_id: String,
    pub secret: String,
    pub domain: String,
    pub expires_at: i64,
}

impl PendingTotp {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn view(&self) -> PendingTotpView {
        PendingTotpView {
            item_id: self.item_id.clone(),
            secret: self.secret.as_str().to_string(),
            domain: self.domain.clone(),
            expires_at: self.expires_at,
        }
    }
}

pub struct PendingTotpRegistry {
    entries: RwLock<HashMap<TabId, PendingTotp>>,
    matcher: Arc<DomainMatcher>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl PendingTotpRegistry {
    pub fn new(matcher: Arc<DomainMatcher>, clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            matcher,
            clock,
            ttl_ms,
        }
    }

    pub async fn stage(&self, tab: TabId, capture: TotpCapture) -> Result<(), VaultError> {
        let domain = match capture.domain.as_deref() {
            Some(raw) => Some(
                self.matcher
                    .canonicalize(raw)
                    .ok_or_else(|| VaultError::Validation(format!("unparseable domain: {}", raw)))?,
            ),
            None => None,
        };

        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        if entries.get(&tab).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(&tab);
        }
        let entry = entries.entry(tab).or_default();
        if let Some(item_id) = capture.item_id {
            entry.item_id = item_id;
        }
        if let Some(secret) = capture.secret {
            entry.secret = Zeroizing::new(secret);
        }
        if let Some(domain) = domain {
            entry.domain = domain;
        }
        if entry.domain.is_empty() {
            entries.remove(&tab);
            return Err(VaultError::Validation("pending TOTP requires a domain".to_string()));
        }
        entry.expires_at = now + self.ttl_ms;
        debug!(tab, domain = %entry.domain, "Pending TOTP staged");
        Ok(())
    }

    /// 按域名读取；过期或域名不一致都会清除条目
    pub async fn get(&self, tab: TabId, domain: &str) -> Option<PendingTotp> {
        let now = self.clock.now_ms();
        let requested = self.matcher.canonicalize(domain);
        let mut entries = self.entries.write().await;
        let entry = entries.get(&tab)?;
        if entry.is_expired(now) {
            entries.remove(&tab);
            debug!(tab, "Expired pending TOTP purged");
            return None;
        }
        if requested.as_deref() != Some(entry.domain.as_str()) {
            entries.remove(&tab);
            debug!(tab, "Pending TOTP purged after domain change");
            return None;
        }
        Some(entry.clone())
    }

    pub async fn clear(&self, tab: TabId) -> bool {
        self.entries.write().await.remove(&tab).is_some()
    }

    pub async fn reset(&self) {
        self.entries.write().await.clear();
    }
}

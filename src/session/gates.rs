//! 机密披露闸门：每次调用最多返回一个条目的明文
//!
//! 检查顺序：已认证 → 常驻用户密钥 → 用户手势（仅手动填充）→ 标签页冷却 → 读取并解密。
//! 自动填充额外要求域名等价且未被拉黑，并且条目未关闭自动填充；这些检查在冷却之前，被拒绝的请求不占用冷却。
//! 解密后复核会话纪元，期间被锁定或登出则不返回明文。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::{VaultApi, VaultItem};
use crate::core::{Clock, SessionHandle, VaultError};
use crate::crypto::VaultCrypto;
use crate::domain::DomainMatcher;
use crate::pending::TabId;
use crate::vault::{ItemPayload, OrgKeyResolver, UsageLedger};

/// GET_FILL_SECRET 的响应
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSecret {
    pub username: String,
    pub password: String,
    pub totp_secret: Option<String>,
}

/// GET_AUTOFILL_SECRET 的响应
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillSecret {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for FillSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillSecret")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for AutofillSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutofillSecret")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

pub struct SecretGate {
    session: Arc<SessionHandle>,
    api: Arc<dyn VaultApi>,
    crypto: Arc<dyn VaultCrypto>,
    org_keys: Arc<OrgKeyResolver>,
    matcher: Arc<DomainMatcher>,
    usage: Arc<UsageLedger>,
    clock: Arc<dyn Clock>,
    cooldown_ms: i64,
    /// tab -> 上次放行时间
    last_disclosure: RwLock<HashMap<TabId, i64>>,
}

impl SecretGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<SessionHandle>,
        api: Arc<dyn VaultApi>,
        crypto: Arc<dyn VaultCrypto>,
        org_keys: Arc<OrgKeyResolver>,
        matcher: Arc<DomainMatcher>,
        usage: Arc<UsageLedger>,
        clock: Arc<dyn Clock>,
        cooldown_ms: i64,
    ) -> Self {
        Self {
            session,
            api,
            crypto,
            org_keys,
            matcher,
            usage,
            clock,
            cooldown_ms,
            last_disclosure: RwLock::new(HashMap::new()),
        }
    }

    /// 手动填充：必须带用户手势
    pub async fn fill_secret(&self, tab: TabId, item_id: &str, user_gesture: bool) -> Result<FillSecret, VaultError> {
        let (_, epoch) = self.session.require_user_key_at().await?;
        if !user_gesture {
            return Err(VaultError::UserGestureRequired);
        }
        self.throttle(tab).await?;

        let item = self.fetch_item(item_id).await?;
        let payload = self.open(&item).await?;
        self.session.ensure_epoch(epoch)?;
        self.touch(item_id).await;
        debug!(tab, item_id, "Fill secret disclosed");
        Ok(FillSecret {
            username: payload.username.clone(),
            password: payload.password.clone(),
            totp_secret: payload.totp_secret.clone(),
        })
    }

    /// 自动填充：请求域名必须与条目域名提示等价
    pub async fn autofill_secret(&self, tab: TabId, item_id: &str, domain: &str) -> Result<AutofillSecret, VaultError> {
        let (_, epoch) = self.session.require_user_key_at().await?;

        if self.matcher.is_blacklisted(domain) {
            return Err(VaultError::DomainMismatch);
        }
        let requested = self
            .matcher
            .canonicalize(domain)
            .ok_or(VaultError::DomainMismatch)?;

        let item = self.fetch_item(item_id).await?;
        let hint_matches = item
            .domain_hint
            .as_deref()
            .map(|hint| self.matcher.is_equivalent(hint, &requested))
            .unwrap_or(false);
        if !hint_matches {
            debug!(tab, item_id, "Autofill refused, domain mismatch");
            return Err(VaultError::DomainMismatch);
        }
        if !item.auto_fill {
            return Err(VaultError::AutofillDisabled);
        }
        self.throttle(tab).await?;

        let payload = self.open(&item).await?;
        self.session.ensure_epoch(epoch)?;
        self.touch(item_id).await;
        debug!(tab, item_id, "Autofill secret disclosed");
        Ok(AutofillSecret {
            username: payload.username.clone(),
            password: payload.password.clone(),
        })
    }

    /// 冷却期内再次请求返回 RATE_LIMITED；通过时记录本次时间
    async fn throttle(&self, tab: TabId) -> Result<(), VaultError> {
        let now = self.clock.now_ms();
        let mut last = self.last_disclosure.write().await;
        if let Some(at) = last.get(&tab) {
            if now - at < self.cooldown_ms {
                return Err(VaultError::RateLimited);
            }
        }
        last.insert(tab, now);
        Ok(())
    }

    async fn fetch_item(&self, item_id: &str) -> Result<VaultItem, VaultError> {
        self.api
            .get_item(item_id)
            .await
            .map_err(|e| e.into_fetch_error())
    }

    async fn open(&self, item: &VaultItem) -> Result<ItemPayload, VaultError> {
        let key = self.org_keys.resolve(&item.organization_id).await?;
        let plaintext = self
            .crypto
            .decrypt(&item.data, &key)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        ItemPayload::from_plaintext(&plaintext)
    }

    async fn touch(&self, item_id: &str) {
        if let Err(e) = self.usage.record_used(item_id).await {
            warn!(item_id, error = %e, "Failed to record item usage");
        }
    }

    pub async fn clear_tab(&self, tab: TabId) {
        self.last_disclosure.write().await.remove(&tab);
    }

    pub async fn reset(&self) {
        self.last_disclosure.write().await.clear();
    }
}

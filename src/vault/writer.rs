//! 凭据写入：用组织密钥加密载荷后创建 / 更新条目，写入后使域名缓存失效

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{ItemType, NewItem, VaultApi, VaultItem};
use crate::core::VaultError;
use crate::crypto::{SymmetricKey, VaultCrypto};
use crate::domain::DomainMatcher;
use crate::vault::{DomainCredentialCache, ItemPayload, OrgKeyResolver, OrganizationDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SaveAction {
    #[default]
    Add,
    Update,
}

/// 保存请求（SAVE_CREDENTIALS 的载荷，也是待保存条目确认后的形态）
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    #[serde(default)]
    pub action: SaveAction,
    pub login_id: Option<String>,
    pub organization_id: Option<String>,
    pub folder_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub url: String,
    pub totp_secret: Option<String>,
    /// 新增时缺省为 true；更新时缺省沿用已有条目
    pub auto_fill: Option<bool>,
    pub auto_login: Option<bool>,
    pub reprompt: Option<bool>,
}

impl std::fmt::Debug for SaveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveRequest")
            .field("action", &self.action)
            .field("login_id", &self.login_id)
            .field("organization_id", &self.organization_id)
            .field("url", &self.url)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Drop for SaveRequest {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.password.zeroize();
        if let Some(secret) = self.totp_secret.as_mut() {
            secret.zeroize();
        }
    }
}

/// 保存结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedItem {
    pub id: String,
    pub organization_id: String,
    pub action: SaveAction,
}

pub struct CredentialWriter {
    api: Arc<dyn VaultApi>,
    crypto: Arc<dyn VaultCrypto>,
    directory: Arc<OrganizationDirectory>,
    org_keys: Arc<OrgKeyResolver>,
    matcher: Arc<DomainMatcher>,
    candidates: Arc<DomainCredentialCache>,
}

impl CredentialWriter {
    pub fn new(
        api: Arc<dyn VaultApi>,
        crypto: Arc<dyn VaultCrypto>,
        directory: Arc<OrganizationDirectory>,
        org_keys: Arc<OrgKeyResolver>,
        matcher: Arc<DomainMatcher>,
        candidates: Arc<DomainCredentialCache>,
    ) -> Self {
        Self {
            api,
            crypto,
            directory,
            org_keys,
            matcher,
            candidates,
        }
    }

    pub async fn save(&self, req: SaveRequest) -> Result<SavedItem, VaultError> {
        let saved = match req.action {
            SaveAction::Add => self.create(&req).await?,
            SaveAction::Update => self.update(&req).await?,
        };
        self.candidates.invalidate().await;
        info!(item_id = %saved.id, org_id = %saved.organization_id, action = ?saved.action, "Credential saved");
        Ok(saved)
    }

    async fn create(&self, req: &SaveRequest) -> Result<SavedItem, VaultError> {
        if req.password.is_empty() {
            return Err(VaultError::Validation("password is required".to_string()));
        }
        let domain = self
            .matcher
            .canonicalize(&req.url)
            .ok_or_else(|| VaultError::Validation(format!("unparseable url: {}", req.url)))?;

        let org_id = match &req.organization_id {
            Some(id) => id.clone(),
            None => {
                if self.directory.is_empty().await {
                    self.directory.refresh().await?;
                }
                self.directory
                    .get_default()
                    .await
                    .map(|o| o.id)
                    .ok_or(VaultError::NoOrgs)?
            }
        };
        let key = self.org_keys.resolve(&org_id).await?;

        let payload = ItemPayload {
            title: if req.title.is_empty() { domain.clone() } else { req.title.clone() },
            username: req.username.clone(),
            password: req.password.clone(),
            url: req.url.clone(),
            totp_secret: req.totp_secret.clone(),
        };
        let item = NewItem {
            organization_id: org_id,
            folder_id: req.folder_id.clone(),
            item_type: ItemType::Login,
            domain_hint: Some(domain),
            data: self.seal(&payload, &key)?,
            auto_fill: req.auto_fill.unwrap_or(true),
            auto_login: req.auto_login.unwrap_or(false),
            reprompt: req.reprompt.unwrap_or(false),
        };
        let created = self
            .api
            .create_item(item)
            .await
            .map_err(|e| e.into_save_error())?;
        Ok(SavedItem {
            id: created.id,
            organization_id: created.organization_id,
            action: SaveAction::Add,
        })
    }

    async fn update(&self, req: &SaveRequest) -> Result<SavedItem, VaultError> {
        let login_id = req
            .login_id
            .as_deref()
            .ok_or_else(|| VaultError::Validation("loginId is required for update".to_string()))?;
        let (existing, key, mut payload) = self.open(login_id).await?;

        if !req.username.is_empty() {
            payload.username = req.username.clone();
        }
        if !req.password.is_empty() {
            payload.password = req.password.clone();
        }
        if !req.title.is_empty() {
            payload.title = req.title.clone();
        }
        if !req.url.is_empty() {
            payload.url = req.url.clone();
        }
        if req.totp_secret.is_some() {
            payload.totp_secret = req.totp_secret.clone();
        }

        let domain_hint = self
            .matcher
            .canonicalize(&payload.url)
            .or_else(|| existing.domain_hint.clone());
        let item = NewItem {
            organization_id: existing.organization_id.clone(),
            folder_id: req.folder_id.clone().or_else(|| existing.folder_id.clone()),
            item_type: existing.item_type,
            domain_hint,
            data: self.seal(&payload, &key)?,
            auto_fill: req.auto_fill.unwrap_or(existing.auto_fill),
            auto_login: req.auto_login.unwrap_or(existing.auto_login),
            reprompt: req.reprompt.unwrap_or(existing.reprompt),
        };
        let updated = self
            .api
            .update_item(login_id, item)
            .await
            .map_err(|e| e.into_save_error())?;
        Ok(SavedItem {
            id: updated.id,
            organization_id: updated.organization_id,
            action: SaveAction::Update,
        })
    }

    /// 把 TOTP 密钥写入已有条目，其它字段保持不变
    pub async fn attach_totp(&self, item_id: &str, secret: &str) -> Result<SavedItem, VaultError> {
        let (existing, key, mut payload) = self.open(item_id).await?;
        payload.totp_secret = Some(secret.to_string());
        let item = NewItem {
            organization_id: existing.organization_id.clone(),
            folder_id: existing.folder_id.clone(),
            item_type: existing.item_type,
            domain_hint: existing.domain_hint.clone(),
            data: self.seal(&payload, &key)?,
            auto_fill: existing.auto_fill,
            auto_login: existing.auto_login,
            reprompt: existing.reprompt,
        };
        let updated = self
            .api
            .update_item(item_id, item)
            .await
            .map_err(|e| e.into_save_error())?;
        self.candidates.invalidate().await;
        info!(item_id = %updated.id, "TOTP secret attached");
        Ok(SavedItem {
            id: updated.id,
            organization_id: updated.organization_id,
            action: SaveAction::Update,
        })
    }

    /// 读取并解密已有条目
    async fn open(&self, item_id: &str) -> Result<(VaultItem, SymmetricKey, ItemPayload), VaultError> {
        let existing = self.api.get_item(item_id).await.map_err(|e| e.into_save_error())?;
        let key = self.org_keys.resolve(&existing.organization_id).await?;
        let plaintext = self
            .crypto
            .decrypt(&existing.data, &key)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let payload = ItemPayload::from_plaintext(&plaintext)?;
        Ok((existing, key, payload))
    }

    fn seal(&self, payload: &ItemPayload, key: &SymmetricKey) -> Result<String, VaultError> {
        let plaintext = payload.to_plaintext()?;
        self.crypto
            .encrypt(&plaintext, key)
            .map_err(|e| VaultError::Crypto(e.to_string()))
    }
}

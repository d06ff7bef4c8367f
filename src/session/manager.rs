//! 会话管理：认证恢复、锁定、登出，并持有、重置所有进程级缓存与暂存区
//!
//! 锁定与登出的区别：锁定保留持久化的 PIN 包装密钥（可快速解锁），登出一并删除。
//! 任何操作遇到 AuthExpired 都会把会话降级为 Locked。

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::{SessionHandle, SessionPhase, SessionState, VaultError};
use crate::crypto::SymmetricKey;
use crate::pending::{
    PendingSaveRegistry, PendingSaveView, PendingTotpRegistry, PendingTotpView, SaveCapture,
    SaveOverrides, TabId, TotpCapture,
};
use crate::session::{AutofillSecret, FillSecret, SecretGate};
use crate::storage::{
    KeyValueStore, ACCESS_TOKEN, ITEM_USAGE, ORGANIZATIONS, PIN_PROTECTED_USER_KEY, PROTECTED_PIN,
    USER_KEY,
};
use crate::tracker::{FormSubmissionResult, FormSubmissionTracker};
use crate::vault::{
    Candidates, CredentialWriter, DomainCredentialCache, OrgKeyResolver, OrganizationDirectory,
    SaveRequest, SavedItem, UsageLedger,
};

/// 登出时删除的持久化键
const LOGOUT_WIPE_KEYS: [&str; 5] = [
    PIN_PROTECTED_USER_KEY,
    PROTECTED_PIN,
    ACCESS_TOKEN,
    ORGANIZATIONS,
    ITEM_USAGE,
];

/// GET_STATUS 的响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub is_authenticated: bool,
    pub has_user_key: bool,
    pub organizations: usize,
}

pub struct SessionManager {
    pub(crate) session: Arc<SessionHandle>,
    pub(crate) durable: Arc<dyn KeyValueStore>,
    pub(crate) ephemeral: Arc<dyn KeyValueStore>,
    pub(crate) directory: Arc<OrganizationDirectory>,
    pub(crate) org_keys: Arc<OrgKeyResolver>,
    pub(crate) candidates: Arc<DomainCredentialCache>,
    pub(crate) usage: Arc<UsageLedger>,
    pub(crate) writer: Arc<CredentialWriter>,
    pub(crate) pending_saves: PendingSaveRegistry,
    pub(crate) pending_totp: PendingTotpRegistry,
    pub(crate) tracker: FormSubmissionTracker,
    pub(crate) gate: SecretGate,
}

impl SessionManager {
    pub async fn phase(&self) -> SessionPhase {
        self.session.phase().await
    }

    pub async fn status(&self) -> SessionStatus {
        let phase = self.session.phase().await;
        SessionStatus {
            phase,
            is_authenticated: phase == SessionPhase::Authenticated,
            has_user_key: self.session.user_key().await.is_some(),
            organizations: self.directory.list().await.len(),
        }
    }

    /// 恢复会话：无令牌 → LoggedOut；有令牌 → Authenticated（用户密钥可能缺失），后台刷新组织列表
    pub async fn init(self: &Arc<Self>) -> Result<SessionPhase, VaultError> {
        if self.load_token().await?.is_none() {
            self.session.transition(SessionState::LoggedOut).await?;
            info!("No access token, session logged out");
            return Ok(SessionPhase::LoggedOut);
        }

        let user_key = self.restore_user_key().await;
        if user_key.is_none() {
            warn!("Access token present but no resident user key");
        }
        self.session
            .transition(SessionState::Authenticated { user_key })
            .await?;
        info!("Session restored");
        self.spawn_refresh();
        Ok(SessionPhase::Authenticated)
    }

    /// 新登录：持久化令牌，常驻用户密钥，清空上一个会话残留的缓存
    pub async fn sign_in(self: &Arc<Self>, access_token: &str, user_key: SymmetricKey) -> Result<SessionPhase, VaultError> {
        if access_token.is_empty() {
            return Err(VaultError::Validation("access token is required".to_string()));
        }
        self.durable
            .set(ACCESS_TOKEN, Value::String(access_token.to_string()))
            .await?;
        self.store_user_key(&user_key).await?;
        self.session
            .transition(SessionState::Authenticated {
                user_key: Some(user_key),
            })
            .await?;
        self.wipe_memory().await;
        info!("Signed in");
        self.spawn_refresh();
        Ok(SessionPhase::Authenticated)
    }

    /// 重新提供用户密钥解锁；需要仍持有访问令牌
    pub async fn unlock(&self, user_key: SymmetricKey) -> Result<SessionPhase, VaultError> {
        match self.session.phase().await {
            SessionPhase::Locked | SessionPhase::Authenticated => {}
            _ => return Err(VaultError::NoAuth),
        }
        if self.load_token().await?.is_none() {
            return Err(VaultError::NoAuth);
        }
        self.store_user_key(&user_key).await?;
        self.session
            .transition(SessionState::Authenticated {
                user_key: Some(user_key),
            })
            .await?;
        info!("Session unlocked");
        Ok(SessionPhase::Authenticated)
    }

    /// 锁定：清空内存中的密钥、组织列表与所有暂存区，删除临时用户密钥；保留 PIN 包装的密钥
    ///
    /// 先迁移再清空：迁移之后不会再有读者取得用户密钥，清空之后缓存保持为空。
    pub async fn lock(&self) -> Result<SessionPhase, VaultError> {
        if self.session.phase().await == SessionPhase::Authenticated {
            self.session.transition(SessionState::Locked).await?;
            info!("Session locked");
        }
        self.wipe_memory().await;
        self.ephemeral.remove(USER_KEY).await?;
        Ok(self.session.phase().await)
    }

    /// 登出：锁定的全部动作，再删除 PIN 包装的密钥、令牌、组织快照与使用时间戳
    pub async fn logout(&self) -> Result<SessionPhase, VaultError> {
        self.session.transition(SessionState::LoggedOut).await?;
        self.wipe_memory().await;
        self.ephemeral.remove(USER_KEY).await?;
        for key in LOGOUT_WIPE_KEYS {
            self.durable.remove(key).await?;
        }
        info!("Logged out");
        Ok(SessionPhase::LoggedOut)
    }

    // ---- 凭据读取 / 披露 ----

    pub async fn request_passwords(&self, domain: &str) -> Result<Candidates, VaultError> {
        self.session.require_authenticated().await?;
        let result = self.candidates.request(domain).await;
        self.guard(result).await
    }

    pub async fn fill_secret(&self, tab: TabId, item_id: &str, user_gesture: bool) -> Result<FillSecret, VaultError> {
        let result = self.gate.fill_secret(tab, item_id, user_gesture).await;
        self.guard(result).await
    }

    pub async fn autofill_secret(&self, tab: TabId, item_id: &str, domain: &str) -> Result<AutofillSecret, VaultError> {
        let result = self.gate.autofill_secret(tab, item_id, domain).await;
        self.guard(result).await
    }

    pub async fn record_launched(&self, item_id: &str) -> Result<(), VaultError> {
        self.session.require_authenticated().await?;
        self.usage.record_launched(item_id).await
    }

    // ---- 写入 ----

    pub async fn save_credentials(&self, req: SaveRequest) -> Result<SavedItem, VaultError> {
        self.session.require_authenticated().await?;
        let result = self.writer.save(req).await;
        self.guard(result).await
    }

    pub async fn stage_pending_save(&self, tab: TabId, capture: SaveCapture) -> Result<PendingSaveView, VaultError> {
        self.session.require_authenticated().await?;
        Ok(self.pending_saves.stage(tab, capture).await.view())
    }

    pub async fn check_pending_save(&self, tab: TabId) -> Option<PendingSaveView> {
        self.pending_saves.peek(tab).await.map(|entry| entry.view())
    }

    pub async fn confirm_pending_save(&self, tab: TabId, overrides: SaveOverrides) -> Result<SavedItem, VaultError> {
        self.session.require_authenticated().await?;
        let result = self.pending_saves.confirm(tab, overrides).await;
        self.guard(result).await
    }

    pub async fn dismiss_pending_save(&self, tab: TabId) -> bool {
        self.pending_saves.dismiss(tab).await
    }

    pub async fn stage_pending_totp(&self, tab: TabId, capture: TotpCapture) -> Result<(), VaultError> {
        self.session.require_authenticated().await?;
        self.pending_totp.stage(tab, capture).await
    }

    pub async fn get_pending_totp(&self, tab: TabId, domain: &str) -> Option<PendingTotpView> {
        self.pending_totp.get(tab, domain).await.map(|entry| entry.view())
    }

    pub async fn clear_pending_totp(&self, tab: TabId) -> bool {
        self.pending_totp.clear(tab).await
    }

    /// 把暂存的 TOTP 密钥写入条目；失败时保留暂存以便重试
    pub async fn confirm_pending_totp(&self, tab: TabId, domain: &str) -> Result<SavedItem, VaultError> {
        self.session.require_authenticated().await?;
        let entry = self
            .pending_totp
            .get(tab, domain)
            .await
            .ok_or_else(|| VaultError::NotFound("pending TOTP".to_string()))?;
        if entry.item_id.is_empty() {
            return Err(VaultError::Validation("pending TOTP has no item id".to_string()));
        }
        let result = self.writer.attach_totp(&entry.item_id, &entry.secret).await;
        let saved = self.guard(result).await?;
        self.pending_totp.clear(tab).await;
        Ok(saved)
    }

    // ---- 网络事件 ----

    pub async fn form_submitted(&self, request_id: &str, tab: TabId, url: &str, method: &str) -> bool {
        self.tracker.track(request_id, tab, url, method).await
    }

    pub async fn request_redirected(&self, request_id: &str, status_code: u16, redirect_url: &str) -> bool {
        self.tracker.on_redirect(request_id, status_code, redirect_url).await
    }

    pub async fn request_completed(&self, request_id: &str, status_code: u16) -> bool {
        self.tracker.on_completed(request_id, status_code).await
    }

    pub async fn request_failed(&self, request_id: &str, error: &str) -> bool {
        self.tracker.on_error(request_id, error).await
    }

    pub async fn form_submission_result(&self, tab: TabId) -> Option<FormSubmissionResult> {
        self.tracker.result(tab).await
    }

    /// 标签页关闭：清除该标签页的所有暂存、结果与冷却记录
    pub async fn tab_closed(&self, tab: TabId) {
        self.pending_saves.dismiss(tab).await;
        self.pending_totp.clear(tab).await;
        self.tracker.clear_tab(tab).await;
        self.gate.clear_tab(tab).await;
        debug!(tab, "Tab state cleaned up");
    }

    // ---- 内部 ----

    /// AuthExpired 会把会话降级为 Locked，错误原样返回
    async fn guard<T>(&self, result: Result<T, VaultError>) -> Result<T, VaultError> {
        if let Err(VaultError::AuthExpired) = &result {
            warn!("Upstream rejected credentials, locking session");
            if let Err(e) = self.lock().await {
                warn!(error = %e, "Lock after auth expiry failed");
            }
        }
        result
    }

    /// 推进会话纪元后清空；调用方先完成状态迁移
    async fn wipe_memory(&self) {
        self.session.advance_epoch();
        self.org_keys.reset().await;
        self.directory.reset().await;
        self.candidates.invalidate().await;
        self.usage.reset().await;
        self.pending_saves.reset().await;
        self.pending_totp.reset().await;
        self.tracker.reset().await;
        self.gate.reset().await;
    }

    /// 后台刷新组织列表；锁定或登出之后完成的刷新由目录代数丢弃
    fn spawn_refresh(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let generation = self.directory.generation();
        tokio::spawn(async move {
            match this.directory.refresh_from(generation).await {
                Ok(orgs) => debug!(count = orgs.len(), "Background organization refresh done"),
                Err(VaultError::NoAuth) => debug!("Background organization refresh discarded"),
                Err(VaultError::AuthExpired) => {
                    warn!("Background organization refresh hit expired auth, locking session");
                    if let Err(e) = this.lock().await {
                        warn!(error = %e, "Lock after auth expiry failed");
                    }
                }
                Err(e) => warn!(error = %e, "Background organization refresh failed"),
            }
        });
    }

    async fn load_token(&self) -> Result<Option<String>, VaultError> {
        Ok(match self.durable.get(ACCESS_TOKEN).await? {
            Some(Value::String(token)) if !token.is_empty() => Some(token),
            _ => None,
        })
    }

    async fn restore_user_key(&self) -> Option<SymmetricKey> {
        let value = match self.ephemeral.get(USER_KEY).await {
            Ok(Some(Value::String(encoded))) => encoded,
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read resident user key");
                return None;
            }
        };
        match STANDARD.decode(value.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => Some(SymmetricKey::from_bytes(bytes)),
            _ => {
                warn!("Discarding unreadable resident user key");
                None
            }
        }
    }

    async fn store_user_key(&self, key: &SymmetricKey) -> Result<(), VaultError> {
        let encoded = STANDARD.encode(key.as_bytes());
        self.ephemeral.set(USER_KEY, Value::String(encoded)).await?;
        Ok(())
    }
}

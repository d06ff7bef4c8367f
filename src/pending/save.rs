//! 待保存凭据：每个标签页一条，等待用户确认
//!
//! 多步登录中分次捕获的字段合并进同一条目，每次捕获都把过期时间刷新为 now + TTL。
//! 过期条目在访问时惰性清除，没有后台定时器。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::core::{Clock, VaultError};
use crate::domain::DomainMatcher;
use crate::pending::TabId;
use crate::vault::{CredentialWriter, DomainCredentialCache, SaveAction, SaveRequest, SavedItem};

/// 一次捕获（SET_PENDING_SAVE 的载荷），未出现的字段不覆盖已有值
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCapture {
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub title: Option<String>,
    pub action: Option<SaveAction>,
    pub login_id: Option<String>,
    pub folder_id: Option<String>,
    pub auto_fill: Option<bool>,
    pub auto_login: Option<bool>,
    pub reprompt: Option<bool>,
}

/// 确认时调用方可覆盖的字段（CONFIRM_PENDING_SAVE 的载荷）
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOverrides {
    pub title: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub folder_id: Option<String>,
    pub organization_id: Option<String>,
    pub action: Option<SaveAction>,
    pub login_id: Option<String>,
    pub auto_fill: Option<bool>,
    pub auto_login: Option<bool>,
    pub reprompt: Option<bool>,
}

/// 已暂存的条目
#[derive(Clone, Default)]
pub struct PendingSave {
    pub username: String,
    pub password: Zeroizing<String>,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub action: SaveAction,
    pub login_id: Option<String>,
    pub folder_id: Option<String>,
    /// 未捕获时为 None：新增取默认值，更新沿用已有条目的设置
    pub auto_fill: Option<bool>,
    pub auto_login: Option<bool>,
    pub reprompt: Option<bool>,
    pub expires_at: i64,
}

impl std::fmt::Debug for PendingSave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSave")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("action", &self.action)
            .field("login_id", &self.login_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// 对外视图：不含密码
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSaveView {
    pub username: String,
    pub has_password: bool,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub action: SaveAction,
    pub login_id: Option<String>,
    pub folder_id: Option<String>,
    pub auto_fill: Option<bool>,
    pub auto_login: Option<bool>,
    pub reprompt: Option<bool>,
    pub expires_at: i64,
}

impl PendingSave {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    fn merge(&mut self, capture: SaveCapture, matcher: &DomainMatcher) {
        if let Some(username) = capture.username {
            self.username = username;
        }
        if let Some(password) = capture.password {
            self.password = Zeroizing::new(password);
        }
        if let Some(url) = capture.url {
            if capture.domain.is_none() {
                if let Some(domain) = matcher.canonicalize(&url) {
                    self.domain = domain;
                }
            }
            self.url = url;
        }
        if let Some(domain) = capture.domain {
            self.domain = matcher.canonicalize(&domain).unwrap_or(domain);
        }
        if let Some(title) = capture.title {
            self.title = title;
        }
        if let Some(action) = capture.action {
            self.action = action;
        }
        if capture.login_id.is_some() {
            self.login_id = capture.login_id;
        }
        if capture.folder_id.is_some() {
            self.folder_id = capture.folder_id;
        }
        if capture.auto_fill.is_some() {
            self.auto_fill = capture.auto_fill;
        }
        if capture.auto_login.is_some() {
            self.auto_login = capture.auto_login;
        }
        if capture.reprompt.is_some() {
            self.reprompt = capture.reprompt;
        }
    }

    pub fn view(&self) -> PendingSaveView {
        PendingSaveView {
            username: self.username.clone(),
            has_password: !self.password.is_empty(),
            url: self.url.clone(),
            domain: self.domain.clone(),
            title: self.title.clone(),
            action: self.action,
            login_id: self.login_id.clone(),
            folder_id: self.folder_id.clone(),
            auto_fill: self.auto_fill,
            auto_login: self.auto_login,
            reprompt: self.reprompt,
            expires_at: self.expires_at,
        }
    }

    /// 叠加调用方覆盖字段，生成保存请求
    fn into_request(self, overrides: SaveOverrides) -> SaveRequest {
        let url = if self.url.is_empty() {
            self.domain.clone()
        } else {
            self.url.clone()
        };
        SaveRequest {
            action: overrides.action.unwrap_or(self.action),
            login_id: overrides.login_id.or_else(|| self.login_id.clone()),
            organization_id: overrides.organization_id,
            folder_id: overrides.folder_id.or_else(|| self.folder_id.clone()),
            title: overrides.title.unwrap_or_else(|| self.title.clone()),
            username: overrides.username.unwrap_or_else(|| self.username.clone()),
            password: overrides
                .password
                .unwrap_or_else(|| self.password.as_str().to_string()),
            url,
            totp_secret: None,
            auto_fill: overrides.auto_fill.or(self.auto_fill),
            auto_login: overrides.auto_login.or(self.auto_login),
            reprompt: overrides.reprompt.or(self.reprompt),
        }
    }
}

pub struct PendingSaveRegistry {
    entries: RwLock<HashMap<TabId, PendingSave>>,
    matcher: Arc<DomainMatcher>,
    candidates: Arc<DomainCredentialCache>,
    writer: Arc<CredentialWriter>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl PendingSaveRegistry {
    pub fn new(
        matcher: Arc<DomainMatcher>,
        candidates: Arc<DomainCredentialCache>,
        writer: Arc<CredentialWriter>,
        clock: Arc<dyn Clock>,
        ttl_ms: i64,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            matcher,
            candidates,
            writer,
            clock,
            ttl_ms,
        }
    }

    /// 合并捕获到标签页的条目；新增时若当前域名已有同名用户（大小写不敏感的精确匹配），自动改为更新
    pub async fn stage(&self, tab: TabId, capture: SaveCapture) -> PendingSave {
        let now = self.clock.now_ms();
        let staged = {
            let mut entries = self.entries.write().await;
            if entries.get(&tab).map(|e| e.is_expired(now)).unwrap_or(false) {
                entries.remove(&tab);
            }
            let entry = entries.entry(tab).or_insert_with(PendingSave::default);
            entry.merge(capture, &self.matcher);
            entry.expires_at = now + self.ttl_ms;
            entry.clone()
        };
        debug!(tab, domain = %staged.domain, action = ?staged.action, "Pending save staged");

        let Some(login_id) = self.match_existing(&staged).await else {
            return staged;
        };

        // 匹配期间可能有新的捕获写入，按最后写入为准，只在条目仍为同名新增时升级
        let mut entries = self.entries.write().await;
        match entries.get_mut(&tab) {
            Some(entry) => {
                if entry.action == SaveAction::Add
                    && entry.username.to_lowercase() == staged.username.to_lowercase()
                {
                    entry.action = SaveAction::Update;
                    entry.login_id = Some(login_id);
                    info!(tab, "Pending save upgraded to update of existing login");
                }
                entry.clone()
            }
            None => staged,
        }
    }

    async fn match_existing(&self, staged: &PendingSave) -> Option<String> {
        if staged.action != SaveAction::Add || staged.username.is_empty() || staged.domain.is_empty() {
            return None;
        }
        match self.candidates.request(&staged.domain).await {
            Ok(candidates) => {
                let wanted = staged.username.to_lowercase();
                candidates
                    .iter()
                    .find(|c| c.username.to_lowercase() == wanted)
                    .map(|c| c.id.clone())
            }
            Err(e) => {
                debug!(error = %e, "No candidates to match pending save against");
                None
            }
        }
    }

    /// 未过期则返回条目；过期条目在此清除
    pub async fn peek(&self, tab: TabId) -> Option<PendingSave> {
        let now = self.clock.now_ms();
        {
            let entries = self.entries.read().await;
            match entries.get(&tab) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(&tab).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(&tab);
            debug!(tab, "Expired pending save purged");
        }
        None
    }

    /// 叠加覆盖字段并执行创建 / 更新；成功后清除条目，失败时保留以便重试
    pub async fn confirm(&self, tab: TabId, overrides: SaveOverrides) -> Result<SavedItem, VaultError> {
        let entry = self.peek(tab).await.ok_or(VaultError::NoPendingSave)?;
        let saved = self.writer.save(entry.into_request(overrides)).await?;
        self.entries.write().await.remove(&tab);
        Ok(saved)
    }

    /// 丢弃条目，返回是否存在
    pub async fn dismiss(&self, tab: TabId) -> bool {
        self.entries.write().await.remove(&tab).is_some()
    }

    pub async fn reset(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> DomainMatcher {
        DomainMatcher::new(Vec::new(), Vec::new())
    }

    fn capture(username: Option<&str>, password: Option<&str>) -> SaveCapture {
        SaveCapture {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            ..SaveCapture::default()
        }
    }

    #[test]
    fn test_merge_keeps_earlier_fields() {
        let m = matcher();
        let mut entry = PendingSave::default();
        entry.merge(capture(Some("a"), Some("p1")), &m);
        entry.merge(capture(None, Some("p2")), &m);
        assert_eq!(entry.username, "a");
        assert_eq!(entry.password.as_str(), "p2");
    }

    #[test]
    fn test_merge_derives_domain_from_url() {
        let m = matcher();
        let mut entry = PendingSave::default();
        entry.merge(
            SaveCapture {
                url: Some("https://login.bank.com/signin".into()),
                ..SaveCapture::default()
            },
            &m,
        );
        assert_eq!(entry.domain, "bank.com");
        assert!(entry.auto_fill.is_none());
    }

    #[test]
    fn test_overrides_win_over_staged_fields() {
        let m = matcher();
        let mut entry = PendingSave::default();
        entry.merge(capture(Some("a"), Some("p1")), &m);
        entry.url = "https://bank.com".into();
        let req = entry.into_request(SaveOverrides {
            username: Some("b".into()),
            folder_id: Some("f1".into()),
            ..SaveOverrides::default()
        });
        assert_eq!(req.username, "b");
        assert_eq!(req.password, "p1");
        assert_eq!(req.folder_id.as_deref(), Some("f1"));
        assert_eq!(req.url, "https://bank.com");
    }

    #[test]
    fn test_uncaptured_flags_stay_unset_in_request() {
        let m = matcher();
        let mut entry = PendingSave::default();
        entry.merge(capture(Some("a"), Some("p1")), &m);
        let req = entry.clone().into_request(SaveOverrides::default());
        assert_eq!(req.auto_fill, None);
        assert_eq!(req.auto_login, None);

        entry.merge(
            SaveCapture {
                auto_fill: Some(false),
                ..SaveCapture::default()
            },
            &m,
        );
        let req = entry.into_request(SaveOverrides {
            auto_login: Some(true),
            ..SaveOverrides::default()
        });
        assert_eq!(req.auto_fill, Some(false));
        assert_eq!(req.auto_login, Some(true));
    }

    #[test]
    fn test_view_hides_password() {
        let m = matcher();
        let mut entry = PendingSave::default();
        entry.merge(capture(Some("a"), Some("secret")), &m);
        let json = serde_json::to_value(entry.view()).unwrap();
        assert_eq!(json["hasPassword"], true);
        assert!(!json.to_string().contains("secret"));
    }
}

//! 会话构建器：统一装配 SessionManager 的全部组件
//!
//! 未显式提供的协作方按配置创建默认实现：HTTP 条目服务、AES-GCM、JSON 文件持久化、内存临时存储、系统时钟。

use std::sync::Arc;

use crate::api::{ApiError, HttpVaultApi, VaultApi};
use crate::config::AppConfig;
use crate::core::{Clock, SessionHandle, SystemClock};
use crate::crypto::{AesGcmCrypto, VaultCrypto};
use crate::domain::DomainMatcher;
use crate::pending::{PendingSaveRegistry, PendingTotpRegistry};
use crate::session::{SecretGate, SessionManager};
use crate::storage::{JsonFileStore, KeyValueStore, MemoryStore};
use crate::tracker::FormSubmissionTracker;
use crate::vault::{
    CredentialWriter, DomainCredentialCache, OrgKeyResolver, OrganizationDirectory, UsageLedger,
};

/// 持久化文件名（位于 app.data_dir 下）
pub const STORE_FILE: &str = "vault-store.json";

pub struct SessionBuilder {
    config: AppConfig,
    api: Option<Arc<dyn VaultApi>>,
    crypto: Option<Arc<dyn VaultCrypto>>,
    durable: Option<Arc<dyn KeyValueStore>>,
    ephemeral: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            api: None,
            crypto: None,
            durable: None,
            ephemeral: None,
            clock: None,
        }
    }

    pub fn with_api(mut self, api: Arc<dyn VaultApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn VaultCrypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// 持久化存储（令牌、组织快照、使用时间戳、PIN 包装密钥）
    pub fn with_durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// 会话级临时存储（常驻用户密钥）
    pub fn with_ephemeral_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.ephemeral = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 默认 HTTP 客户端无法构建时返回 ApiError
    pub fn build(self) -> Result<Arc<SessionManager>, ApiError> {
        let config = self.config;
        let durable: Arc<dyn KeyValueStore> = self.durable.unwrap_or_else(|| {
            Arc::new(JsonFileStore::new(config.app.data_dir.join(STORE_FILE)))
        });
        let ephemeral: Arc<dyn KeyValueStore> =
            self.ephemeral.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let api: Arc<dyn VaultApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpVaultApi::new(
                &config.api.base_url,
                config.api.timeout_secs,
                durable.clone(),
            )?),
        };
        let crypto: Arc<dyn VaultCrypto> = self.crypto.unwrap_or_else(|| Arc::new(AesGcmCrypto::new()));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let matcher = Arc::new(DomainMatcher::from_config(&config.domains));
        let session = Arc::new(SessionHandle::new());
        let directory = Arc::new(OrganizationDirectory::new(api.clone(), durable.clone()));
        let org_keys = Arc::new(OrgKeyResolver::new(
            session.clone(),
            directory.clone(),
            crypto.clone(),
        ));
        let usage = Arc::new(UsageLedger::new(durable.clone(), clock.clone()));
        let candidates = Arc::new(DomainCredentialCache::new(
            matcher.clone(),
            directory.clone(),
            org_keys.clone(),
            api.clone(),
            crypto.clone(),
            usage.clone(),
            clock.clone(),
            config.cache.domain_ttl_ms,
        ));
        let writer = Arc::new(CredentialWriter::new(
            api.clone(),
            crypto.clone(),
            directory.clone(),
            org_keys.clone(),
            matcher.clone(),
            candidates.clone(),
        ));
        let pending_saves = PendingSaveRegistry::new(
            matcher.clone(),
            candidates.clone(),
            writer.clone(),
            clock.clone(),
            config.pending.save_ttl_secs * 1000,
        );
        let pending_totp = PendingTotpRegistry::new(
            matcher.clone(),
            clock.clone(),
            config.pending.totp_ttl_secs * 1000,
        );
        let tracker = FormSubmissionTracker::new(
            clock.clone(),
            config.tracker.request_ttl_secs * 1000,
            config.tracker.result_ttl_secs * 1000,
        );
        let gate = SecretGate::new(
            session.clone(),
            api,
            crypto,
            org_keys.clone(),
            matcher,
            usage.clone(),
            clock,
            config.gates.secret_cooldown_ms,
        );

        Ok(Arc::new(SessionManager {
            session,
            durable,
            ephemeral,
            directory,
            org_keys,
            candidates,
            usage,
            writer,
            pending_saves,
            pending_totp,
            tracker,
            gate,
        }))
    }
}

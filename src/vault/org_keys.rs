//! 组织密钥解析：用常驻用户密钥解包组织密钥，并按组织 id 缓存明文密钥（仅内存）
//!
//! 写入缓存前在写锁内复核会话纪元；解析期间会话被锁定或登出时放弃结果，返回 NoAuth。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::{SessionHandle, VaultError};
use crate::crypto::{SymmetricKey, VaultCrypto};
use crate::vault::OrganizationDirectory;

pub struct OrgKeyResolver {
    session: Arc<SessionHandle>,
    directory: Arc<OrganizationDirectory>,
    crypto: Arc<dyn VaultCrypto>,
    /// org_id -> 明文组织密钥；锁定 / 登出时整体清空
    keys: RwLock<HashMap<String, SymmetricKey>>,
}

impl OrgKeyResolver {
    pub fn new(
        session: Arc<SessionHandle>,
        directory: Arc<OrganizationDirectory>,
        crypto: Arc<dyn VaultCrypto>,
    ) -> Self {
        Self {
            session,
            directory,
            crypto,
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, org_id: &str) -> Result<SymmetricKey, VaultError> {
        if let Some(key) = self.keys.read().await.get(org_id) {
            return Ok(key.clone());
        }

        let (user_key, epoch) = self.session.require_user_key_at().await?;

        if self.directory.is_empty().await {
            debug!(org_id, "Organization directory empty, refreshing before key resolve");
            if let Err(e) = self.directory.refresh().await {
                if e.is_auth() {
                    return Err(e);
                }
                warn!(error = %e, "Organization refresh during key resolve failed");
            }
        }

        let org = self
            .directory
            .find(org_id)
            .await
            .ok_or_else(|| VaultError::NoOrg(org_id.to_string()))?;

        let key = self
            .crypto
            .unwrap_key(&org.encrypted_org_key, &user_key)
            .map_err(|e| VaultError::Crypto(format!("unwrap org key {}: {}", org_id, e)))?;

        // 并发解析同一组织时以先写入者为准，保证每个组织只有一把缓存密钥
        let mut keys = self.keys.write().await;
        self.session.ensure_epoch(epoch)?;
        let cached = keys.entry(org_id.to_string()).or_insert(key).clone();
        debug!(org_id, "Organization key cached");
        Ok(cached)
    }

    pub async fn cached_count(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn reset(&self) {
        self.keys.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockVaultApi, Organization};
    use crate::core::SessionState;
    use crate::crypto::AesGcmCrypto;
    use crate::storage::MemoryStore;

    struct Fixture {
        api: Arc<MockVaultApi>,
        session: Arc<SessionHandle>,
        resolver: OrgKeyResolver,
        user_key: SymmetricKey,
        org_key: SymmetricKey,
    }

    async fn fixture() -> Fixture {
        let crypto = AesGcmCrypto::new();
        let user_key = AesGcmCrypto::generate_key();
        let org_key = AesGcmCrypto::generate_key();

        let api = Arc::new(MockVaultApi::new());
        api.add_organization(Organization {
            id: "o1".into(),
            name: "Family".into(),
            encrypted_org_key: crypto.wrap_key(&org_key, &user_key).unwrap(),
            is_default: true,
        });

        let session = Arc::new(SessionHandle::new());
        let directory = Arc::new(OrganizationDirectory::new(
            api.clone(),
            Arc::new(MemoryStore::new()),
        ));
        let resolver = OrgKeyResolver::new(session.clone(), directory, Arc::new(crypto));
        Fixture {
            api,
            session,
            resolver,
            user_key,
            org_key,
        }
    }

    #[tokio::test]
    async fn test_requires_user_key() {
        let f = fixture().await;
        f.session
            .transition(SessionState::Authenticated { user_key: None })
            .await
            .unwrap();
        assert_eq!(f.resolver.resolve("o1").await.unwrap_err(), VaultError::NoUserKey);
    }

    #[tokio::test]
    async fn test_cold_start_refreshes_directory_and_caches() {
        let f = fixture().await;
        f.session
            .transition(SessionState::Authenticated { user_key: Some(f.user_key.clone()) })
            .await
            .unwrap();

        let key = f.resolver.resolve("o1").await.unwrap();
        assert_eq!(key, f.org_key);
        assert_eq!(f.api.list_org_calls(), 1);

        // 命中缓存：不再刷新目录
        f.resolver.resolve("o1").await.unwrap();
        assert_eq!(f.api.list_org_calls(), 1);
        assert_eq!(f.resolver.cached_count().await, 1);

        f.resolver.reset().await;
        assert_eq!(f.resolver.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_key_is_not_cached_across_session_change() {
        let f = fixture().await;
        f.session
            .transition(SessionState::Authenticated { user_key: Some(f.user_key.clone()) })
            .await
            .unwrap();
        f.api.set_latency(std::time::Duration::from_millis(40));

        let resolving = f.resolver.resolve("o1");
        let locking = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            f.session.advance_epoch();
            f.resolver.reset().await;
            f.session.transition(SessionState::Locked).await.unwrap();
        };
        let (result, _) = tokio::join!(resolving, locking);

        assert_eq!(result.unwrap_err(), VaultError::NoAuth);
        assert_eq!(f.resolver.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_org() {
        let f = fixture().await;
        f.session
            .transition(SessionState::Authenticated { user_key: Some(f.user_key.clone()) })
            .await
            .unwrap();
        assert_eq!(
            f.resolver.resolve("missing").await.unwrap_err(),
            VaultError::NoOrg("missing".into())
        );
    }

    #[tokio::test]
    async fn test_wrong_user_key_is_crypto_error() {
        let f = fixture().await;
        f.session
            .transition(SessionState::Authenticated { user_key: Some(AesGcmCrypto::generate_key()) })
            .await
            .unwrap();
        assert_eq!(f.resolver.resolve("o1").await.unwrap_err().code(), "CRYPTO_ERROR");
    }
}

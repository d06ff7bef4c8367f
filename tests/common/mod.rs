//! 集成测试共用夹具：Mock 条目服务 + 真实 AES-GCM + 手动时钟 + 内存存储

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use passgate::api::{ItemType, MockVaultApi, Organization, VaultItem};
use passgate::config::AppConfig;
use passgate::core::{ManualClock, SessionBuilder};
use passgate::crypto::{AesGcmCrypto, CryptoError, SymmetricKey, VaultCrypto};
use passgate::session::SessionManager;
use passgate::storage::{MemoryStore, USER_KEY};
use passgate::vault::ItemPayload;

/// 统计解密次数的加密包装
#[derive(Default)]
pub struct CountingCrypto {
    inner: AesGcmCrypto,
    decrypts: AtomicUsize,
    unwraps: AtomicUsize,
}

impl CountingCrypto {
    pub fn decrypt_calls(&self) -> usize {
        self.decrypts.load(Ordering::SeqCst)
    }

    pub fn unwrap_calls(&self) -> usize {
        self.unwraps.load(Ordering::SeqCst)
    }
}

impl VaultCrypto for CountingCrypto {
    fn wrap_key(&self, key: &SymmetricKey, wrapping: &SymmetricKey) -> Result<String, CryptoError> {
        self.inner.wrap_key(key, wrapping)
    }

    fn unwrap_key(&self, blob: &str, wrapping: &SymmetricKey) -> Result<SymmetricKey, CryptoError> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        self.inner.unwrap_key(blob, wrapping)
    }

    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<String, CryptoError> {
        self.inner.encrypt(plaintext, key)
    }

    fn decrypt(&self, blob: &str, key: &SymmetricKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        self.inner.decrypt(blob, key)
    }
}

pub struct Fixture {
    pub manager: Arc<SessionManager>,
    pub api: Arc<MockVaultApi>,
    pub crypto: Arc<CountingCrypto>,
    pub durable: Arc<MemoryStore>,
    pub ephemeral: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub user_key: SymmetricKey,
    org_keys: std::sync::Mutex<Vec<(String, SymmetricKey)>>,
}

impl Fixture {
    pub fn new() -> Self {
        let api = Arc::new(MockVaultApi::new());
        let crypto = Arc::new(CountingCrypto::default());
        let durable = Arc::new(MemoryStore::new());
        let ephemeral = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let manager = SessionBuilder::new(AppConfig::default())
            .with_api(api.clone())
            .with_crypto(crypto.clone())
            .with_durable_store(durable.clone())
            .with_ephemeral_store(ephemeral.clone())
            .with_clock(clock.clone())
            .build()
            .unwrap();
        Self {
            manager,
            api,
            crypto,
            durable,
            ephemeral,
            clock,
            user_key: AesGcmCrypto::generate_key(),
            org_keys: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// 登录并等待后台组织刷新完成
    pub async fn sign_in(&self) {
        self.manager
            .sign_in("token-1", self.user_key.clone())
            .await
            .unwrap();
        settle().await;
    }

    pub fn add_org(&self, id: &str, is_default: bool) {
        let org_key = AesGcmCrypto::generate_key();
        let wrapped = AesGcmCrypto::new().wrap_key(&org_key, &self.user_key).unwrap();
        self.api.add_organization(Organization {
            id: id.into(),
            name: format!("Org {}", id),
            encrypted_org_key: wrapped,
            is_default,
        });
        self.org_keys.lock().unwrap().push((id.to_string(), org_key));
    }

    pub fn org_key(&self, org_id: &str) -> SymmetricKey {
        self.org_keys
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == org_id)
            .map(|(_, k)| k.clone())
            .unwrap()
    }

    pub fn add_login(&self, id: &str, org_id: &str, hint: &str, username: &str, password: &str) {
        self.add_login_with(id, org_id, hint, username, password, true);
    }

    pub fn add_login_with(&self, id: &str, org_id: &str, hint: &str, username: &str, password: &str, auto_fill: bool) {
        let payload = ItemPayload {
            title: hint.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            url: format!("https://{}/login", hint),
            totp_secret: None,
        };
        let data = AesGcmCrypto::new()
            .encrypt(&payload.to_plaintext().unwrap(), &self.org_key(org_id))
            .unwrap();
        self.api.add_item(item(id, org_id, hint, &data, auto_fill));
    }

    /// data 无法解密的条目
    pub fn add_corrupt_login(&self, id: &str, org_id: &str, hint: &str) {
        self.api.add_item(item(id, org_id, hint, "bm90LWEtcmVhbC1ibG9i", true));
    }

    /// 用组织密钥解密服务端当前保存的条目载荷
    pub fn open_item(&self, item_id: &str) -> ItemPayload {
        let item = self.api.item(item_id).unwrap();
        let plaintext = AesGcmCrypto::new()
            .decrypt(&item.data, &self.org_key(&item.organization_id))
            .unwrap();
        ItemPayload::from_plaintext(&plaintext).unwrap()
    }

    pub fn encoded_user_key(&self) -> String {
        STANDARD.encode(self.user_key.as_bytes())
    }

    pub async fn has_resident_key(&self) -> bool {
        self.ephemeral.contains(USER_KEY).await
    }
}

fn item(id: &str, org_id: &str, hint: &str, data: &str, auto_fill: bool) -> VaultItem {
    VaultItem {
        id: id.into(),
        organization_id: org_id.into(),
        folder_id: None,
        item_type: ItemType::Login,
        domain_hint: Some(hint.into()),
        data: data.into(),
        auto_fill,
        auto_login: false,
        reprompt: false,
    }
}

/// 让出执行权，使已 spawn 的后台任务跑完
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

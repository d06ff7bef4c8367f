//! 键值存储抽象
//!
//! 持久化存储（访问令牌、组织快照、使用时间戳、PIN 包装的密钥）与会话级临时存储（常驻用户密钥）共用同一接口。
//! 明文密码与明文密钥永远不写入持久化存储。

pub mod file;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::VaultError;

pub use file::JsonFileStore;

/// 持久化：访问令牌
pub const ACCESS_TOKEN: &str = "access_token";
/// 持久化：组织列表快照（仅包含被包装的组织密钥）
pub const ORGANIZATIONS: &str = "organizations";
/// 持久化：条目使用时间戳
pub const ITEM_USAGE: &str = "item_usage";
/// 持久化：PIN 包装的用户密钥（锁定时保留，登出时删除）
pub const PIN_PROTECTED_USER_KEY: &str = "pin_protected_user_key";
/// 持久化：被用户密钥加密的 PIN
pub const PROTECTED_PIN: &str = "protected_pin";
/// 临时：常驻用户密钥
pub const USER_KEY: &str = "user_key";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StorageError> for VaultError {
    fn from(err: StorageError) -> Self {
        VaultError::Storage(err.to_string())
    }
}

/// 键值存储接口
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// 内存存储（测试与会话级临时存储）
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

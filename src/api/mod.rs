//! 条目 / 组织服务协作方
//!
//! VaultApi 抽象 CRUD + 按域名提示过滤的列表查询；实现：HTTP（reqwest）与 Mock（测试）。
//! 传输层的 401/403 统一映射为 AuthExpired，其它失败按场景包装为 Fetch / Save，消息中不含请求头与令牌。

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::VaultError;

pub use http::HttpVaultApi;
pub use mock::MockVaultApi;

/// 服务返回的组织
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    /// 被成员用户密钥包装的组织密钥
    pub encrypted_org_key: String,
    #[serde(default)]
    pub is_default: bool,
}

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    #[default]
    Login,
    SecureNote,
    Card,
    Identity,
}

/// 服务返回的条目（data 为加密后的 ItemPayload JSON）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    pub id: String,
    pub organization_id: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub item_type: ItemType,
    /// 规范域名提示，用于服务端过滤与本地复核
    #[serde(default)]
    pub domain_hint: Option<String>,
    pub data: String,
    #[serde(default = "default_true")]
    pub auto_fill: bool,
    #[serde(default)]
    pub auto_login: bool,
    #[serde(default)]
    pub reprompt: bool,
}

fn default_true() -> bool {
    true
}

/// 创建 / 更新条目的请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub organization_id: String,
    pub folder_id: Option<String>,
    pub item_type: ItemType,
    pub domain_hint: Option<String>,
    pub data: String,
    pub auto_fill: bool,
    pub auto_login: bool,
    pub reprompt: bool,
}

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401 / 403
    #[error("Unauthorized (HTTP {0})")]
    Unauthorized(u16),

    #[error("Not found")]
    NotFound,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ApiError::Unauthorized(status),
            404 => ApiError::NotFound,
            other => ApiError::Status(other),
        }
    }

    /// 读取场景下的错误映射
    pub fn into_fetch_error(self) -> VaultError {
        match self {
            ApiError::Unauthorized(_) => VaultError::AuthExpired,
            ApiError::NotFound => VaultError::NotFound("item".to_string()),
            other => VaultError::Fetch(other.to_string()),
        }
    }

    /// 写入场景下的错误映射
    pub fn into_save_error(self) -> VaultError {
        match self {
            ApiError::Unauthorized(_) => VaultError::AuthExpired,
            ApiError::NotFound => VaultError::NotFound("item".to_string()),
            other => VaultError::Save(other.to_string()),
        }
    }
}

/// 条目 / 组织服务接口
#[async_trait]
pub trait VaultApi: Send + Sync {
    async fn list_organizations(&self) -> Result<Vec<Organization>, ApiError>;

    /// 列出组织内域名提示属于 domains 的条目
    async fn list_items(&self, org_id: &str, domains: &[String]) -> Result<Vec<VaultItem>, ApiError>;

    async fn get_item(&self, item_id: &str) -> Result<VaultItem, ApiError>;

    async fn create_item(&self, item: NewItem) -> Result<VaultItem, ApiError>;

    async fn update_item(&self, item_id: &str, item: NewItem) -> Result<VaultItem, ApiError>;
}

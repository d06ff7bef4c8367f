//! Passgate - 浏览器侧凭据编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话状态机、时钟、构建器
//! - **crypto**: 密钥包装与载荷 AEAD
//! - **domain**: 域名规范化、等价组与黑名单
//! - **api**: 条目 / 组织服务（HTTP 与 Mock）
//! - **storage**: 持久化与临时键值存储
//! - **vault**: 组织目录、组织密钥、域名凭据缓存、使用时间戳、凭据写入
//! - **pending**: 待保存凭据与待保存 TOTP
//! - **tracker**: 表单提交结果追踪
//! - **session**: 会话生命周期与机密披露闸门
//! - **router**: 消息分发

pub mod api;
pub mod config;
pub mod core;
pub mod crypto;
pub mod domain;
pub mod observability;
pub mod pending;
pub mod router;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod vault;

pub use crate::core::{SessionBuilder, VaultError};
pub use crate::router::{MessageRouter, Request, Response};
pub use crate::session::SessionManager;

//! 保险库核心：组织目录、组织密钥解析、域名凭据缓存、使用时间戳、凭据写入
//!
//! 密钥层级：用户密钥 → 组织密钥 → 条目载荷。明文密钥只在内存中缓存，锁定 / 登出时整体清空。

pub mod candidates;
pub mod model;
pub mod org_keys;
pub mod organizations;
pub mod usage;
pub mod writer;

pub use candidates::{Candidates, DomainCredentialCache};
pub use model::{CredentialCandidate, ItemPayload};
pub use org_keys::OrgKeyResolver;
pub use organizations::OrganizationDirectory;
pub use usage::{UsageLedger, UsageStamp};
pub use writer::{CredentialWriter, SaveAction, SaveRequest, SavedItem};

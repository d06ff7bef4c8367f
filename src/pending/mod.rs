//! 待确认暂存区：待保存凭据与待保存 TOTP，按标签页一条，TTL 过期

pub mod save;
pub mod totp;

/// 浏览器标签页 id
pub type TabId = i64;

pub use save::{PendingSave, PendingSaveRegistry, PendingSaveView, SaveCapture, SaveOverrides};
pub use totp::{PendingTotp, PendingTotpRegistry, PendingTotpView, TotpCapture};

//! 编排器错误类型与对外错误响应
//!
//! VaultError 与消息协议中的 errorType 一一对应；调用方据此区分「未登录」「已登录但无结果」「网络暂时失败」。

use serde::Serialize;
use thiserror::Error;

/// 编排器运行过程中可能出现的错误
///
/// 需要 Clone：单飞（single-flight）请求的同一结果会交给所有等待者。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Not authenticated")]
    NoAuth,

    /// 上游返回 401/403，会话在操作中途失效
    #[error("Authentication expired")]
    AuthExpired,

    #[error("No user key resident in this session")]
    NoUserKey,

    #[error("Organization not found: {0}")]
    NoOrg(String),

    #[error("No organizations available")]
    NoOrgs,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No logins found")]
    NoLogins,

    #[error("Rate limited")]
    RateLimited,

    #[error("User gesture required")]
    UserGestureRequired,

    #[error("Domain mismatch")]
    DomainMismatch,

    #[error("Autofill disabled for this item")]
    AutofillDisabled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Save failed: {0}")]
    Save(String),

    #[error("No pending save")]
    NoPendingSave,

    #[error("No tab associated with the request")]
    NoTab,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl VaultError {
    /// 协议中的 errorType
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::NoAuth => "NO_AUTH",
            VaultError::AuthExpired => "AUTH_EXPIRED",
            VaultError::NoUserKey => "NO_USER_KEY",
            VaultError::NoOrg(_) => "NO_ORG",
            VaultError::NoOrgs => "NO_ORGS",
            VaultError::Validation(_) => "VALIDATION_ERROR",
            VaultError::NoLogins => "NO_LOGINS",
            VaultError::RateLimited => "RATE_LIMITED",
            VaultError::UserGestureRequired => "USER_GESTURE_REQUIRED",
            VaultError::DomainMismatch => "DOMAIN_MISMATCH",
            VaultError::AutofillDisabled => "AUTOFILL_DISABLED",
            VaultError::NotFound(_) => "NOT_FOUND",
            VaultError::Fetch(_) => "FETCH_ERROR",
            VaultError::Save(_) => "SAVE_ERROR",
            VaultError::NoPendingSave => "NO_PENDING_SAVE",
            VaultError::NoTab => "NO_TAB",
            VaultError::Storage(_) => "STORAGE_ERROR",
            VaultError::Crypto(_) => "CRYPTO_ERROR",
        }
    }

    /// 协议中的 errorName（变体名）
    pub fn name(&self) -> &'static str {
        match self {
            VaultError::NoAuth => "NoAuth",
            VaultError::AuthExpired => "AuthExpired",
            VaultError::NoUserKey => "NoUserKey",
            VaultError::NoOrg(_) => "NoOrg",
            VaultError::NoOrgs => "NoOrgs",
            VaultError::Validation(_) => "Validation",
            VaultError::NoLogins => "NoLogins",
            VaultError::RateLimited => "RateLimited",
            VaultError::UserGestureRequired => "UserGestureRequired",
            VaultError::DomainMismatch => "DomainMismatch",
            VaultError::AutofillDisabled => "AutofillDisabled",
            VaultError::NotFound(_) => "NotFound",
            VaultError::Fetch(_) => "Fetch",
            VaultError::Save(_) => "Save",
            VaultError::NoPendingSave => "NoPendingSave",
            VaultError::NoTab => "NoTab",
            VaultError::Storage(_) => "Storage",
            VaultError::Crypto(_) => "Crypto",
        }
    }

    /// 是否属于「会话层」错误（未登录 / 过期 / 无用户密钥）
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            VaultError::NoAuth | VaultError::AuthExpired | VaultError::NoUserKey
        )
    }
}

/// 对外的错误响应：`{error, errorType, errorName}`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: String,
    pub error_name: String,
}

impl From<&VaultError> for ErrorResponse {
    fn from(err: &VaultError) -> Self {
        Self {
            error: err.to_string(),
            error_type: err.code().to_string(),
            error_name: err.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_protocol() {
        assert_eq!(VaultError::NoLogins.code(), "NO_LOGINS");
        assert_eq!(VaultError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(VaultError::Fetch("x".into()).code(), "FETCH_ERROR");
        assert_eq!(VaultError::NoOrg("o".into()).code(), "NO_ORG");
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ErrorResponse::from(&VaultError::RateLimited);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["errorType"], "RATE_LIMITED");
        assert_eq!(json["errorName"], "RateLimited");
        assert_eq!(json["error"], "Rate limited");
    }

    #[test]
    fn test_auth_family() {
        assert!(VaultError::AuthExpired.is_auth());
        assert!(VaultError::NoUserKey.is_auth());
        assert!(!VaultError::NoLogins.is_auth());
    }
}

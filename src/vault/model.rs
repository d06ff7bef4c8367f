//! 解密后的条目载荷与对外候选凭据

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::api::ItemType;
use crate::core::VaultError;

/// 条目载荷（VaultItem.data 解密后的 JSON）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
}

impl ItemPayload {
    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self, VaultError> {
        serde_json::from_slice(plaintext)
            .map_err(|e| VaultError::Crypto(format!("malformed item payload: {}", e)))
    }

    pub fn to_plaintext(&self) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        serde_json::to_vec(self)
            .map(Zeroizing::new)
            .map_err(|e| VaultError::Crypto(format!("encode item payload: {}", e)))
    }
}

impl Drop for ItemPayload {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.password.zeroize();
        if let Some(secret) = self.totp_secret.as_mut() {
            secret.zeroize();
        }
    }
}

/// 页面侧检测器看到的候选凭据，永不携带密码
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCandidate {
    pub id: String,
    pub title: String,
    pub username: String,
    pub url: String,
    pub item_type: ItemType,
    pub auto_fill: bool,
    pub auto_login: bool,
    pub source_org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_launched_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tolerates_missing_fields() {
        let payload = ItemPayload::from_plaintext(br#"{"username":"alice"}"#).unwrap();
        assert_eq!(payload.username, "alice");
        assert!(payload.password.is_empty());
        assert!(payload.totp_secret.is_none());
    }

    #[test]
    fn test_candidate_serialization_has_no_password() {
        let candidate = CredentialCandidate {
            id: "i1".into(),
            title: "Bank".into(),
            username: "alice".into(),
            url: "https://bank.com".into(),
            item_type: ItemType::Login,
            auto_fill: true,
            auto_login: false,
            source_org_id: "o1".into(),
            last_used_at: None,
            last_launched_at: Some(5),
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["sourceOrgId"], "o1");
        assert_eq!(json["lastLaunchedAt"], 5);
        assert!(json.get("lastUsedAt").is_none());
    }
}

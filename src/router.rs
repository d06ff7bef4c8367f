//! 消息路由：把 `{type, payload, who}` 请求分发到 SessionManager，错误统一转成 `{error, errorType, errorName}`

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::core::{ErrorResponse, VaultError};
use crate::crypto::SymmetricKey;
use crate::pending::{SaveCapture, SaveOverrides, TabId, TotpCapture};
use crate::session::SessionManager;
use crate::vault::SaveRequest;

/// 请求来源（发送消息的标签页）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Who {
    pub tab_id: Option<TabId>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub who: Who,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(Value),
    Err(ErrorResponse),
}

impl Response {
    pub fn is_err(&self) -> bool {
        matches!(self, Response::Err(_))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInPayload {
    access_token: String,
    user_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlockPayload {
    user_key: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainPayload {
    domain: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillPayload {
    item_id: String,
    #[serde(default)]
    user_gesture: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutofillPayload {
    item_id: String,
    domain: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemPayloadRef {
    item_id: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabPayload {
    tab_id: Option<TabId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormSubmittedPayload {
    request_id: String,
    tab_id: Option<TabId>,
    url: String,
    method: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedirectPayload {
    request_id: String,
    status_code: u16,
    redirect_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletedPayload {
    request_id: String,
    status_code: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailedPayload {
    request_id: String,
    #[serde(default)]
    error: String,
}

pub struct MessageRouter {
    manager: Arc<SessionManager>,
}

impl MessageRouter {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub async fn handle(&self, req: Request) -> Response {
        let kind = req.kind.clone();
        match self.dispatch(req).await {
            Ok(value) => Response::Ok(value),
            Err(e) => {
                debug!(kind = %kind, code = e.code(), "Request failed");
                Response::Err(ErrorResponse::from(&e))
            }
        }
    }

    async fn dispatch(&self, req: Request) -> Result<Value, VaultError> {
        let m = &self.manager;
        let who = req.who;
        let payload = req.payload;
        match req.kind.as_str() {
            "GET_STATUS" => to_value(m.status().await),
            "INIT" => to_value(m.init().await?),
            "SIGN_IN" => {
                let p: SignInPayload = parse(payload)?;
                to_value(m.sign_in(&p.access_token, decode_key(&p.user_key)?).await?)
            }
            "UNLOCK" => {
                let p: UnlockPayload = parse(payload)?;
                to_value(m.unlock(decode_key(&p.user_key)?).await?)
            }
            "LOCK" => to_value(m.lock().await?),
            "LOGOUT" => to_value(m.logout().await?),

            "REQUEST_PASSWORDS" => {
                let p: DomainPayload = parse(payload)?;
                let domain = domain_or_origin(p.domain, &who)?;
                let candidates = m.request_passwords(&domain).await?;
                to_value(&*candidates)
            }
            "GET_FILL_SECRET" => {
                let p: FillPayload = parse(payload)?;
                let tab = tab_of(None, &who)?;
                to_value(m.fill_secret(tab, &p.item_id, p.user_gesture).await?)
            }
            "GET_AUTOFILL_SECRET" => {
                let p: AutofillPayload = parse(payload)?;
                let tab = tab_of(None, &who)?;
                let domain = domain_or_origin(p.domain, &who)?;
                to_value(m.autofill_secret(tab, &p.item_id, &domain).await?)
            }
            "RECORD_ITEM_LAUNCHED" => {
                let p: ItemPayloadRef = parse(payload)?;
                m.record_launched(&p.item_id).await?;
                Ok(json!({ "success": true }))
            }

            "SAVE_CREDENTIALS" => {
                let req: SaveRequest = parse(payload)?;
                let saved = m.save_credentials(req).await?;
                Ok(json!({ "success": true, "data": saved }))
            }
            "SET_PENDING_SAVE" => {
                let mut capture: SaveCapture = parse(payload)?;
                let tab = tab_of(None, &who)?;
                if capture.url.is_none() {
                    capture.url = who.url.clone();
                }
                to_value(m.stage_pending_save(tab, capture).await?)
            }
            "CHECK_PENDING_SAVE" => {
                let tab = tab_of(None, &who)?;
                to_value(m.check_pending_save(tab).await)
            }
            "CONFIRM_PENDING_SAVE" => {
                let overrides: SaveOverrides = parse(payload)?;
                let tab = tab_of(None, &who)?;
                let saved = m.confirm_pending_save(tab, overrides).await?;
                Ok(json!({ "success": true, "data": saved }))
            }
            "DISMISS_PENDING_SAVE" => {
                let tab = tab_of(None, &who)?;
                Ok(json!({ "success": m.dismiss_pending_save(tab).await }))
            }

            "SET_PENDING_TOTP" => {
                let mut capture: TotpCapture = parse(payload)?;
                let tab = tab_of(None, &who)?;
                if capture.domain.is_none() {
                    capture.domain = who.url.clone();
                }
                m.stage_pending_totp(tab, capture).await?;
                Ok(json!({ "success": true }))
            }
            "GET_PENDING_TOTP" => {
                let p: DomainPayload = parse(payload)?;
                let tab = tab_of(None, &who)?;
                let domain = domain_or_origin(p.domain, &who)?;
                to_value(m.get_pending_totp(tab, &domain).await)
            }
            "CLEAR_PENDING_TOTP" => {
                let tab = tab_of(None, &who)?;
                Ok(json!({ "success": m.clear_pending_totp(tab).await }))
            }
            "CONFIRM_PENDING_TOTP" => {
                let p: DomainPayload = parse(payload)?;
                let tab = tab_of(None, &who)?;
                let domain = domain_or_origin(p.domain, &who)?;
                let saved = m.confirm_pending_totp(tab, &domain).await?;
                Ok(json!({ "success": true, "data": saved }))
            }

            "GET_FORM_SUBMISSION_RESULT" => {
                let p: TabPayload = parse(payload)?;
                let tab = tab_of(p.tab_id, &who)?;
                to_value(m.form_submission_result(tab).await)
            }
            "FORM_SUBMITTED" => {
                let p: FormSubmittedPayload = parse(payload)?;
                let tab = tab_of(p.tab_id, &who)?;
                let tracked = m.form_submitted(&p.request_id, tab, &p.url, &p.method).await;
                Ok(json!({ "tracked": tracked }))
            }
            "REQUEST_REDIRECTED" => {
                let p: RedirectPayload = parse(payload)?;
                let matched = m
                    .request_redirected(&p.request_id, p.status_code, &p.redirect_url)
                    .await;
                Ok(json!({ "matched": matched }))
            }
            "REQUEST_COMPLETED" => {
                let p: CompletedPayload = parse(payload)?;
                let matched = m.request_completed(&p.request_id, p.status_code).await;
                Ok(json!({ "matched": matched }))
            }
            "REQUEST_FAILED" => {
                let p: FailedPayload = parse(payload)?;
                let matched = m.request_failed(&p.request_id, &p.error).await;
                Ok(json!({ "matched": matched }))
            }
            "TAB_CLOSED" => {
                let p: TabPayload = parse(payload)?;
                let tab = tab_of(p.tab_id, &who)?;
                m.tab_closed(tab).await;
                Ok(json!({ "success": true }))
            }

            other => Err(VaultError::Validation(format!("unknown message type: {}", other))),
        }
    }
}

/// 空载荷按空对象解析，便于全可选字段的结构体
fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, VaultError> {
    let payload = if payload.is_null() { json!({}) } else { payload };
    serde_json::from_value(payload).map_err(|e| VaultError::Validation(format!("invalid payload: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, VaultError> {
    serde_json::to_value(value).map_err(|e| VaultError::Validation(format!("encode response: {}", e)))
}

fn tab_of(explicit: Option<TabId>, who: &Who) -> Result<TabId, VaultError> {
    explicit.or(who.tab_id).ok_or(VaultError::NoTab)
}

fn domain_or_origin(domain: Option<String>, who: &Who) -> Result<String, VaultError> {
    domain
        .filter(|d| !d.is_empty())
        .or_else(|| who.url.clone())
        .ok_or_else(|| VaultError::Validation("domain is required".to_string()))
}

fn decode_key(encoded: &str) -> Result<SymmetricKey, VaultError> {
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| VaultError::Validation(format!("userKey is not base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(VaultError::Validation("userKey is empty".to_string()));
    }
    Ok(SymmetricKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: Request = serde_json::from_str(r#"{"type":"GET_STATUS"}"#).unwrap();
        assert_eq!(req.kind, "GET_STATUS");
        assert!(req.payload.is_null());
        assert!(req.who.tab_id.is_none());
    }

    #[test]
    fn test_tab_resolution() {
        let who = Who {
            tab_id: Some(3),
            url: None,
        };
        assert_eq!(tab_of(None, &who).unwrap(), 3);
        assert_eq!(tab_of(Some(9), &who).unwrap(), 9);
        assert_eq!(tab_of(None, &Who::default()).unwrap_err(), VaultError::NoTab);
    }

    #[test]
    fn test_error_response_shape() {
        let resp = Response::Err(ErrorResponse::from(&VaultError::NoLogins));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["errorType"], "NO_LOGINS");
        assert!(json["error"].is_string());
        assert!(json["errorName"].is_string());
    }

    #[test]
    fn test_decode_key_rejects_garbage() {
        assert_eq!(decode_key("%%%").unwrap_err().code(), "VALIDATION_ERROR");
        assert_eq!(decode_key("").unwrap_err().code(), "VALIDATION_ERROR");
        assert_eq!(decode_key("AAAA").unwrap().len(), 3);
    }
}

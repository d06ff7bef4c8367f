//! 会话状态机：Uninitialized → {Authenticated, LoggedOut}；Authenticated → Locked；{Authenticated, Locked} → LoggedOut
//!
//! 用带标签的枚举表示会话，用户密钥只能存在于 Authenticated 变体中，避免「已锁定却仍持有密钥」这类非法组合。
//! SessionHandle 由 SessionManager 独占写入；密钥解析与披露闸门只读。
//! 每次迁移与每次清空内存都会推进会话纪元（epoch），跨越 await 的读者在提交结果前据此确认会话未变。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::core::VaultError;
use crate::crypto::SymmetricKey;

/// 会话状态（带数据）
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    /// 旧会话可能没有常驻用户密钥
    Authenticated { user_key: Option<SymmetricKey> },
    Locked,
    LoggedOut,
}

/// 会话阶段（对外投影，不含密钥）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Uninitialized,
    Authenticated,
    Locked,
    LoggedOut,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Uninitialized => SessionPhase::Uninitialized,
            SessionState::Authenticated { .. } => SessionPhase::Authenticated,
            SessionState::Locked => SessionPhase::Locked,
            SessionState::LoggedOut => SessionPhase::LoggedOut,
        }
    }
}

fn transition_allowed(from: SessionPhase, to: SessionPhase) -> bool {
    use SessionPhase::*;
    matches!(
        (from, to),
        (Uninitialized, Authenticated)
            | (Uninitialized, LoggedOut)
            | (Authenticated, Authenticated)
            | (Authenticated, Locked)
            | (Authenticated, LoggedOut)
            | (Locked, Authenticated)
            | (Locked, LoggedOut)
            | (LoggedOut, Authenticated)
            | (LoggedOut, LoggedOut)
    )
}

/// 会话状态句柄
#[derive(Debug, Default)]
pub struct SessionHandle {
    state: RwLock<SessionState>,
    epoch: AtomicU64,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.read().await.phase()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.phase().await == SessionPhase::Authenticated
    }

    /// 当前常驻的用户密钥（仅 Authenticated 时可能存在）
    pub async fn user_key(&self) -> Option<SymmetricKey> {
        match &*self.state.read().await {
            SessionState::Authenticated { user_key } => user_key.clone(),
            _ => None,
        }
    }

    /// 要求已认证；未认证（含 Locked）返回 NoAuth
    pub async fn require_authenticated(&self) -> Result<(), VaultError> {
        if self.is_authenticated().await {
            Ok(())
        } else {
            Err(VaultError::NoAuth)
        }
    }

    /// 要求已认证且有常驻用户密钥
    pub async fn require_user_key(&self) -> Result<SymmetricKey, VaultError> {
        self.require_user_key_at().await.map(|(key, _)| key)
    }

    /// 同 require_user_key，并返回读取时的会话纪元
    pub async fn require_user_key_at(&self) -> Result<(SymmetricKey, u64), VaultError> {
        let state = self.state.read().await;
        match &*state {
            SessionState::Authenticated { user_key: Some(key) } => {
                Ok((key.clone(), self.epoch.load(Ordering::SeqCst)))
            }
            SessionState::Authenticated { user_key: None } => Err(VaultError::NoUserKey),
            _ => Err(VaultError::NoAuth),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// 纪元未变返回 Ok，否则 NoAuth
    pub fn ensure_epoch(&self, epoch: u64) -> Result<(), VaultError> {
        if self.epoch() == epoch {
            Ok(())
        } else {
            Err(VaultError::NoAuth)
        }
    }

    /// 使此前取得的纪元全部失效（清空内存前调用）
    pub(crate) fn advance_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// 受保护的状态迁移，返回迁移前的阶段
    pub(crate) async fn transition(&self, next: SessionState) -> Result<SessionPhase, VaultError> {
        let mut state = self.state.write().await;
        let from = state.phase();
        let to = next.phase();
        if !transition_allowed(from, to) {
            return Err(VaultError::Validation(format!(
                "illegal session transition {:?} -> {:?}",
                from, to
            )));
        }
        tracing::debug!(?from, ?to, "session transition");
        *state = next;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(from)
    }
}

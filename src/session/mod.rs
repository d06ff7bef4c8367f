//! 会话层：生命周期管理与机密披露闸门

pub mod gates;
pub mod manager;

pub use gates::{AutofillSecret, FillSecret, SecretGate};
pub use manager::{SessionManager, SessionStatus};

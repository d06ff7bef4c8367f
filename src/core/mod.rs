//! 核心层：错误类型、会话状态机、时钟、构建器

pub mod builder;
pub mod clock;
pub mod error;
pub mod state;

pub use builder::SessionBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorResponse, VaultError};
pub use state::{SessionHandle, SessionPhase, SessionState};

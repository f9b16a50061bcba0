//! Study-session planning core: the session/task/subtask model, the
//! reconciler that keeps local and remote sessions in one published list, and
//! the cascading session/task/subtask timer.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::app::{App, DesktopApp};
pub use application::auth::{AuthProvider, CredentialAuthProvider};
pub use application::sessions_service::SessionsService;
pub use application::timer_runner::{NoopPlatform, PlatformError, TimerPlatform, TimerRunner};
pub use domain::models::{Session, Subtask, Task};
pub use domain::timer::{AlarmSettings, SessionTimer, TimerPhase, TimerSnapshot, ToggleOutcome};
pub use infrastructure::error::InfraError;

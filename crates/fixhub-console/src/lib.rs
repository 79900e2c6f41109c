//! Operator console for the FIX message-routing hub.
//!
//! Composes the synchronization components behind the credential gate:
//! - `DashboardController`: login/logout, activation and teardown
//! - `AppConfig`: TOML configuration with defaults
//! - `StdinConfirm`: interactive confirmation of destructive actions

pub mod app;
pub mod config;
pub mod confirm;
pub mod error;

pub use app::{ActiveDashboard, DashboardController, DashboardSummary, Phase};
pub use config::AppConfig;
pub use confirm::StdinConfirm;
pub use error::{AppError, AppResult};

//! Credential broker core primitives.
//!
//! Pure, I/O-free building blocks shared by the broker CLI and the
//! authorization service:
//!
//! - [`EnvironmentClass`]: the restricted/standard policy tier
//! - [`DurationPolicy`]: assume-role duration bounds per class
//! - [`role`]: directory group to role ARN mapping, class filtering,
//!   ARN validation and role session names

pub mod class;
pub mod duration;
pub mod humantime_serde;
pub mod role;

pub use class::{ClassTable, EnvironmentClass, ParseClassError};
pub use duration::{DurationError, DurationPolicy, format_duration};

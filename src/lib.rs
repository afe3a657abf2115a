//! Credential Broker Library
//!
//! Turns a browser-based OIDC login into short-lived cloud role credentials.
//!
//! # Components
//!
//! - **Login Engine** ([`oidc`]): authorization code flow with PKCE through a
//!   loopback redirect listener
//! - **Session caches** ([`session`]): identity sessions with refresh, cloud
//!   sessions with resume
//! - **Secure Store** ([`store`]): opaque key → JSON entity persistence
//! - **Console sign-in** ([`console`]): federation sign-in URLs for the web
//!   console
//! - **Authorization Service** ([`authz`]): maps verified identities to the
//!   cloud roles their directory groups grant, and assumes them
//!
//! Environment classes and duration policies live in `broker-core`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod cli;
pub mod config;
pub mod console;
pub mod credential_process;
pub mod error;
pub mod oidc;
pub mod session;
pub mod store;

pub use broker_core::{DurationPolicy, EnvironmentClass};
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging.
///
/// Logs go to stderr so stdout stays machine-readable.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialise logging: {e}")))
}

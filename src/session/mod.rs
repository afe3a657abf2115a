//! Identity and cloud session caches.

mod cloud;
mod identity;
mod status;

pub use cloud::{
    CloudCredentials, CloudProvider, CloudSession, CredentialIssuer, delete_all_cloud_sessions,
    select_role,
};
pub use identity::{IdentityCache, IdentitySession, SessionState};
pub use status::{CloudStatus, IdentityStatus, SessionStatus};

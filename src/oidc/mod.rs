//! OpenID Connect login and identity token verification.
//!
//! - Provider discovery (`/.well-known/openid-configuration`)
//! - Authorization code flow with PKCE (RFC 7636) and CSRF state
//! - Loopback redirect listener
//! - Refresh-token grant
//! - JWKS-backed identity token verification

mod callback;
mod client;
mod discovery;
mod focus;
mod login;
mod pkce;
mod verify;

pub use callback::{CallbackListener, CallbackParams, CodeRedeemer};
pub use client::{OidcClient, TokenResponse};
pub use discovery::{ProviderMetadata, discovery_url, same_issuer};
pub use focus::FocusGuard;
pub use login::{Authenticator, BrowserLauncher, LoginEngine, SystemBrowser};
pub use pkce::{PkcePair, challenge_for, generate_state, state_matches};
pub use verify::{IdentityVerifier, JwksCache, OidcError, OidcVerifier, VerifiedIdentity};

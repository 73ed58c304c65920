//! OAuth 2.0 login for the CLI
//!
//! Implements the authorization-code flow with PKCE (RFC 7636) against the
//! Fabric identity provider.
//!
//! Features:
//! - Authorize URL construction with CSRF `state` and optional PKCE
//! - Local callback server for auth code reception, or long-polling the
//!   provider when the browser cannot reach the CLI
//! - Code, refresh-token and JWT-bearer exchanges
//! - Refresh short-circuit while the access token is still fresh
//! - Tenant listing via `/userinfo`
//! - On-disk credential cache

mod callback;
mod client;
mod flow;
mod storage;

pub use callback::{CALLBACK_PATH, CallbackListener, CallbackParams, CallbackServer};
pub use client::{
    AuthClient, AuthorizeOptions, AuthorizeRequest, REFRESH_GRACE, ResponseType, Tenant, Tokens, select_tenant,
    select_tenant_by_sub,
};
pub use flow::{DEFAULT_LOGIN_TIMEOUT, LoginFlow, LoginMode, LoginOptions, LoginState};
pub use storage::{CredentialCache, default_dir};

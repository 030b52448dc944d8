//! OAuth 2.0 authorization-code login with per-host token storage.

pub mod callback_server;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod storage;
pub mod types;

pub use {
    callback_server::{CallbackServer, LOGIN_TIMEOUT},
    credentials::{
        CredentialManager, HostStatus, LoginOptions, LoginOutcome, LoginPrompt, TokenState,
        normalize_hostname,
    },
    error::AuthError,
    flow::{FlowStage, OAuthFlow},
    storage::TokenStore,
    types::{AccessibleResource, OAuthConfig, OAuthEndpoints, TokenSet},
};

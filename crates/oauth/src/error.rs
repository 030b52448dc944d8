use std::path::PathBuf;

use atl_config::ConfigError;

pub(crate) use atl_api::truncate_body;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to access token file {}: {source}", path.display())]
    TokenIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("token file {} is corrupt: {source}; run `atl auth login` again", path.display())]
    TokenParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("OAuth callback state mismatch; the request did not come from this login attempt")]
    StateMismatch,

    #[error("authorization was denied: {description}")]
    AuthorizationDenied { description: String },

    #[error("OAuth callback did not include an authorization code")]
    MissingCode,

    #[error("token exchange failed (HTTP {status}): {body}")]
    TokenExchangeFailed { status: u16, body: String },

    #[error("token refresh failed (HTTP {status}): {body}; run `atl auth login` again")]
    TokenRefreshFailed { status: u16, body: String },

    #[error("failed to list accessible resources (HTTP {status}): {body}")]
    ResourcesFailed { status: u16, body: String },

    #[error("invalid response from identity provider: {0}")]
    InvalidResponse(#[source] serde_json::Error),

    #[error("no tokens found for {hostname}; run `atl auth login` to re-authenticate")]
    NoRefreshToken { hostname: String },

    #[error("not logged in to {hostname}; run `atl auth login`")]
    NotLoggedIn { hostname: String },

    #[error("the token grants access to no sites; check the OAuth app's permissions")]
    NoAccessibleResources,

    #[error("host {requested} is not accessible with this login (available: {})", available.join(", "))]
    RequestedHostNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("timed out waiting for the browser to complete login; run `atl auth login` again")]
    LoginTimeout,

    #[error(
        "OAuth client credentials are not configured; pass --client-id/--client-secret or set \
         ATL_CLIENT_ID and ATL_CLIENT_SECRET"
    )]
    MissingClientCredentials,

    #[error("could not listen for the OAuth callback on {addr}: {source}")]
    CallbackBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid redirect URI {0}")]
    InvalidRedirectUri(String),

    #[error("invalid OAuth endpoint URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to generate OAuth state: {0}")]
    Entropy(String),

    #[error("this login attempt has already finished; start a new one")]
    FlowFinished,

    #[error("request to identity provider failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Whether the user has to run `login` again to recover.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::NoRefreshToken { .. }
                | Self::NotLoggedIn { .. }
                | Self::TokenRefreshFailed { .. }
                | Self::TokenParse { .. }
        )
    }
}

use {
    chrono::{DateTime, TimeDelta, Utc},
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Tokens are treated as expired this long before their actual expiry.
pub const EXPIRY_BUFFER_SECS: i64 = 5 * 60;

pub const DEFAULT_AUTH_URL: &str = "https://auth.atlassian.com/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://auth.atlassian.com/oauth/token";
pub const DEFAULT_RESOURCES_URL: &str =
    "https://api.atlassian.com/oauth/token/accessible-resources";
pub const DEFAULT_AUDIENCE: &str = "api.atlassian.com";
/// Must match the callback URL registered for the OAuth app.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8085/callback";

pub const DEFAULT_SCOPES: &[&str] = &[
    "read:jira-user",
    "read:jira-work",
    "write:jira-work",
    "read:confluence-content.all",
    "write:confluence-content",
    "read:confluence-space.summary",
    "offline_access",
];

/// Provider endpoints and the registered redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub resources_url: String,
    pub audience: String,
    pub redirect_uri: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            resources_url: DEFAULT_RESOURCES_URL.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
        }
    }
}

/// Everything one login attempt needs to talk to the identity provider.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub endpoints: OAuthEndpoints,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Default endpoints and scopes for the given OAuth app.
    pub fn new(client_id: impl Into<String>, client_secret: Secret<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            endpoints: OAuthEndpoints::default(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Stored credentials for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// A file without this field loads as the Unix epoch, i.e. expired.
    #[serde(default = "unset_expiry")]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn unset_expiry() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl TokenSet {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// True once `now + 5 minutes` reaches `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(EXPIRY_BUFFER_SECS) >= self.expires_at
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// A site the token grants access to, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibleResource {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AccessibleResource {
    /// Host component of the site URL, e.g. `acme.atlassian.net`.
    pub fn hostname(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

//! Login, refresh, and logout across the flow, the callback listener, the
//! token store, and the config file.

use std::time::Duration;

use {
    atl_config::{AppDirs, Config, HostConfig, OAuthAppConfig, save_config},
    chrono::{DateTime, Utc},
    reqwest::Client,
    secrecy::Secret,
    tracing::{debug, info, warn},
};

use crate::{
    callback_server::{CallbackServer, LOGIN_TIMEOUT},
    error::AuthError,
    flow::OAuthFlow,
    storage::TokenStore,
    types::{AccessibleResource, OAuthConfig, OAuthEndpoints, TokenSet},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Caller-facing progress output during login.
pub trait LoginPrompt: Send + Sync {
    /// The URL the user must visit. Always called, even when a browser is
    /// opened automatically.
    fn authorization_url(&self, url: &str);

    fn waiting_for_callback(&self, _redirect_uri: &str) {}
}

#[derive(Debug)]
pub struct LoginOptions {
    /// Site to select among the accessible resources; the first one if unset.
    pub hostname: Option<String>,
    /// Overrides the client id stored in the config file.
    pub client_id: Option<String>,
    /// Overrides the client secret stored in the config file.
    pub client_secret: Option<Secret<String>>,
    /// Overrides the default scopes.
    pub scopes: Option<Vec<String>>,
    pub open_browser: bool,
    pub timeout: Duration,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            hostname: None,
            client_id: None,
            client_secret: None,
            scopes: None,
            open_browser: true,
            timeout: LOGIN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub hostname: String,
    pub cloud_id: String,
    pub scopes: Vec<String>,
}

/// Token state of one host as shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    pub hostname: String,
    pub tokens: TokenState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    Present {
        expires_at: DateTime<Utc>,
        expired: bool,
        has_refresh_token: bool,
        scopes: Vec<String>,
    },
    /// The token file exists but could not be read or parsed.
    Unreadable { reason: String },
}

/// Orchestrates login and token refresh for all hosts under one config root.
pub struct CredentialManager {
    dirs: AppDirs,
    store: TokenStore,
    endpoints: OAuthEndpoints,
    http: Client,
}

impl CredentialManager {
    pub fn new(dirs: AppDirs) -> Result<Self, AuthError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            store: TokenStore::new(&dirs),
            dirs,
            endpoints: OAuthEndpoints::default(),
            http,
        })
    }

    /// Point the manager at different provider endpoints.
    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Build the OAuth app config from explicit overrides, else the config file.
    fn oauth_config(
        &self,
        config: &Config,
        client_id: Option<String>,
        client_secret: Option<Secret<String>>,
        scopes: Option<Vec<String>>,
    ) -> Result<OAuthConfig, AuthError> {
        let app = OAuthAppConfig {
            client_id: client_id.or_else(|| config.oauth.client_id.clone()),
            client_secret: client_secret.or_else(|| config.oauth.client_secret.clone()),
        };
        if !app.is_complete() {
            return Err(AuthError::MissingClientCredentials);
        }
        let (Some(client_id), Some(client_secret)) = (app.client_id, app.client_secret) else {
            return Err(AuthError::MissingClientCredentials);
        };

        let mut oauth = OAuthConfig::new(client_id, client_secret);
        oauth.endpoints = self.endpoints.clone();
        if let Some(scopes) = scopes.filter(|s| !s.is_empty()) {
            oauth.scopes = scopes;
        }
        Ok(oauth)
    }

    /// Run the browser login and persist the result.
    ///
    /// Tokens and host metadata live in separate files; if the second write
    /// fails the login is reported as failed and must be repeated.
    pub async fn login(
        &self,
        config: &mut Config,
        opts: LoginOptions,
        prompt: &dyn LoginPrompt,
    ) -> Result<LoginOutcome, AuthError> {
        let explicit_id = opts.client_id.clone();
        let explicit_secret = opts.client_secret.clone();
        let oauth = self.oauth_config(config, opts.client_id, opts.client_secret, opts.scopes)?;
        let redirect_uri = oauth.endpoints.redirect_uri.clone();

        let mut flow = OAuthFlow::with_client(oauth, self.http.clone())?;
        let mut server = CallbackServer::bind(&redirect_uri, flow.state()).await?;

        let code = match flow.authorization_url() {
            Ok(url) => {
                prompt.authorization_url(&url);
                if opts.open_browser
                    && let Err(e) = open::that(&url)
                {
                    warn!(error = %e, "could not open a browser; visit the URL manually");
                }
                prompt.waiting_for_callback(&redirect_uri);
                server.wait(opts.timeout).await
            },
            Err(e) => Err(e),
        };
        server.shutdown().await;
        let code = code?;

        let tokens = flow.exchange_code(&code).await?;
        let resources = flow.accessible_resources(&tokens.access_token).await?;
        let (hostname, resource) = select_resource(&resources, opts.hostname.as_deref())?;
        info!(%hostname, cloud_id = %resource.id, "selected site");

        self.store.store(&hostname, &tokens)?;

        let default_project = config
            .host(&hostname)
            .and_then(|h| h.default_project.clone());
        config.upsert_host(hostname.clone(), HostConfig {
            cloud_id: resource.id.clone(),
            default_project,
        });
        config.set_current_host(hostname.clone());
        if explicit_id.is_some() {
            config.oauth.client_id = explicit_id;
        }
        if explicit_secret.is_some() {
            config.oauth.client_secret = explicit_secret;
        }
        save_config(&self.dirs, config)?;

        Ok(LoginOutcome {
            hostname,
            cloud_id: resource.id.clone(),
            scopes: tokens.scopes,
        })
    }

    /// Replace the stored tokens for `hostname` using its refresh token.
    pub async fn refresh_access_token(
        &self,
        config: &Config,
        hostname: &str,
    ) -> Result<TokenSet, AuthError> {
        let refresh_token = match self.store.get(hostname)? {
            Some(tokens) if tokens.has_refresh_token() => tokens.refresh_token,
            _ => {
                return Err(AuthError::NoRefreshToken {
                    hostname: hostname.to_string(),
                });
            },
        };

        let oauth = self.oauth_config(config, None, None, None)?;
        let flow = OAuthFlow::with_client(oauth, self.http.clone())?;
        let tokens = flow.refresh_tokens(&refresh_token).await?;
        self.store.store(hostname, &tokens)?;

        info!(hostname, expires_at = %tokens.expires_at, "refreshed access token");
        Ok(tokens)
    }

    /// Stored tokens for `hostname`, refreshed first if inside the expiry
    /// buffer.
    pub async fn valid_token(&self, config: &Config, hostname: &str) -> Result<TokenSet, AuthError> {
        let tokens = self
            .store
            .get(hostname)?
            .ok_or_else(|| AuthError::NotLoggedIn {
                hostname: hostname.to_string(),
            })?;

        if !tokens.is_expired() {
            return Ok(tokens);
        }
        debug!(hostname, expires_at = %tokens.expires_at, "token expired or expiring, refreshing");
        self.refresh_access_token(config, hostname).await
    }

    /// Forget the tokens for `hostname`. Host metadata and aliases are kept.
    pub fn logout(&self, config: &mut Config, hostname: &str) -> Result<(), AuthError> {
        self.store.delete(hostname)?;
        if config.current_host.as_deref() == Some(hostname) {
            config.current_host = None;
            save_config(&self.dirs, config)?;
        }
        info!(hostname, "logged out");
        Ok(())
    }

    /// Token state for every host with a token file. A file that cannot be
    /// read is reported for its host without hiding the others.
    pub fn status(&self) -> Result<Vec<HostStatus>, AuthError> {
        let mut statuses = Vec::new();
        for hostname in self.store.list_hosts()? {
            let tokens = match self.store.get(&hostname) {
                Ok(Some(tokens)) => TokenState::Present {
                    expired: tokens.is_expired(),
                    has_refresh_token: tokens.has_refresh_token(),
                    expires_at: tokens.expires_at,
                    scopes: tokens.scopes,
                },
                Ok(None) => continue,
                Err(e) => {
                    warn!(%hostname, error = %e, "unreadable token file");
                    TokenState::Unreadable {
                        reason: e.to_string(),
                    }
                },
            };
            statuses.push(HostStatus { hostname, tokens });
        }
        Ok(statuses)
    }
}

/// Strip a scheme and trailing slash so `https://acme.atlassian.net/` and
/// `acme.atlassian.net` name the same host.
pub fn normalize_hostname(input: &str) -> String {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme.trim_end_matches('/').to_string()
}

/// Pick the requested site, or the first one when none was requested.
pub fn select_resource<'a>(
    resources: &'a [AccessibleResource],
    requested: Option<&str>,
) -> Result<(String, &'a AccessibleResource), AuthError> {
    if resources.is_empty() {
        return Err(AuthError::NoAccessibleResources);
    }

    let with_hosts: Vec<(String, &AccessibleResource)> = resources
        .iter()
        .filter_map(|r| r.hostname().map(|h| (h, r)))
        .collect();

    match requested {
        Some(requested) => {
            let requested = normalize_hostname(requested);
            with_hosts
                .iter()
                .find(|(host, _)| *host == requested)
                .map(|(host, r)| (host.clone(), *r))
                .ok_or_else(|| AuthError::RequestedHostNotFound {
                    requested,
                    available: with_hosts.iter().map(|(h, _)| h.clone()).collect(),
                })
        },
        None => with_hosts
            .into_iter()
            .next()
            .ok_or(AuthError::NoAccessibleResources),
    }
}

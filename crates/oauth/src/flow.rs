use std::time::Duration;

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    chrono::{TimeDelta, Utc},
    rand::{TryRngCore, rngs::OsRng},
    reqwest::Client,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::{debug, info},
    url::Url,
};

use crate::{
    error::{AuthError, truncate_body},
    types::{AccessibleResource, OAuthConfig, TokenSet},
};

const STATE_BYTES: usize = 32;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a login attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Created,
    AuthorizationUrlIssued,
    Exchanged,
    Failed,
}

impl FlowStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exchanged | Self::Failed)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self) -> TokenSet {
        let expires_in = self.expires_in.unwrap_or(0).max(0);
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or_default(),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: Utc::now() + TimeDelta::seconds(expires_in),
            scopes: self
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// One authorization-code login attempt.
///
/// Holds the app credentials and a single-use state nonce. Nothing here is
/// persisted; a new flow is created for every login.
pub struct OAuthFlow {
    config: OAuthConfig,
    state: String,
    stage: FlowStage,
    http: Client,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Result<Self, AuthError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::with_client(config, http)
    }

    /// Share an existing HTTP client.
    pub fn with_client(config: OAuthConfig, http: Client) -> Result<Self, AuthError> {
        Ok(Self {
            config,
            state: generate_state()?,
            stage: FlowStage::Created,
            http,
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// The nonce the callback must echo back.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    /// Build the URL the user opens in a browser.
    ///
    /// `prompt=consent` forces the consent screen so that a refresh token is
    /// issued on every login, not only the first.
    pub fn authorization_url(&mut self) -> Result<String, AuthError> {
        let endpoints = &self.config.endpoints;
        let mut url = Url::parse(&endpoints.auth_url).map_err(|source| AuthError::InvalidUrl {
            url: endpoints.auth_url.clone(),
            source,
        })?;
        url.query_pairs_mut()
            .append_pair("audience", &endpoints.audience)
            .append_pair("client_id", &self.config.client_id)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("redirect_uri", &endpoints.redirect_uri)
            .append_pair("state", &self.state)
            .append_pair("response_type", "code")
            .append_pair("prompt", "consent");

        if self.stage == FlowStage::Created {
            self.stage = FlowStage::AuthorizationUrlIssued;
        }
        Ok(url.into())
    }

    /// Exchange the authorization code from the callback for tokens.
    pub async fn exchange_code(&mut self, code: &str) -> Result<TokenSet, AuthError> {
        if self.stage.is_terminal() {
            return Err(AuthError::FlowFinished);
        }

        let result = self.request_exchange(code).await;
        self.stage = match &result {
            Ok(_) => FlowStage::Exchanged,
            Err(_) => FlowStage::Failed,
        };
        result
    }

    async fn request_exchange(&self, code: &str) -> Result<TokenSet, AuthError> {
        let endpoints = &self.config.endpoints;
        debug!(token_url = %endpoints.token_url, "exchanging authorization code");

        let response = self
            .http
            .post(&endpoints.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret().as_str()),
                ("code", code),
                ("redirect_uri", endpoints.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::TokenExchangeFailed {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(AuthError::InvalidResponse)?;
        let tokens = parsed.into_token_set();
        info!(expires_at = %tokens.expires_at, scopes = tokens.scopes.len(), "obtained tokens");
        Ok(tokens)
    }

    /// Trade a refresh token for a complete replacement token set.
    ///
    /// Nothing is carried over from the previous set: a response without a
    /// `refresh_token` yields a set that cannot be refreshed again.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let token_url = &self.config.endpoints.token_url;
        debug!(%token_url, "refreshing access token");

        let response = self
            .http
            .post(token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret().as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::TokenRefreshFailed {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(AuthError::InvalidResponse)?;
        Ok(parsed.into_token_set())
    }

    /// List the sites the access token can reach.
    pub async fn accessible_resources(
        &self,
        access_token: &str,
    ) -> Result<Vec<AccessibleResource>, AuthError> {
        let response = self
            .http
            .get(&self.config.endpoints.resources_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::ResourcesFailed {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(AuthError::InvalidResponse)
    }
}

fn generate_state() -> Result<String, AuthError> {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, secrecy::Secret, std::collections::HashMap};

    fn config_for(server_url: &str) -> OAuthConfig {
        let mut config = OAuthConfig::new("client-abc", Secret::new("secret-xyz".to_string()));
        config.endpoints.token_url = format!("{server_url}/oauth/token");
        config.endpoints.resources_url = format!("{server_url}/oauth/token/accessible-resources");
        config.scopes = vec!["read:jira-work".into(), "offline_access".into()];
        config
    }

    #[test]
    fn test_state_is_random_and_url_safe() {
        let a = OAuthFlow::new(config_for("http://localhost")).unwrap();
        let b = OAuthFlow::new(config_for("http://localhost")).unwrap();
        assert_ne!(a.state(), b.state());
        assert_eq!(a.state().len(), 43);
        assert!(
            a.state()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_authorization_url_params() {
        let mut flow = OAuthFlow::new(config_for("http://localhost")).unwrap();
        assert_eq!(flow.stage(), FlowStage::Created);

        let url = Url::parse(&flow.authorization_url().unwrap()).unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("auth.atlassian.com"));
        assert_eq!(params["audience"], "api.atlassian.com");
        assert_eq!(params["client_id"], "client-abc");
        assert_eq!(params["scope"], "read:jira-work offline_access");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8085/callback");
        assert_eq!(params["state"], flow.state());
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(flow.stage(), FlowStage::AuthorizationUrlIssued);
    }

    #[test]
    fn test_authorization_url_is_deterministic() {
        let mut flow = OAuthFlow::new(config_for("http://localhost")).unwrap();
        assert_eq!(
            flow.authorization_url().unwrap(),
            flow.authorization_url().unwrap()
        );
    }

    #[tokio::test]
    async fn test_exchange_code_parses_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("client_id".into(), "client-abc".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret-xyz".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://127.0.0.1:8085/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at","refresh_token":"rt","token_type":"Bearer",
                    "expires_in":3600,"scope":"read:jira-work offline_access"}"#,
            )
            .create_async()
            .await;

        let mut flow = OAuthFlow::new(config_for(&server.url())).unwrap();
        let before = Utc::now();
        let tokens = flow.exchange_code("the-code").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token, "rt");
        assert_eq!(tokens.scopes, vec!["read:jira-work", "offline_access"]);
        assert!(tokens.expires_at >= before + TimeDelta::seconds(3600));
        assert!(tokens.expires_at <= Utc::now() + TimeDelta::seconds(3600));
        assert_eq!(flow.stage(), FlowStage::Exchanged);

        let err = flow.exchange_code("the-code").await.unwrap_err();
        assert!(matches!(err, AuthError::FlowFinished));
    }

    #[tokio::test]
    async fn test_exchange_code_non_2xx() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(403)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let mut flow = OAuthFlow::new(config_for(&server.url())).unwrap();
        let err = flow.exchange_code("bad").await.unwrap_err();
        match err {
            AuthError::TokenExchangeFailed { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("invalid_grant"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(flow.stage(), FlowStage::Failed);
    }

    #[tokio::test]
    async fn test_resources_error_body_is_truncated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/oauth/token/accessible-resources")
            .with_status(500)
            .with_body("x".repeat(2000))
            .create_async()
            .await;

        let flow = OAuthFlow::new(config_for(&server.url())).unwrap();
        match flow.accessible_resources("at").await.unwrap_err() {
            AuthError::ResourcesFailed { status, body } => {
                assert_eq!(status, 500);
                assert!(body.len() < 2000);
                assert!(body.ends_with("(truncated, 2000 total bytes)"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_replaces_token_set_wholesale() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old-rt".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"new-at","expires_in":60}"#)
            .create_async()
            .await;

        let flow = OAuthFlow::new(config_for(&server.url())).unwrap();
        let tokens = flow.refresh_tokens("old-rt").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token, "new-at");
        assert!(tokens.refresh_token.is_empty());
        assert!(!tokens.has_refresh_token());
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.scopes.is_empty());
        assert!(tokens.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_non_2xx() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let flow = OAuthFlow::new(config_for(&server.url())).unwrap();
        let err = flow.refresh_tokens("rt").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRefreshFailed { status: 401, .. }));
        assert!(err.requires_login());
    }

    #[tokio::test]
    async fn test_accessible_resources_sends_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/oauth/token/accessible-resources")
            .match_header("authorization", "Bearer at")
            .with_status(200)
            .with_body(
                r#"[{"id":"c1","url":"https://acme.atlassian.net","name":"acme","scopes":[]}]"#,
            )
            .create_async()
            .await;

        let flow = OAuthFlow::new(config_for(&server.url())).unwrap();
        let resources = flow.accessible_resources("at").await.unwrap();

        mock.assert_async().await;
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, "c1");
        assert_eq!(resources[0].hostname().as_deref(), Some("acme.atlassian.net"));
    }
}

//! API client for Atlassian Cloud REST APIs.
//!
//! One `ApiClient` per authenticated host. Helpers send JSON bodies and
//! decode JSON responses into caller-supplied types.

use std::time::Duration;

use {
    reqwest::{Client, Method, header},
    secrecy::{ExposeSecret, Secret},
    serde::{Serialize, de::DeserializeOwned},
    tracing::debug,
    url::Url,
};

use crate::{
    error::ApiError,
    pagination::{CursorPage, cursor_from_link},
};

/// Gateway for OAuth-authenticated requests.
pub const API_GATEWAY_URL: &str = "https://api.atlassian.com";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Which product API a client talks to through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    Jira,
    Confluence,
}

impl Product {
    fn path_segment(self) -> &'static str {
        match self {
            Product::Jira => "jira",
            Product::Confluence => "confluence",
        }
    }
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Secret<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Client for an arbitrary base URL.
    pub fn new(base_url: &str, access_token: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Secret::new(access_token.into()),
        })
    }

    /// Client for one site's product API, e.g.
    /// `https://api.atlassian.com/ex/jira/<cloud_id>`.
    pub fn for_site(
        product: Product,
        cloud_id: &str,
        access_token: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let base = format!("{API_GATEWAY_URL}/ex/{}/{cloud_id}", product.path_segment());
        Self::new(&base, access_token)
    }

    /// Same connection pool, different token.
    pub fn with_token(&self, access_token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Secret::new(access_token.into()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|source| ApiError::Url { url: raw, source })
    }

    /// Issue a request and decode a 2xx JSON response into `T`.
    ///
    /// An empty response body decodes as JSON `null`, so `()` and
    /// `Option<_>` work for endpoints that return nothing.
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        debug!(%method, %url, "api request");

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
            .header(header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "api request failed");
            return Err(ApiError::from_status(
                status,
                &String::from_utf8_lossy(&bytes),
            ));
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        self.request::<(), T>(Method::GET, path, query, None).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<(), T>(Method::DELETE, path, &[], None).await
    }

    /// Fetch one page, passing `cursor` through verbatim.
    pub async fn fetch_page<P: CursorPage>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cursor: Option<&str>,
    ) -> Result<P, ApiError> {
        let mut params = query.to_vec();
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        self.get(path, &params).await
    }

    /// Follow `next` links until the last page and return every item.
    pub async fn fetch_all<P: CursorPage>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<P::Item>, ApiError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page: P = self.fetch_page(path, query, cursor.as_deref()).await?;
            pages += 1;
            let next = page.next_link().and_then(cursor_from_link);
            items.extend(page.into_items());

            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        debug!(path, pages, items = items.len(), "fetched all pages");
        Ok(items)
    }
}

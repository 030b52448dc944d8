use {
    anyhow::{Context, Result, bail},
    atl_api::{ApiClient, ApiError, Method, Page, Product},
    atl_config::{AppDirs, load_config},
    atl_oauth::CredentialManager,
    clap::{Args, ValueEnum},
    serde_json::Value,
    tracing::info,
};

use crate::auth_commands::target_host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProductArg {
    Jira,
    Confluence,
}

impl From<ProductArg> for Product {
    fn from(p: ProductArg) -> Self {
        match p {
            ProductArg::Jira => Product::Jira,
            ProductArg::Confluence => Product::Confluence,
        }
    }
}

#[derive(Debug, Args)]
pub struct ApiArgs {
    /// Path relative to the product API root, e.g. `rest/api/3/myself`.
    pub path: String,
    #[arg(short = 'X', long, value_enum, default_value_t = HttpMethod::Get)]
    pub method: HttpMethod,
    #[arg(long, value_enum, default_value_t = ProductArg::Jira)]
    pub product: ProductArg,
    /// JSON request body.
    #[arg(short, long)]
    pub data: Option<String>,
    /// Query parameter as key=value; repeatable.
    #[arg(short = 'q', long = "query", value_parser = parse_query_param)]
    pub query: Vec<(String, String)>,
    /// Follow cursor pagination and print every result as one array.
    #[arg(long, default_value_t = false)]
    pub paginate: bool,
    /// Hostname or alias; defaults to the current host.
    #[arg(long)]
    pub hostname: Option<String>,
}

fn parse_query_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

pub async fn handle_api(args: ApiArgs, dirs: AppDirs) -> Result<()> {
    if args.paginate && args.method != HttpMethod::Get {
        bail!("--paginate only applies to GET requests");
    }
    let body: Option<Value> = args
        .data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--data is not valid JSON")?;

    let config = load_config(&dirs)?;
    let host = target_host(&config, args.hostname.as_deref())?;
    let cloud_id = config
        .host(&host)
        .map(|h| h.cloud_id.clone())
        .with_context(|| format!("no site metadata for {host}; run `atl auth login`"))?;

    let manager = CredentialManager::new(dirs)?;
    let tokens = match manager.valid_token(&config, &host).await {
        Ok(tokens) => tokens,
        Err(e) if e.requires_login() => {
            return Err(anyhow::Error::new(e).context(format!("not authenticated for {host}")));
        },
        Err(e) => return Err(e.into()),
    };
    let client = ApiClient::for_site(args.product.into(), &cloud_id, tokens.access_token)?;

    let result = match send(&client, &args, body.as_ref()).await {
        Err(e) if e.is_unauthorized() && args.method == HttpMethod::Get => {
            info!(%host, "request rejected with 401, refreshing token and retrying once");
            let tokens = manager.refresh_access_token(&config, &host).await?;
            send(&client.with_token(tokens.access_token), &args, body.as_ref()).await
        },
        other => other,
    };

    match result? {
        Value::Null => {},
        value => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}

async fn send(client: &ApiClient, args: &ApiArgs, body: Option<&Value>) -> Result<Value, ApiError> {
    let query: Vec<(&str, &str)> = args
        .query
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    if args.paginate {
        return client
            .fetch_all::<Page<Value>>(&args.path, &query)
            .await
            .map(Value::Array);
    }
    let method = match args.method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    };
    client.request(method, &args.path, &query, body).await
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ApiArgs,
    }

    #[test]
    fn test_parse_query_param() {
        assert_eq!(
            parse_query_param("jql=project = ENG").unwrap(),
            ("jql".to_string(), "project = ENG".to_string())
        );
        assert!(parse_query_param("novalue").is_err());
        assert!(parse_query_param("=x").is_err());
    }

    #[test]
    fn test_api_args_defaults() {
        let h = Harness::try_parse_from(["api", "rest/api/3/myself"]).unwrap();
        assert_eq!(h.args.method, HttpMethod::Get);
        assert_eq!(h.args.product, ProductArg::Jira);
        assert!(!h.args.paginate);
        assert!(h.args.query.is_empty());
    }

    #[test]
    fn test_api_args_full() {
        let h = Harness::try_parse_from([
            "api",
            "wiki/api/v2/pages",
            "--product",
            "confluence",
            "-q",
            "limit=50",
            "--paginate",
            "--hostname",
            "work",
        ])
        .unwrap();
        assert_eq!(Product::from(h.args.product), Product::Confluence);
        assert_eq!(h.args.query, vec![("limit".to_string(), "50".to_string())]);
        assert!(h.args.paginate);
        assert_eq!(h.args.hostname.as_deref(), Some("work"));
    }

    #[tokio::test]
    async fn test_paginate_rejected_for_post() {
        let tmp = tempfile::tempdir().unwrap();
        let h = Harness::try_parse_from(["api", "x", "-X", "post", "--paginate"]).unwrap();
        let err = handle_api(h.args, AppDirs::at(tmp.path())).await.unwrap_err();
        assert!(err.to_string().contains("--paginate"));
    }
}

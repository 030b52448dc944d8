use {
    anyhow::{Context, Result, bail},
    atl_config::{AppDirs, Config, load_config, save_config},
    atl_oauth::{CredentialManager, LoginOptions, LoginPrompt, TokenState, normalize_hostname},
    chrono::{DateTime, Utc},
    clap::Subcommand,
    secrecy::Secret,
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in to an Atlassian Cloud site through the browser.
    Login {
        /// Site to select when the account can access several
        /// (e.g. acme.atlassian.net). Defaults to the first one.
        #[arg(long)]
        hostname: Option<String>,
        /// OAuth app client id. Saved to the config file on success.
        #[arg(long, env = "ATL_CLIENT_ID")]
        client_id: Option<String>,
        /// OAuth app client secret. Saved to the config file on success.
        #[arg(long, env = "ATL_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
        /// Scopes to request, replacing the defaults.
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
        /// Print the authorization URL instead of opening a browser.
        #[arg(long, default_value_t = false)]
        no_browser: bool,
    },
    /// Exchange the refresh token for a new access token.
    Refresh {
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Remove stored tokens for a host.
    Logout {
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Show token state for every authenticated host.
    Status,
    /// Make another authenticated host the current one.
    Switch {
        /// Hostname or alias.
        hostname: String,
    },
}

pub async fn handle_auth(action: AuthAction, dirs: AppDirs) -> Result<()> {
    let manager = CredentialManager::new(dirs.clone())?;
    match action {
        AuthAction::Login {
            hostname,
            client_id,
            client_secret,
            scopes,
            no_browser,
        } => {
            let opts = LoginOptions {
                hostname,
                client_id,
                client_secret: client_secret.map(Secret::new),
                scopes: (!scopes.is_empty()).then_some(scopes),
                open_browser: !no_browser,
                ..LoginOptions::default()
            };
            login(&manager, &dirs, opts).await
        },
        AuthAction::Refresh { hostname } => refresh(&manager, &dirs, hostname.as_deref()).await,
        AuthAction::Logout { hostname } => logout(&manager, &dirs, hostname.as_deref()),
        AuthAction::Status => status(&manager, &dirs),
        AuthAction::Switch { hostname } => switch(&manager, &dirs, &hostname),
    }
}

struct TerminalPrompt {
    open_browser: bool,
}

impl LoginPrompt for TerminalPrompt {
    fn authorization_url(&self, url: &str) {
        if self.open_browser {
            println!("Opening browser for authentication...");
            println!("If it does not open, visit:\n{url}");
        } else {
            println!("Visit this URL to authenticate:\n{url}");
        }
    }

    fn waiting_for_callback(&self, redirect_uri: &str) {
        println!("Waiting for callback on {redirect_uri} ...");
    }
}

async fn login(manager: &CredentialManager, dirs: &AppDirs, opts: LoginOptions) -> Result<()> {
    let mut config = load_config(dirs)?;
    let prompt = TerminalPrompt {
        open_browser: opts.open_browser,
    };
    let outcome = manager
        .login(&mut config, opts, &prompt)
        .await
        .context("login failed")?;

    println!("Logged in to {} (cloud id {})", outcome.hostname, outcome.cloud_id);
    if !outcome.scopes.is_empty() {
        println!("Scopes: {}", outcome.scopes.join(" "));
    }
    Ok(())
}

/// The requested host (alias-resolved), else the current host.
pub fn target_host(config: &Config, requested: Option<&str>) -> Result<String> {
    let requested = requested.map(normalize_hostname);
    match config.target_host(requested.as_deref()) {
        Some(host) => Ok(host),
        None => bail!("no host selected; pass --hostname or run `atl auth login`"),
    }
}

async fn refresh(manager: &CredentialManager, dirs: &AppDirs, hostname: Option<&str>) -> Result<()> {
    let config = load_config(dirs)?;
    let host = target_host(&config, hostname)?;
    let tokens = manager.refresh_access_token(&config, &host).await?;
    println!(
        "Refreshed token for {host} [{}]",
        describe_expiry(tokens.expires_at, Utc::now())
    );
    Ok(())
}

fn logout(manager: &CredentialManager, dirs: &AppDirs, hostname: Option<&str>) -> Result<()> {
    let mut config = load_config(dirs)?;
    let host = target_host(&config, hostname)?;
    manager.logout(&mut config, &host)?;
    println!("Logged out from {host}");
    Ok(())
}

fn status(manager: &CredentialManager, dirs: &AppDirs) -> Result<()> {
    let config = load_config(dirs)?;
    let hosts = manager.status()?;
    if hosts.is_empty() {
        println!("Not logged in to any host. Run `atl auth login`.");
        return Ok(());
    }

    let now = Utc::now();
    for host in hosts {
        let marker = if config.current_host.as_deref() == Some(host.hostname.as_str()) {
            "*"
        } else {
            " "
        };
        match host.tokens {
            TokenState::Present {
                expires_at,
                has_refresh_token,
                scopes,
                ..
            } => {
                let refresh = if has_refresh_token {
                    ""
                } else {
                    ", no refresh token"
                };
                println!(
                    "{marker} {} [{}{refresh}]",
                    host.hostname,
                    describe_expiry(expires_at, now)
                );
                if !scopes.is_empty() {
                    println!("    scopes: {}", scopes.join(" "));
                }
            },
            TokenState::Unreadable { reason } => {
                println!("{marker} {} [unreadable: {reason}]", host.hostname);
            },
        }
    }
    Ok(())
}

fn switch(manager: &CredentialManager, dirs: &AppDirs, requested: &str) -> Result<()> {
    let mut config = load_config(dirs)?;
    let host = config.resolve_host(&normalize_hostname(requested));
    if manager.store().get(&host)?.is_none() {
        bail!("not logged in to {host}; run `atl auth login --hostname {host}`");
    }
    config.set_current_host(host.clone());
    save_config(dirs, &config)?;
    println!("Switched to {host}");
    Ok(())
}

/// Human-readable token lifetime.
fn describe_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if expires_at <= now {
        return "expired".to_string();
    }
    let remaining = (expires_at - now).num_seconds();
    let hours = remaining / 3600;
    let mins = (remaining % 3600) / 60;
    format!("valid ({hours}h {mins}m remaining)")
}

#[cfg(test)]
mod tests {
    use {super::*, atl_oauth::TokenSet, chrono::Duration};

    #[test]
    fn test_describe_expiry() {
        let now = Utc::now();
        assert_eq!(describe_expiry(now - Duration::seconds(1), now), "expired");
        assert_eq!(
            describe_expiry(now + Duration::seconds(2 * 3600 + 5 * 60 + 10), now),
            "valid (2h 5m remaining)"
        );
    }

    #[test]
    fn test_target_host_prefers_requested_and_resolves_alias() {
        let mut config = Config::default();
        config
            .aliases
            .insert("work".into(), "acme.atlassian.net".into());
        config.set_current_host("other.atlassian.net");

        assert_eq!(
            target_host(&config, Some("work")).unwrap(),
            "acme.atlassian.net"
        );
        assert_eq!(
            target_host(&config, Some("https://x.atlassian.net/")).unwrap(),
            "x.atlassian.net"
        );
        assert_eq!(target_host(&config, None).unwrap(), "other.atlassian.net");
        assert!(target_host(&Config::default(), None).is_err());
    }

    #[test]
    fn test_switch_requires_stored_tokens() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::at(tmp.path());
        let manager = CredentialManager::new(dirs.clone()).unwrap();

        assert!(switch(&manager, &dirs, "acme.atlassian.net").is_err());
        assert!(load_config(&dirs).unwrap().current_host.is_none());

        manager
            .store()
            .store("acme.atlassian.net", &TokenSet {
                access_token: "a".into(),
                refresh_token: "r".into(),
                token_type: "Bearer".into(),
                expires_at: Utc::now() + Duration::hours(1),
                scopes: vec![],
            })
            .unwrap();
        switch(&manager, &dirs, "https://acme.atlassian.net").unwrap();
        assert_eq!(
            load_config(&dirs).unwrap().current_host.as_deref(),
            Some("acme.atlassian.net")
        );
    }
}

use std::collections::BTreeMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

pub const CONFIG_VERSION: u32 = 1;

// ── Config document ─────────────────────────────────────────────────────────

/// The `config.yml` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_host: Option<String>,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub oauth: OAuthAppConfig,
    #[serde(default)]
    pub preferences: Preferences,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            current_host: None,
            hosts: BTreeMap::new(),
            aliases: BTreeMap::new(),
            oauth: OAuthAppConfig::default(),
            preferences: Preferences::default(),
        }
    }
}

impl Config {
    pub fn host(&self, hostname: &str) -> Option<&HostConfig> {
        self.hosts.get(hostname)
    }

    /// Insert or replace the metadata for `hostname`.
    pub fn upsert_host(&mut self, hostname: impl Into<String>, host: HostConfig) {
        self.hosts.insert(hostname.into(), host);
    }

    pub fn set_current_host(&mut self, hostname: impl Into<String>) {
        self.current_host = Some(hostname.into());
    }

    /// Resolve an alias or hostname to a configured hostname.
    ///
    /// An unknown name is returned as-is so that callers can still address a
    /// host that only has a token file.
    pub fn resolve_host(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// The explicitly requested host, else the current host.
    pub fn target_host(&self, requested: Option<&str>) -> Option<String> {
        match requested {
            Some(name) => Some(self.resolve_host(name)),
            None => self.current_host.clone(),
        }
    }
}

// ── Hosts ───────────────────────────────────────────────────────────────────

/// Per-host metadata, keyed by hostname in [`Config::hosts`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub cloud_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_project: Option<String>,
}

// ── OAuth app credentials ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
}

impl OAuthAppConfig {
    pub fn is_complete(&self) -> bool {
        self.client_id.as_deref().is_some_and(|id| !id.is_empty())
            && self
                .client_secret
                .as_ref()
                .is_some_and(|s| !s.expose_secret().is_empty())
    }
}

fn serialize_option_secret<S: Serializer>(
    value: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

// ── Preferences ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pager: Option<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

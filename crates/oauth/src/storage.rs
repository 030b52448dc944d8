use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use {
    atl_config::{
        AppDirs,
        fs::{create_private_dir, write_private},
    },
    tracing::debug,
};

use crate::{error::AuthError, types::TokenSet};

const TOKEN_EXTENSION: &str = "json";

/// Map a hostname to its token file stem.
///
/// Path separators and colons become `_`. Existing token files were written
/// with this exact rule, so it must not change.
pub fn sanitize_hostname(hostname: &str) -> String {
    hostname.replace(['/', '\\', ':'], "_")
}

/// File-based token storage, one JSON file per host.
///
/// There is no locking; concurrent processes writing the same host race and
/// the last write wins.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dirs: &AppDirs) -> Self {
        Self::with_dir(dirs.tokens_dir())
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn token_path(&self, hostname: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{TOKEN_EXTENSION}", sanitize_hostname(hostname)))
    }

    /// Overwrite the tokens for `hostname`.
    pub fn store(&self, hostname: &str, tokens: &TokenSet) -> Result<(), AuthError> {
        create_private_dir(&self.dir).map_err(|source| AuthError::TokenIo {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.token_path(hostname);
        let json = serde_json::to_vec_pretty(tokens).map_err(|source| AuthError::TokenParse {
            path: path.clone(),
            source,
        })?;
        write_private(&path, &json).map_err(|source| AuthError::TokenIo {
            path: path.clone(),
            source,
        })?;

        debug!(hostname, path = %path.display(), "stored tokens");
        Ok(())
    }

    /// Load the tokens for `hostname`. A missing file is `Ok(None)`.
    pub fn get(&self, hostname: &str) -> Result<Option<TokenSet>, AuthError> {
        let path = self.token_path(hostname);
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AuthError::TokenIo { path, source }),
        };
        let tokens = serde_json::from_slice(&data)
            .map_err(|source| AuthError::TokenParse { path, source })?;
        Ok(Some(tokens))
    }

    /// Remove the tokens for `hostname`. Succeeds if there are none.
    pub fn delete(&self, hostname: &str) -> Result<(), AuthError> {
        let path = self.token_path(hostname);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(hostname, "deleted tokens");
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AuthError::TokenIo { path, source }),
        }
    }

    /// Hostnames (as stored, i.e. sanitized) that have a token file, sorted.
    pub fn list_hosts(&self) -> Result<Vec<String>, AuthError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuthError::TokenIo {
                    path: self.dir.clone(),
                    source,
                });
            },
        };

        let mut hosts = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(TOKEN_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                hosts.push(stem.to_string());
            }
        }
        hosts.sort();
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::{TimeDelta, Utc},
        rstest::rstest,
    };

    fn sample_tokens() -> TokenSet {
        TokenSet {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_type: "Bearer".into(),
            expires_at: Utc::now() + TimeDelta::hours(1),
            scopes: vec!["read:jira-work".into(), "offline_access".into()],
        }
    }

    fn temp_store() -> (tempfile::TempDir, TokenStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(&AppDirs::at(tmp.path()));
        (tmp, store)
    }

    #[test]
    fn test_store_then_get() {
        let (_tmp, store) = temp_store();
        let tokens = sample_tokens();
        store.store("h1", &tokens).unwrap();
        let loaded = store.get("h1").unwrap().unwrap();
        assert_eq!(loaded.access_token, tokens.access_token);
        assert_eq!(loaded.refresh_token, tokens.refresh_token);
        assert_eq!(loaded.scopes, tokens.scopes);
        assert_eq!(loaded.expires_at.timestamp(), tokens.expires_at.timestamp());
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_tmp, store) = temp_store();
        assert!(store.get("nobody.atlassian.net").unwrap().is_none());
    }

    #[test]
    fn test_get_corrupt_is_parse_error() {
        let (_tmp, store) = temp_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("broken.json"), "{not json").unwrap();
        let err = store.get("broken").unwrap_err();
        assert!(matches!(err, AuthError::TokenParse { .. }));
    }

    #[test]
    fn test_store_overwrites() {
        let (_tmp, store) = temp_store();
        store.store("h1", &sample_tokens()).unwrap();
        let mut replacement = sample_tokens();
        replacement.access_token = "second".into();
        replacement.scopes = vec![];
        store.store("h1", &replacement).unwrap();
        let loaded = store.get("h1").unwrap().unwrap();
        assert_eq!(loaded.access_token, "second");
        assert!(loaded.scopes.is_empty());
    }

    #[rstest]
    #[case("acme.atlassian.net", "acme.atlassian.net")]
    #[case("localhost:8080", "localhost_8080")]
    #[case("a/b", "a_b")]
    #[case("a\\b", "a_b")]
    #[case("https://x/y:z", "https___x_y_z")]
    fn test_sanitize_hostname(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_hostname(input), expected);
    }

    #[rstest]
    #[case("localhost:8080")]
    #[case("jira.example.com/context")]
    #[case("corp\\jira")]
    fn test_store_get_with_special_chars(#[case] hostname: &str) {
        let (_tmp, store) = temp_store();
        store.store(hostname, &sample_tokens()).unwrap();
        assert!(store.get(hostname).unwrap().is_some());
        assert_eq!(store.list_hosts().unwrap(), vec![sanitize_hostname(hostname)]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_tmp, store) = temp_store();
        store.store("h1", &sample_tokens()).unwrap();
        store.delete("h1").unwrap();
        store.delete("h1").unwrap();
        assert!(store.get("h1").unwrap().is_none());
    }

    #[test]
    fn test_list_hosts_ignores_non_files() {
        let (_tmp, store) = temp_store();
        assert!(store.list_hosts().unwrap().is_empty());

        store.store("b.atlassian.net", &sample_tokens()).unwrap();
        store.store("a.atlassian.net", &sample_tokens()).unwrap();
        std::fs::create_dir_all(store.dir().join("subdir.json")).unwrap();
        std::fs::write(store.dir().join("notes.txt"), "x").unwrap();

        assert_eq!(store.list_hosts().unwrap(), vec![
            "a.atlassian.net".to_string(),
            "b.atlassian.net".to_string(),
        ]);

        store.delete("a.atlassian.net").unwrap();
        assert_eq!(store.list_hosts().unwrap(), vec!["b.atlassian.net".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, store) = temp_store();
        store.store("h1", &sample_tokens()).unwrap();
        let dir_mode = std::fs::metadata(store.dir()).unwrap().permissions().mode();
        let file_mode = std::fs::metadata(store.dir().join("h1.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        assert_eq!(file_mode & 0o777, 0o600);
    }
}

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::error::ConfigError;

/// Environment variable that overrides the configuration root.
pub const CONFIG_DIR_ENV: &str = "ATL_CONFIG_DIR";

const APP_NAME: &str = "atl";
const CONFIG_FILE: &str = "config.yml";
const TOKENS_DIR: &str = "tokens";

/// Filesystem layout of the configuration root.
///
/// ```text
/// <root>/config.yml
/// <root>/tokens/<host>.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    root: PathBuf,
}

impl AppDirs {
    /// Resolve the root from `ATL_CONFIG_DIR`, falling back to the platform
    /// config directory.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(std::env::var_os(CONFIG_DIR_ENV))
    }

    fn resolve_with(override_dir: Option<OsString>) -> Result<Self, ConfigError> {
        if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
            return Ok(Self::at(dir));
        }
        let base = directories::BaseDirs::new().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::at(base.config_dir().join(APP_NAME)))
    }

    /// Use an explicit root directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn tokens_dir(&self) -> PathBuf {
        self.root.join(TOKENS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let dirs = AppDirs::resolve_with(Some(OsString::from("/tmp/atl-test"))).unwrap();
        assert_eq!(dirs.root(), Path::new("/tmp/atl-test"));
        assert_eq!(dirs.config_file(), PathBuf::from("/tmp/atl-test/config.yml"));
        assert_eq!(dirs.tokens_dir(), PathBuf::from("/tmp/atl-test/tokens"));
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let dirs = AppDirs::resolve_with(Some(OsString::new()));
        if let Ok(dirs) = dirs {
            assert!(dirs.root().ends_with(APP_NAME));
        }
    }
}

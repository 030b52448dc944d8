use {
    std::io::ErrorKind,
    tracing::{debug, warn},
};

use crate::{
    dirs::AppDirs,
    error::ConfigError,
    fs::{create_private_dir, write_private},
    schema::{CONFIG_VERSION, Config},
};

/// Load `config.yml` from the configuration root.
///
/// A missing or empty file yields [`Config::default`].
pub fn load_config(dirs: &AppDirs) -> Result<Config, ConfigError> {
    let path = dirs.config_file();
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        },
        Err(source) => return Err(ConfigError::Io { path, source }),
    };

    if contents.trim().is_empty() {
        return Ok(Config::default());
    }

    let config: Config =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

    if config.version > CONFIG_VERSION {
        warn!(
            version = config.version,
            supported = CONFIG_VERSION,
            "config file was written by a newer version"
        );
    }

    Ok(config)
}

/// Write `config.yml`, creating the root directory if needed.
pub fn save_config(dirs: &AppDirs, config: &Config) -> Result<(), ConfigError> {
    let root = dirs.root();
    create_private_dir(root).map_err(|source| ConfigError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let yaml = serde_yaml::to_string(config)?;
    let path = dirs.config_file();
    write_private(&path, yaml.as_bytes()).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    debug!(path = %path.display(), "saved config");
    Ok(())
}

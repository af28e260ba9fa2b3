use crate::geoip::DEFAULT_GEOIP_URL;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("RECON_GEOIP_URL must contain an `{{ip}}` placeholder, got `{0}`")]
    InvalidGeoipUrl(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Run configuration parsed from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// JSON export layout; built-in layout when unset
    pub layout_file: Option<PathBuf>,
    pub geoip_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &'static str, default: &str| -> Result<String, ConfigError> {
            match lookup(key) {
                Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(key)),
                Some(value) => Ok(value),
                None => Ok(default.to_string()),
            }
        };

        let input_dir = PathBuf::from(non_empty("RECON_INPUT_DIR", "input")?);
        let output_dir = PathBuf::from(non_empty("RECON_OUTPUT_DIR", "output")?);

        let layout_file = lookup("RECON_LAYOUT_FILE")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let geoip_url = non_empty("RECON_GEOIP_URL", DEFAULT_GEOIP_URL)?;
        if !geoip_url.contains("{ip}") {
            return Err(ConfigError::InvalidGeoipUrl(geoip_url));
        }

        Ok(Config {
            input_dir,
            output_dir,
            layout_file,
            geoip_url,
        })
    }
}

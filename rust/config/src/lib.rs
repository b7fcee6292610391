use figment::providers::{Env, Format, Yaml};
use serde::de::DeserializeOwned;
use sift_error::{ErrorCodes, SiftError};
use std::path::Path;
use thiserror::Error;

/// Implemented by components that are built from a deserialized config section.
pub trait Configurable<T>: Sized {
    fn try_from_config(config: &T) -> Result<Self, Box<dyn SiftError>>;
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Error loading config: {0}")]
    Extract(#[from] Box<figment::Error>),
}

impl SiftError for ConfigError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Loads `T` from the YAML file at `path` (when it exists), overlaid with
/// environment variables carrying `env_prefix`. Nested fields are addressed with
/// a double underscore, e.g. `SIFT_SEARCH_RESULTS__MAX_LIST_VALUES`.
/// Environment variables take precedence over the file.
pub fn load_config<T: DeserializeOwned>(path: &str, env_prefix: &str) -> Result<T, ConfigError> {
    // figment splits nested keys on '.', so map our '__' separator onto it.
    let mut f = figment::Figment::from(
        Env::prefixed(env_prefix).map(|k| k.as_str().replace("__", ".").into()),
    );
    if Path::new(path).exists() {
        f = figment::Figment::from(Yaml::file(path)).merge(f);
    } else {
        tracing::debug!(path, "Config file not found, using environment only");
    }
    f.extract().map_err(|e| ConfigError::Extract(Box::new(e)))
}

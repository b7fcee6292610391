use serde::{Deserialize, Serialize};
use sift_config::{load_config, ConfigError};

const DEFAULT_CONFIG_PATH: &str = "./sift_config.yaml";
const ENV_PREFIX: &str = "SIFT_";

fn default_max_list_values() -> usize {
    100
}

fn default_bucket_limit() -> usize {
    10_000
}

/// Tunables of the per-query aggregation state.
///
/// - `max_list_values`: cap on the values kept by `list(...)` measures, both for
///   plain and eval forms, and on raw values carried by running column statistics.
/// - `default_bucket_limit`: row limit used when a caller reads buckets without one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultsConfig {
    #[serde(default = "default_max_list_values")]
    pub max_list_values: usize,
    #[serde(default = "default_bucket_limit")]
    pub default_bucket_limit: usize,
}

impl Default for SearchResultsConfig {
    fn default() -> Self {
        Self {
            max_list_values: default_max_list_values(),
            default_bucket_limit: default_bucket_limit(),
        }
    }
}

#[derive(Deserialize)]
struct RootConfig {
    #[serde(default)]
    search_results: SearchResultsConfig,
}

impl SearchResultsConfig {
    /// Loads the `search_results` section from `./sift_config.yaml` and `SIFT_` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        let root: RootConfig = load_config(path, ENV_PREFIX)?;
        Ok(root.search_results)
    }
}

use std::path::Path;
use std::time::Duration;
use std::{error::Error, fmt};

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use once_cell::sync::OnceCell;

pub static CONFIG: OnceCell<Configuration> = OnceCell::new();

/// Default configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "telequery.toml";

/// Prefix for environment overrides, e.g. `TELEQUERY__CACHE__TTL=1h`.
pub const ENV_PREFIX: &str = "TELEQUERY__";

/// Settings for the resource filter compiler
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Seconds subtracted from the start of the window when selecting
    /// resource buckets, to catch late arriving data
    pub bucket_lookback: u64,
    /// Treat filter keys that resolve to nothing as no-ops instead of errors
    pub ignore_not_found_keys: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            bucket_lookback: 1800,
            ignore_not_found_keys: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// How long a stored payload stays valid
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Recent data younger than this is never cached
    #[serde(with = "humantime_serde")]
    pub flux_interval: Duration,
    /// Upper bound on stored payloads; 0 means unbounded
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(168 * 60 * 60),
            flux_interval: Duration::from_secs(5 * 60),
            max_entries: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostProcessConfig {
    /// Step used for formulas whose queries carry no step interval
    #[serde(with = "humantime_serde")]
    pub default_step: Duration,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            default_step: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Filter compilation settings
    pub query: QueryConfig,
    /// Bucket cache settings
    pub cache: CacheConfig,
    /// Result post-processing settings
    pub postprocess: PostProcessConfig,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error")
    }
}

impl Error for Configuration {}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// The loaded process-wide configuration, loading it on first use.
    pub fn global() -> Result<&'static Configuration, Box<figment::Error>> {
        CONFIG.get_or_try_init(Self::load)
    }
}

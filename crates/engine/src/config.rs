use crate::error::ConfigError;
use compiler::validate::DEFAULT_MAX_DEPTH;
use model::selector::environment::Environment;
use std::{collections::HashMap, str::FromStr, time::Duration};

pub const DATABASE_URL: &str = "SELECTOR_DATABASE_URL";
pub const ENVIRONMENT: &str = "SELECTOR_ENVIRONMENT";
pub const CACHE_SECONDS: &str = "SELECTOR_CACHE_SECONDS";
pub const MAX_DEPTH: &str = "SELECTOR_MAX_DEPTH";
pub const REMOVE_UNKNOWN_VARIABLES: &str = "SELECTOR_REMOVE_UNKNOWN_VARIABLES";

const DEFAULT_CACHE_SECONDS: u64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub database_url: Option<String>,

    /// Environment secure selectors are scoped to.
    pub environment: Environment,

    /// Lifetime of compiled queries; zero disables the cache.
    pub cache_ttl: Duration,

    pub max_depth: usize,

    /// Substitution policy for placeholders nothing resolves.
    pub remove_unknown_variables: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_url: None,
            environment: Environment::LIVE,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_SECONDS),
            max_depth: DEFAULT_MAX_DEPTH,
            remove_unknown_variables: false,
        }
    }
}

impl EngineConfig {
    /// Reads the `SELECTOR_*` settings from a variable map, falling back to
    /// defaults for anything unset or empty.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let environment = match get(ENVIRONMENT) {
            Some(raw) => Environment::from_str(raw).map_err(|message| invalid(ENVIRONMENT, message))?,
            None => defaults.environment,
        };
        let cache_ttl = match get(CACHE_SECONDS) {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|e| invalid(CACHE_SECONDS, e.to_string()))?,
            ),
            None => defaults.cache_ttl,
        };
        let max_depth = match get(MAX_DEPTH) {
            Some(raw) => {
                let depth = raw
                    .parse::<usize>()
                    .map_err(|e| invalid(MAX_DEPTH, e.to_string()))?;
                if depth == 0 {
                    return Err(invalid(MAX_DEPTH, "must be at least 1"));
                }
                depth
            }
            None => defaults.max_depth,
        };
        let remove_unknown_variables = match get(REMOVE_UNKNOWN_VARIABLES) {
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                invalid(REMOVE_UNKNOWN_VARIABLES, format!("expected a boolean, got `{raw}`"))
            })?,
            None => defaults.remove_unknown_variables,
        };

        Ok(EngineConfig {
            database_url: get(DATABASE_URL).map(str::to_string),
            environment,
            cache_ttl,
            max_depth,
            remove_unknown_variables,
        })
    }

    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing(DATABASE_URL.to_string()))
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

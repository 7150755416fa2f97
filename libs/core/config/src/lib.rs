pub mod tracing;

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Invalid configuration for '{key}': {details}")]
    Invalid { key: String, details: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, details: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            details: details.into(),
        }
    }
}

/// Application environment (dev = local, prod = deployed)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Load an environment variable, falling back to `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Load an environment variable or return `ConfigError::MissingEnvVar`
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional environment variable.
///
/// Returns `Ok(None)` when the variable is unset and a `ParseError` when it is
/// set to something `T` cannot parse.
pub fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::ParseError {
                key: key.to_string(),
                details: format!("'{}': {}", raw, e),
            }),
        Err(_) => Ok(None),
    }
}

/// Parse an environment variable, using `default` when it is unset
pub fn env_parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(env_parse(key)?.unwrap_or(default))
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn env_bool_or(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ParseError {
            key: key.to_string(),
            details: format!("'{}' is not a boolean", other),
        }),
    }
}

/// Parse a duration expressed in whole seconds
pub fn env_duration_secs_or(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(env_parse::<u64>(key)?
        .map(Duration::from_secs)
        .unwrap_or(default))
}

/// Parse a duration expressed in milliseconds
pub fn env_duration_millis_or(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(env_parse::<u64>(key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("CFG_TEST_VAR", Some("value"), || {
            assert_eq!(env_or_default("CFG_TEST_VAR", "default"), "value");
        });
        temp_env::with_var_unset("CFG_TEST_VAR", || {
            assert_eq!(env_or_default("CFG_TEST_VAR", "default"), "default");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("CFG_MISSING_REQUIRED", || {
            let err = env_required("CFG_MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("CFG_MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_parse_valid_and_unset() {
        temp_env::with_var("CFG_PARSE_NUM", Some(" 42 "), || {
            assert_eq!(env_parse::<u32>("CFG_PARSE_NUM").unwrap(), Some(42));
        });
        temp_env::with_var_unset("CFG_PARSE_NUM", || {
            assert_eq!(env_parse::<u32>("CFG_PARSE_NUM").unwrap(), None);
            assert_eq!(env_parse_or("CFG_PARSE_NUM", 7u32).unwrap(), 7);
        });
    }

    #[test]
    fn test_env_parse_invalid_reports_key() {
        temp_env::with_var("CFG_PARSE_BAD", Some("many"), || {
            let err = env_parse::<u32>("CFG_PARSE_BAD").unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { .. }));
            assert!(err.to_string().contains("CFG_PARSE_BAD"));
        });
    }

    #[test]
    fn test_env_bool_or() {
        temp_env::with_var("CFG_FLAG", Some("off"), || {
            assert!(!env_bool_or("CFG_FLAG", true).unwrap());
        });
        temp_env::with_var("CFG_FLAG", Some("Yes"), || {
            assert!(env_bool_or("CFG_FLAG", false).unwrap());
        });
        temp_env::with_var("CFG_FLAG", Some("maybe"), || {
            assert!(env_bool_or("CFG_FLAG", false).is_err());
        });
        temp_env::with_var_unset("CFG_FLAG", || {
            assert!(env_bool_or("CFG_FLAG", true).unwrap());
        });
    }

    #[test]
    fn test_env_durations() {
        temp_env::with_vars(
            [("CFG_SECS", Some("3")), ("CFG_MILLIS", Some("250"))],
            || {
                assert_eq!(
                    env_duration_secs_or("CFG_SECS", Duration::ZERO).unwrap(),
                    Duration::from_secs(3)
                );
                assert_eq!(
                    env_duration_millis_or("CFG_MILLIS", Duration::ZERO).unwrap(),
                    Duration::from_millis(250)
                );
            },
        );
        temp_env::with_var_unset("CFG_SECS", || {
            assert_eq!(
                env_duration_secs_or("CFG_SECS", Duration::from_secs(9)).unwrap(),
                Duration::from_secs(9)
            );
        });
    }
}

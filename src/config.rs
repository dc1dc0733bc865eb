//! Connection settings using Figment
//!
//! Settings are loaded from:
//! 1. `epoc.toml` (or an explicit file), if present
//! 2. Environment variables prefixed with `EPOC_`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! EPOC_REDIS_HOST=noether
//! EPOC_REDIS_PORT=6379
//! EPOC_REDIS_TOKEN=secret      # the literal value "None" disables authentication
//! EPOC_REDIS_DB=0
//! ```
//!
//! # Example file
//!
//! ```toml
//! [redis]
//! host = "noether"
//! port = 6379
//! db = 0
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{AppResult, EpocError};

/// Default settings file.
pub const DEFAULT_CONFIG_FILE: &str = "epoc.toml";

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Shared backend connection.
    #[serde(default)]
    pub redis: RedisSettings,
}

/// Where the shared configuration database lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Host name or address.
    #[serde(default, deserialize_with = "text")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Password. `None` (or the string "None") disables authentication.
    #[serde(default, deserialize_with = "optional_text")]
    pub token: Option<String>,
    /// Logical database index. Tests must use a different index than production.
    #[serde(default)]
    pub db: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            token: None,
            db: 0,
        }
    }
}

fn default_port() -> u16 {
    6379
}

/// Accepts any scalar as text. Figment types environment values, so a
/// password like `12345` or `true` arrives as a number or bool.
struct TextVisitor;

impl<'de> Visitor<'de> for TextVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, number or bool")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
        Ok(v.to_string())
    }
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    deserializer.deserialize_any(TextVisitor)
}

struct OptionalTextVisitor;

impl<'de> Visitor<'de> for OptionalTextVisitor {
    type Value = Option<String>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an optional string, number or bool")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        text(deserializer).map(Some)
    }
}

fn optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    deserializer.deserialize_option(OptionalTextVisitor)
}

impl Settings {
    /// Load from `epoc.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file (missing files are skipped) and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EPOC_").ignore(&["REDIS_TOKEN"]).split("_"));
        // The token is taken verbatim; typed parsing would turn `007` into 7.
        if let Some(token) = Env::var("EPOC_REDIS_TOKEN") {
            figment = figment.merge(Serialized::default("redis.token", token));
        }
        let mut settings: Self = figment.extract()?;

        if settings.redis.token.as_deref() == Some("None") {
            settings.redis.token = None;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Validate after loading.
    pub fn validate(&self) -> AppResult<()> {
        if self.redis.host.trim().is_empty() {
            return Err(EpocError::Configuration(
                "Please set the EPOC_REDIS_HOST environment variable or redis.host".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("EPOC_REDIS_HOST", "noether");
            jail.set_env("EPOC_REDIS_TOKEN", "secret");
            jail.set_env("EPOC_REDIS_DB", "3");

            let settings = Settings::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.redis.host, "noether");
            assert_eq!(settings.redis.port, 6379);
            assert_eq!(settings.redis.token.as_deref(), Some("secret"));
            assert_eq!(settings.redis.db, 3);
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "epoc.toml",
                r#"
                [redis]
                host = "from-file"
                port = 6380
                "#,
            )?;
            jail.set_env("EPOC_REDIS_PORT", "6390");

            let settings = Settings::load().map_err(|e| e.to_string())?;
            assert_eq!(settings.redis.host, "from-file");
            assert_eq!(settings.redis.port, 6390);
            assert_eq!(settings.redis.token, None);
            Ok(())
        });
    }

    #[test]
    fn test_literal_none_token() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("EPOC_REDIS_HOST", "localhost");
            jail.set_env("EPOC_REDIS_TOKEN", "None");

            let settings = Settings::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.redis.token, None);
            Ok(())
        });
    }

    #[test]
    fn test_numeric_and_bool_tokens_are_text() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("EPOC_REDIS_HOST", "localhost");
            jail.set_env("EPOC_REDIS_TOKEN", "12345");
            let settings = Settings::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.redis.token.as_deref(), Some("12345"));

            jail.set_env("EPOC_REDIS_TOKEN", "00123");
            let settings = Settings::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.redis.token.as_deref(), Some("00123"));

            jail.set_env("EPOC_REDIS_TOKEN", "true");
            let settings = Settings::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.redis.token.as_deref(), Some("true"));
            Ok(())
        });
    }

    #[test]
    fn test_numeric_values_in_file_are_text() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "epoc.toml",
                r#"
                [redis]
                host = "noether"
                token = 4711
                "#,
            )?;
            let settings = Settings::load().map_err(|e| e.to_string())?;
            assert_eq!(settings.redis.token.as_deref(), Some("4711"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_host() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let err = Settings::load_from("missing.toml").unwrap_err();
            assert!(matches!(err, EpocError::Configuration(_)));
            Ok(())
        });
    }
}

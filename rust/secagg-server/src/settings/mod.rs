//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An example
//! of a configuration file can be found in the `configs/` directory located in the repository root.

use std::{fmt, path::Path};

use config::{Config, ConfigError, Environment};
use serde::de::{self, Deserializer, Visitor};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub protocol: ProtocolSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("secagg").separator("__"))?;
        config.try_into()
    }
}

/// The settings of an aggregation protocol.
///
/// They are stored with every protocol so that all rounds of a protocol run with the same
/// parameters.
#[derive(Debug, Validate, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[validate(schema(function = "validate_protocol"))]
pub struct ProtocolSettings {
    /// The number of shares needed to recombine a secret, also the minimal number of masked
    /// inputs for unmasking.
    ///
    /// The value must be at least `1` and at most `min_participants`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [protocol]
    /// threshold = 2
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SECAGG_PROTOCOL__THRESHOLD=2
    /// ```
    pub threshold: u32,

    /// The minimal number of registrations for leaving the registration step and the minimal
    /// number of key share messages for leaving the key sharing step.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [protocol]
    /// min_participants = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SECAGG_PROTOCOL__MIN_PARTICIPANTS=3
    /// ```
    pub min_participants: u32,

    /// Whether rounds advance on their own.
    ///
    /// A round leaves the registration step once `auto_advance_min` clients registered, and the
    /// key sharing and masking steps once every eligible client submitted. A step is only left
    /// if its requirement holds.
    #[serde(default)]
    pub auto_advance: bool,

    /// The number of registrations after which a round advances to key sharing on its own. It
    /// must not be smaller than `min_participants` if `auto_advance` is set.
    #[serde(default)]
    pub auto_advance_min: u32,
}

impl ProtocolSettings {
    /// Checks the protocol settings.
    fn validate_protocol(&self) -> Result<(), ValidationError> {
        self.validate_threshold()?;
        self.validate_auto_advance()
    }

    /// Checks that `1 <= threshold <= min_participants`.
    fn validate_threshold(&self) -> Result<(), ValidationError> {
        if 1 <= self.threshold && self.threshold <= self.min_participants {
            Ok(())
        } else {
            Err(ValidationError::new("invalid threshold"))
        }
    }

    fn validate_auto_advance(&self) -> Result<(), ValidationError> {
        if !self.auto_advance || self.auto_advance_min >= self.min_participants {
            Ok(())
        } else {
            Err(ValidationError::new("invalid auto advance minimum"))
        }
    }
}

/// A wrapper for validate derive.
fn validate_protocol(s: &ProtocolSettings) -> Result<(), ValidationError> {
    s.validate_protocol()
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SECAGG_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Default for ProtocolSettings {
        fn default() -> Self {
            Self {
                threshold: 2,
                min_participants: 3,
                auto_advance: false,
                auto_advance_min: 0,
            }
        }
    }

    #[test]
    fn test_settings_new() {
        let settings = Settings::new("../../configs/config.toml").unwrap();
        assert!(settings.protocol.validate().is_ok());
        assert!(Settings::new("").is_err());
    }

    #[test]
    fn test_validate_protocol() {
        assert!(ProtocolSettings::default().validate_protocol().is_ok());
    }

    #[test]
    fn test_validate_threshold() {
        let mut protocol = ProtocolSettings::default();
        protocol.threshold = 0;
        assert!(protocol.validate().is_err());

        let mut protocol = ProtocolSettings::default();
        protocol.threshold = 4;
        assert!(protocol.validate().is_err());

        let mut protocol = ProtocolSettings::default();
        protocol.threshold = 3;
        assert!(protocol.validate().is_ok());
    }

    #[test]
    fn test_validate_auto_advance() {
        let mut protocol = ProtocolSettings::default();
        protocol.auto_advance = true;
        protocol.auto_advance_min = 2;
        assert!(protocol.validate().is_err());

        protocol.auto_advance_min = 3;
        assert!(protocol.validate().is_ok());

        // the minimum is ignored without auto advance
        protocol.auto_advance = false;
        protocol.auto_advance_min = 0;
        assert!(protocol.validate().is_ok());
    }

    #[test]
    fn test_deserialize_protocol_defaults() {
        let protocol: ProtocolSettings =
            serde_json::from_str(r#"{"threshold": 2, "min_participants": 2}"#).unwrap();
        assert!(!protocol.auto_advance);
        assert_eq!(protocol.auto_advance_min, 0);
    }

    #[test]
    fn test_deserialize_env_filter() {
        let settings: Result<LoggingSettings, _> =
            serde_json::from_str(r#"{"filter": "secagg_server=debug,info"}"#);
        assert!(settings.is_ok());
        let settings: Result<LoggingSettings, _> = serde_json::from_str(r#"{"filter": "secagg=loud"}"#);
        assert!(settings.is_err());
    }
}

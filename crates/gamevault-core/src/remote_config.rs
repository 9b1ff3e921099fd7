//! Versioned remote configuration values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EconomyError, Result};

/// Config key holding the global XP multiplier.
pub const XP_MULTIPLIER_KEY: &str = "xp_multiplier";

/// Declared type of a config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    /// Boolean feature flag.
    Flag,
    /// Number.
    Number,
    /// String.
    String,
    /// Any JSON document.
    Json,
}

impl ConfigType {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Number => "number",
            Self::String => "string",
            Self::Json => "json",
        }
    }

    /// Reject values that do not match the declared type.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::InvalidInput`] on a mismatch.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let ok = match self {
            Self::Flag => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Json => true,
        };
        if ok {
            Ok(())
        } else {
            Err(EconomyError::InvalidInput(format!(
                "value {value} is not a {self}"
            )))
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "flag" => Ok(Self::Flag),
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown config type: {other}")),
        }
    }
}

/// One configuration value. `version` increases on every write to the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Config key.
    pub key: String,
    /// Current value.
    pub value: Value,
    /// Declared type.
    pub config_type: ConfigType,
    /// Write counter, starting at 1.
    pub version: i64,
    /// When the value last changed.
    pub updated_at: DateTime<Utc>,
}

impl RemoteConfig {
    /// Build a validated first version of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::InvalidInput`] if the key is empty or the value
    /// does not match `config_type`.
    pub fn new(key: impl Into<String>, value: Value, config_type: ConfigType) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(EconomyError::InvalidInput("config key is empty".into()));
        }
        config_type.validate(&value)?;
        Ok(Self {
            key,
            value,
            config_type,
            version: 1,
            updated_at: Utc::now(),
        })
    }

    /// Numeric value, if the value is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

use crate::error::{FtmsError, Result};

/// Which source feeds the heart-rate metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartRateSource {
    /// Use the heart rate reported in Indoor Bike Data
    #[default]
    Device,
    /// Ignore the bike and use values pushed through the external entry point
    External,
}

impl fmt::Display for HeartRateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Rider and controller settings
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// body_weight_kg = 82.5
/// heart_rate_source = "external"
/// max_reconnect_attempts = 20
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BikeConfig {
    /// Rider body weight in kilograms, used by the calorie estimate
    pub body_weight_kg: f64,
    /// Heart-rate source selection
    pub heart_rate_source: HeartRateSource,
    /// Write resistance changes to the bike
    pub write_resistance: bool,
    /// Hand out a bridge handle for a virtual peripheral
    pub virtual_device_enabled: bool,
    /// Consecutive failed reconnects before giving up; unset retries forever
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for BikeConfig {
    fn default() -> Self {
        Self {
            body_weight_kg: 75.0,
            heart_rate_source: HeartRateSource::Device,
            write_resistance: true,
            virtual_device_enabled: true,
            max_reconnect_attempts: None,
        }
    }
}

impl BikeConfig {
    /// Parse a configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Config`] if the text is not valid TOML or a key
    /// has the wrong type, or [`FtmsError::InvalidParameters`] if a value is
    /// out of range.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that values are usable
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::InvalidParameters`] if the body weight is not a
    /// positive finite number.
    pub fn validate(&self) -> Result<()> {
        if !self.body_weight_kg.is_finite() || self.body_weight_kg <= 0.0 {
            return Err(FtmsError::InvalidParameters(format!(
                "body_weight_kg must be positive, got {}",
                self.body_weight_kg
            )));
        }
        Ok(())
    }

    /// Load a configuration file
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Io`] if the file cannot be read, or any error of
    /// [`BikeConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

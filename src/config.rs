//! Runtime configuration.
//!
//! Settings come from an optional TOML file, overridden by environment
//! variables prefixed with `SENSORWATCH_`:
//!
//! ```toml
//! database_url = "https://example-rtdb.firebasedatabase.app"
//! auth_token = "secret"
//! channel = "sensorData"
//!
//! # Extra or replacement range tables, merged over the built-in ones
//! [[ranges]]
//! parameter = "Chlorine"
//! mode = "monotonic"
//! excellent = { low = 0.0, high = 0.5 }
//! good = { low = 0.5, high = 2.0 }
//! warning = { low = 2.0, high = 4.0 }
//! ```
//!
//! Ranges are a list rather than a table keyed by parameter because
//! configuration keys are case-insensitive and parameter names are not.

use std::path::Path;

use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::data::{Band, ParameterRange, RangeMode, RangeTable};
use crate::error::{Result, TransportError};
use crate::source::RestTransport;

pub const ENV_PREFIX: &str = "SENSORWATCH";
pub const DEFAULT_CHANNEL: &str = "sensorData";

/// A range table entry as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeEntry {
    pub parameter: String,
    pub mode: RangeMode,
    pub excellent: Band,
    pub good: Band,
    pub warning: Band,
}

impl From<&RangeEntry> for ParameterRange {
    fn from(entry: &RangeEntry) -> Self {
        ParameterRange {
            mode: entry.mode,
            excellent: entry.excellent,
            good: entry.good,
            warning: entry.warning,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Base address of the real-time database.
    pub database_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Channel the CLI watches.
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub ranges: Vec<RangeEntry>,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

impl Settings {
    /// Load settings from `path` (if given) and the environment.
    ///
    /// A `database_url` given here takes precedence over both.
    pub fn load(path: Option<&Path>, database_url: Option<&str>) -> Result<Self> {
        Self::load_with_prefix(path, database_url, ENV_PREFIX)
    }

    fn load_with_prefix(
        path: Option<&Path>,
        database_url: Option<&str>,
        prefix: &str,
    ) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_override_option("database_url", database_url)?
            .build()?;
        Self::from_config(config)
    }

    /// Deserialize and validate settings from a built [`Config`].
    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize()?;
        settings.range_table()?;
        Ok(settings)
    }

    /// The built-in range tables with configured entries merged over them.
    pub fn range_table(&self) -> Result<RangeTable> {
        let mut table = RangeTable::default();
        for entry in &self.ranges {
            table.insert(entry.parameter.clone(), ParameterRange::from(entry));
        }
        table.validate()?;
        Ok(table)
    }

    /// Build the REST transport described by these settings.
    pub fn transport(&self) -> Result<RestTransport, TransportError> {
        let builder = RestTransport::builder().base_url(&self.database_url);
        match &self.auth_token {
            Some(token) => builder.auth_token(token).build(),
            None => builder.build(),
        }
    }
}

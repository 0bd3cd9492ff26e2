//! Barrier configuration.
//!
//! ```toml
//! name = "export-crops"
//! abort-unregistered = true
//! abort-on-failure = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading a [`BarrierConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value parsed but is not acceptable.
	#[error("invalid barrier config: {0}")]
	Invalid(String),
}

/// Runtime options for one [`RoundBarrier`](crate::RoundBarrier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BarrierConfig {
	/// Name of the trigger channel, used in logs.
	pub name: String,
	/// Abort a producer's in-flight task when it is unregistered mid-round.
	pub abort_unregistered: bool,
	/// Abort the remaining producer tasks of a round once one of them fails.
	pub abort_on_failure: bool,
}

/// Returns the default trigger channel name.
fn default_name() -> String {
	"round-barrier".to_string()
}

impl Default for BarrierConfig {
	fn default() -> Self {
		Self {
			name: default_name(),
			abort_unregistered: true,
			abort_on_failure: true,
		}
	}
}

impl BarrierConfig {
	/// Default options with a custom channel name.
	pub fn named(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.name.trim().is_empty() {
			return Err(ConfigError::Invalid("name must not be empty".into()));
		}
		Ok(())
	}
}

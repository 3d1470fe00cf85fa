use core::time::Duration;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid cache configuration: {0}")]
	Json(#[from] serde_json::Error),
}

/// [`RequestCache`](`crate::cache::RequestCache`) settings. Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
	/// Prefix of every data URL, without trailing slash. Requests go to `<base_url>/data<path>`.
	pub base_url: String,
	/// Lifetime of responses without `Date` and `Cache-Control: max-age` headers.
	pub default_max_age_secs: u64,
	/// Period of the expired entry sweep.
	pub purge_interval_secs: u64,
	/// How long the error sink should show reports.
	pub error_timeout_ms: u64,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			base_url: String::new(),
			default_max_age_secs: 900,
			purge_interval_secs: 60,
			error_timeout_ms: 10_000,
		}
	}
}

impl CacheConfig {
	/// Parses a configuration blob, usually embedded in the page.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let mut config: Self = serde_json::from_str(json)?;
		config.base_url = config.base_url.trim_end_matches('/').to_owned();
		Ok(config)
	}

	#[must_use]
	pub fn with_base_url(mut self, base_url: &str) -> Self {
		self.base_url = base_url.trim_end_matches('/').to_owned();
		self
	}

	#[must_use]
	pub fn purge_interval(&self) -> Duration {
		Duration::from_secs(self.purge_interval_secs)
	}

	#[must_use]
	pub fn error_timeout(&self) -> Duration {
		Duration::from_millis(self.error_timeout_ms)
	}
}

/// [`Loader`](`crate::loader::Loader`) settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
	/// Delay after a partial completion before redrawing with incomplete data.
	pub redraw_delay_ms: u64,
}

impl Default for LoaderConfig {
	fn default() -> Self {
		Self { redraw_delay_ms: 1000 }
	}
}

impl LoaderConfig {
	#[must_use]
	pub fn redraw_delay(&self) -> Duration {
		Duration::from_millis(self.redraw_delay_ms)
	}
}

use crate::protocol::{Category, REFERENCE_NUMBER_KEY};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const IMPORT_REFERENCE_URL_VAR: &str = "SHIPYARD_IMPORT_REFERENCE_URL";
pub const IMPORT_CONTAINER_URL_VAR: &str = "SHIPYARD_IMPORT_CONTAINER_URL";
pub const EXPORT_REFERENCE_URL_VAR: &str = "SHIPYARD_EXPORT_REFERENCE_URL";
pub const EXPORT_CONTAINER_URL_VAR: &str = "SHIPYARD_EXPORT_CONTAINER_URL";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Fan-out concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Timeout `{0}` must be greater than 0")]
    ZeroTimeout(&'static str),

    #[error("Empty request key: {0}")]
    EmptyKey(&'static str),

    #[error("Invalid URL in {var}: {reason}")]
    InvalidUrl { var: String, reason: String },
}

/// Aggregator configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for shipment requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Maximum number of container lookups in flight per request
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,
    /// JSON key carrying the user id in reference lookup requests
    #[serde(default = "default_user_key")]
    pub user_key: String,
    pub downstreams: Downstreams,
}

impl Config {
    /// Validates the aggregator configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.timeouts.validate()?;

        if self.fanout_concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }

        if self.user_key.is_empty() {
            return Err(ValidationError::EmptyKey("user_key"));
        }

        for category in [Category::Import, Category::Export] {
            if self.downstreams.endpoints(category).reference_key.is_empty() {
                return Err(ValidationError::EmptyKey("reference_key"));
            }
        }

        Ok(())
    }

    /// Replaces downstream URLs with values from the environment.
    ///
    /// `lookup` is normally `std::env::var(..).ok()`; see [`Config::apply_env`].
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Downstreams { import, export } = &mut self.downstreams;
        let targets = [
            (IMPORT_REFERENCE_URL_VAR, &mut import.reference_url),
            (IMPORT_CONTAINER_URL_VAR, &mut import.container_url),
            (EXPORT_REFERENCE_URL_VAR, &mut export.reference_url),
            (EXPORT_CONTAINER_URL_VAR, &mut export.container_url),
        ];

        for (var, target) in targets {
            let Some(value) = lookup(var) else {
                continue;
            };
            *target = Url::parse(&value).map_err(|e| ValidationError::InvalidUrl {
                var: var.to_string(),
                reason: e.to_string(),
            })?;
            tracing::info!(var, url = %target, "Downstream URL overridden from environment");
        }

        Ok(())
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ValidationError> {
        self.apply_env_overrides(|var| std::env::var(var).ok())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    /// Covers connect, request and reading the full body of one downstream call
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Upper bound for the whole enrichment fan-out of one category
    #[serde(default = "default_fanout_timeout_secs")]
    pub fanout_timeout_secs: u64,
}

impl Timeouts {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.http_timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout("http_timeout_secs"));
        }
        if self.fanout_timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout("fanout_timeout_secs"));
        }
        Ok(())
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            fanout_timeout_secs: default_fanout_timeout_secs(),
        }
    }
}

/// Downstream services, one pair per category.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Downstreams {
    pub import: CategoryEndpoints,
    pub export: CategoryEndpoints,
}

impl Downstreams {
    /// The one place category-specific endpoints are selected.
    pub fn endpoints(&self, category: Category) -> &CategoryEndpoints {
        match category {
            Category::Import => &self.import,
            Category::Export => &self.export,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CategoryEndpoints {
    /// Reference lookup by user
    pub reference_url: Url,
    /// Container lookup by reference number
    pub container_url: Url,
    /// JSON key carrying the reference number, in both the reference lookup
    /// output and the container lookup request
    #[serde(default = "default_reference_key")]
    pub reference_key: String,
}

fn default_fanout_concurrency() -> usize {
    8
}

fn default_user_key() -> String {
    "user_id".to_string()
}

fn default_reference_key() -> String {
    REFERENCE_NUMBER_KEY.to_string()
}

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_fanout_timeout_secs() -> u64 {
    20
}

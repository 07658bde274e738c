//! Injector configuration
//!
//! [`InjectorConfig`] is built once at startup from CLI flags (with
//! environment fallbacks) and shared read-only across all admission requests.

use clap::Args;

use crate::error::Error;
use crate::Result;

/// Default topology key used for both affinity and spread constraints
pub const DEFAULT_TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";

/// Default label identifying the application a Deployment belongs to
pub const DEFAULT_APP_LABEL_KEY: &str = "app";

/// Scheduling policy injected into every admitted Deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorConfig {
    /// Node label key identifying the topology dimension (zone, region, ...)
    pub topology_key: String,
    /// Preferred topology values, in the order they are written into the
    /// injected affinity term. Empty disables affinity injection.
    pub preferences: Vec<String>,
    /// Deployment label whose value selects pods for spread constraints
    pub app_label_key: String,
}

impl InjectorConfig {
    /// Create a validated configuration
    pub fn new(
        topology_key: impl Into<String>,
        app_label_key: impl Into<String>,
        preferences: Vec<String>,
    ) -> Result<Self> {
        let topology_key = topology_key.into();
        let app_label_key = app_label_key.into();

        if topology_key.trim().is_empty() {
            return Err(Error::config("topology key must not be empty"));
        }
        if app_label_key.trim().is_empty() {
            return Err(Error::config("app label key must not be empty"));
        }

        Ok(Self {
            topology_key,
            preferences,
            app_label_key,
        })
    }
}

/// Command line arguments that make up an [`InjectorConfig`]
#[derive(Args, Debug, Clone)]
pub struct InjectorArgs {
    /// Node label key identifying the topology dimension
    #[arg(long, env = "TOPOLOGY_KEY", default_value = DEFAULT_TOPOLOGY_KEY)]
    pub topology_key: String,

    /// Deployment label used to select pods in injected spread constraints
    #[arg(long, env = "APP_LABEL_KEY", default_value = DEFAULT_APP_LABEL_KEY)]
    pub app_label_key: String,

    /// Comma-separated topology values to prefer, in priority order
    #[arg(long, env = "PREFERENCES", value_delimiter = ',')]
    pub preferences: Vec<String>,
}

impl InjectorArgs {
    /// Validate the arguments and build the shared configuration
    ///
    /// Blank entries are dropped so `PREFERENCES=""` disables affinity
    /// injection instead of preferring an empty value.
    pub fn into_config(self) -> Result<InjectorConfig> {
        let preferences = self
            .preferences
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        InjectorConfig::new(self.topology_key, self.app_label_key, preferences)
    }
}

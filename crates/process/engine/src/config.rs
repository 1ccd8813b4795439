//! Engine configuration
//!
//! Loaded in layers: built-in defaults, then an optional file, then
//! `PROCESS_ENGINE_*` environment variables.

use serde::{Deserialize, Serialize};

/// How registering different content under a known process ID is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Reject with a version conflict
    #[default]
    Strict,
    /// Register it as the next version
    AutoIncrement,
}

/// Process engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine name, persisted in snapshots
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub version_policy: VersionPolicy,

    /// Upper bound on steps taken by a single run of one instance
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: usize,
}

fn default_name() -> String {
    "process-engine".to_string()
}

fn default_max_steps_per_run() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version_policy: VersionPolicy::default(),
            max_steps_per_run: default_max_steps_per_run(),
        }
    }
}

impl EngineConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    pub fn with_max_steps_per_run(mut self, limit: usize) -> Self {
        self.max_steps_per_run = limit;
        self
    }

    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PROCESS_ENGINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

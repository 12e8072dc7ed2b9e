//! Engine configuration model.
//!
//! Configuration is an explicit value handed to the engine at construction
//! time. Every field has a default, so an empty YAML document is a valid
//! configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{QuickVmError, Result};
use crate::types::{ClassifiedState, ProviderVersion};

/// Root configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Management provider version of the host.
    pub provider: ProviderVersion,
    /// Management namespace; derived from `provider` when unset.
    pub namespace: Option<String>,
    /// How often the hypervisor is checked for state changes.
    pub poll_interval_ms: u64,
    /// Reason string attached to guest shutdown requests.
    pub shutdown_reason: String,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// State classification settings.
    pub classifier: ClassifierConfig,
    /// Background service settings.
    pub service: ServiceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderVersion::default(),
            namespace: None,
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            shutdown_reason: constants::APP_NAME.to_string(),
            log_level: constants::DEFAULT_LOG_LEVEL.to_string(),
            classifier: ClassifierConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| QuickVmError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses and validates a configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid YAML or fails validation.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`QuickVmError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(QuickVmError::Config {
                message: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.service.queue_capacity == 0 {
            return Err(QuickVmError::Config {
                message: "service.queue_capacity must be greater than zero".to_string(),
            });
        }
        if self.service.write_timeout_ms == 0 {
            return Err(QuickVmError::Config {
                message: "service.write_timeout_ms must be greater than zero".to_string(),
            });
        }
        if let Some(entry) = self
            .classifier
            .extra_critical
            .iter()
            .find(|c| c.base == ClassifiedState::Unknown)
        {
            return Err(QuickVmError::Config {
                message: format!("critical code {} cannot map to unknown", entry.code),
            });
        }
        Ok(())
    }

    /// Management namespace in effect.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace
            .as_deref()
            .unwrap_or(match self.provider {
                ProviderVersion::V1 => constants::V1_NAMESPACE,
                ProviderVersion::V2 => constants::V2_NAMESPACE,
            })
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Extensions to the built-in classification table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Additional provider-specific critical codes.
    pub extra_critical: Vec<CriticalCode>,
}

/// A raw code reported as a critical variant of a base category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalCode {
    /// Raw state code.
    pub code: u16,
    /// Category the code belongs to.
    pub base: ClassifiedState,
}

/// Background service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Socket address the service listens on.
    pub listen: String,
    /// Outbound frames buffered per connection before it is dropped.
    pub queue_capacity: usize,
    /// Time allowed for writing one frame to a connection.
    pub write_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: constants::DEFAULT_LISTEN_ADDR.to_string(),
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            write_timeout_ms: constants::DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl ServiceConfig {
    /// Write timeout as a [`Duration`].
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

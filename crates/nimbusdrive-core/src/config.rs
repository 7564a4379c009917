//! Configuration module for nimbusdrive.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for the reconciliation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub deletion: DeletionConfig,
    pub state: StateConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root directory of the locally synchronized subtree.
    pub root: PathBuf,
    /// Seconds between periodic reconciliation cycles.
    pub poll_interval: u64,
    /// Seconds a path must stay quiet before its coalesced change event
    /// is released (debounce window).
    pub debounce_window: u64,
    /// Maximum actions executed in parallel within one cycle.
    pub worker_count: usize,
}

/// Retry settings for remote operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per remote operation before deferring to the
    /// next cycle.
    pub max_attempts: u32,
    /// Base backoff delay in seconds; doubles per attempt.
    pub base_delay: u64,
    /// Per-operation timeout in seconds; expiry counts as a transient
    /// failure.
    pub remote_timeout: u64,
}

/// Deletion verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Maximum verification attempts before a deletion is surfaced as
    /// requiring attention.
    pub verify_attempts: u32,
    /// Seconds a just-deleted path stays in the resurrection suppression
    /// set.
    pub suppression_window: u64,
}

/// State persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the persisted state file.
    pub file: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/nimbusdrive/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("nimbusdrive")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

// Config derives Default because all its fields implement Default.
// (clippy::derivable_impls)

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Nimbusdrive"),
            poll_interval: 300,
            debounce_window: 2,
            worker_count: 4,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: 1,
            remote_timeout: 30,
        }
    }
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            verify_attempts: 3,
            suppression_window: 60,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file: dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("~/.config"))
                .join("nimbusdrive")
                .join("sync_state.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.debounce_window == 0 {
            errors.push(ValidationError {
                field: "sync.debounce_window".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.worker_count == 0 || self.sync.worker_count > 64 {
            errors.push(ValidationError {
                field: "sync.worker_count".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if !self.sync.root.is_absolute() {
            let root_str = self.sync.root.to_string_lossy();
            // Tilde paths are expanded at runtime.
            if !root_str.starts_with('~') {
                errors.push(ValidationError {
                    field: "sync.root".into(),
                    message: format!("must be absolute: {}", self.sync.root.display()),
                });
            }
        }

        // --- retry ---
        if self.retry.max_attempts == 0 {
            errors.push(ValidationError {
                field: "retry.max_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.retry.remote_timeout == 0 {
            errors.push(ValidationError {
                field: "retry.remote_timeout".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- deletion ---
        if self.deletion.verify_attempts == 0 {
            errors.push(ValidationError {
                field: "deletion.verify_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.deletion.suppression_window == 0 {
            errors.push(ValidationError {
                field: "deletion.suppression_window".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- state ---
        if self.state.file.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "state.file".into(),
                message: "must not be empty".into(),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use nimbusdrive_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_root(PathBuf::from("/home/user/Nimbusdrive"))
///     .sync_poll_interval(60)
///     .retry_max_attempts(3)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_debounce_window(mut self, seconds: u64) -> Self {
        self.config.sync.debounce_window = seconds;
        self
    }

    pub fn sync_worker_count(mut self, n: usize) -> Self {
        self.config.sync.worker_count = n;
        self
    }

    // --- retry ---

    pub fn retry_max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn retry_base_delay(mut self, seconds: u64) -> Self {
        self.config.retry.base_delay = seconds;
        self
    }

    pub fn retry_remote_timeout(mut self, seconds: u64) -> Self {
        self.config.retry.remote_timeout = seconds;
        self
    }

    // --- deletion ---

    pub fn deletion_verify_attempts(mut self, n: u32) -> Self {
        self.config.deletion.verify_attempts = n;
        self
    }

    pub fn deletion_suppression_window(mut self, seconds: u64) -> Self {
        self.config.deletion.suppression_window = seconds;
        self
    }

    // --- state ---

    pub fn state_file(mut self, file: PathBuf) -> Self {
        self.config.state.file = file;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

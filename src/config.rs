//! Configuration for AllyKV
//!
//! Centralized configuration with a builder for embedding and tests, and a
//! TOML loader for the server process.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AllyError, Result};

/// Main configuration for an AllyKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory owned by the engine
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── index.idx             (persisted index)
    ///     ├── index.idx.tmp         (in-flight index replacement)
    ///     └── segment_<uuid>.seg    (segment files)
    pub data_dir: PathBuf,

    /// Active segment is sealed once its byte size exceeds this
    pub segment_target_size: u64,

    // -------------------------------------------------------------------------
    // Buffer Configuration
    // -------------------------------------------------------------------------
    /// Maximum number of entries in the read cache
    pub read_cache_capacity: usize,

    /// Initial capacity of the write buffer (new keys)
    pub write_buffer_capacity: usize,

    /// Initial capacity of the edit buffer (existing keys)
    pub edit_buffer_capacity: usize,

    // -------------------------------------------------------------------------
    // Maintenance Configuration
    // -------------------------------------------------------------------------
    pub maintenance: MaintenanceConfig,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen host
    pub host: String,

    /// TCP listen port (0 lets the OS pick one)
    pub port: u16,

    /// Max connections queued or in service at once
    pub max_connections: usize,

    /// Number of connection worker threads
    pub worker_threads: usize,

    /// Connection read timeout (milliseconds, 0 disables)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 disables)
    pub write_timeout_ms: u64,
}

/// Intervals of the periodic background tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub flush_new_interval: Duration,
    pub flush_edits_interval: Duration,
    pub persist_index_interval: Duration,
    pub compaction_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            flush_new_interval: Duration::from_secs(5),
            flush_edits_interval: Duration::from_secs(10),
            persist_index_interval: Duration::from_secs(15),
            compaction_interval: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./allykv_data"),
            segment_target_size: 64 * 1024 * 1024, // 64 MB
            read_cache_capacity: 10_000,
            write_buffer_capacity: 1024,
            edit_buffer_capacity: 1024,
            maintenance: MaintenanceConfig::default(),
            host: "127.0.0.1".to_string(),
            port: 7070,
            max_connections: 1024,
            worker_threads: 8,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load and validate a TOML config file
    ///
    /// The buffer sizes, target segment size and port are required; every
    /// other key falls back to its default.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AllyError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML config text
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| AllyError::Config(e.to_string()))?;
        let config = file.into_config();
        // Port 0 only makes sense for ephemeral binds built in code
        if config.port == 0 {
            return Err(AllyError::Config("port must be greater than 0".to_string()));
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("read_cache_capacity", self.read_cache_capacity as u64),
            ("write_buffer_capacity", self.write_buffer_capacity as u64),
            ("edit_buffer_capacity", self.edit_buffer_capacity as u64),
            ("segment_target_size", self.segment_target_size),
            ("worker_threads", self.worker_threads as u64),
            ("max_connections", self.max_connections as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AllyError::Config(format!("{} must be greater than 0", name)));
            }
        }

        let intervals = [
            ("flush_new_interval", self.maintenance.flush_new_interval),
            ("flush_edits_interval", self.maintenance.flush_edits_interval),
            ("persist_index_interval", self.maintenance.persist_index_interval),
            ("compaction_interval", self.maintenance.compaction_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(AllyError::Config(format!("{} must be greater than 0", name)));
            }
        }

        Ok(())
    }

    /// `host:port` the server binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// TOML representation
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    read_cache_capacity: usize,
    write_buffer_capacity: usize,
    edit_buffer_capacity: usize,
    segment_target_size: u64,
    port: u16,

    data_dir: Option<PathBuf>,
    host: Option<String>,
    max_connections: Option<usize>,
    worker_threads: Option<usize>,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,

    #[serde(default)]
    maintenance: MaintenanceFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaintenanceFile {
    flush_new_interval_ms: Option<u64>,
    flush_edits_interval_ms: Option<u64>,
    persist_index_interval_ms: Option<u64>,
    compaction_interval_ms: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> Config {
        let defaults = Config::default();
        let m = MaintenanceConfig::default();
        let millis = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);

        Config {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            segment_target_size: self.segment_target_size,
            read_cache_capacity: self.read_cache_capacity,
            write_buffer_capacity: self.write_buffer_capacity,
            edit_buffer_capacity: self.edit_buffer_capacity,
            maintenance: MaintenanceConfig {
                flush_new_interval: millis(self.maintenance.flush_new_interval_ms, m.flush_new_interval),
                flush_edits_interval: millis(
                    self.maintenance.flush_edits_interval_ms,
                    m.flush_edits_interval,
                ),
                persist_index_interval: millis(
                    self.maintenance.persist_index_interval_ms,
                    m.persist_index_interval,
                ),
                compaction_interval: millis(self.maintenance.compaction_interval_ms, m.compaction_interval),
            },
            host: self.host.unwrap_or(defaults.host),
            port: self.port,
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            worker_threads: self.worker_threads.unwrap_or(defaults.worker_threads),
            read_timeout_ms: self.read_timeout_ms.unwrap_or(defaults.read_timeout_ms),
            write_timeout_ms: self.write_timeout_ms.unwrap_or(defaults.write_timeout_ms),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the target segment size (in bytes)
    pub fn segment_target_size(mut self, size: u64) -> Self {
        self.config.segment_target_size = size;
        self
    }

    /// Set the read cache capacity (entries)
    pub fn read_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.read_cache_capacity = capacity;
        self
    }

    /// Set the initial write buffer capacity (entries)
    pub fn write_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.write_buffer_capacity = capacity;
        self
    }

    /// Set the initial edit buffer capacity (entries)
    pub fn edit_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.edit_buffer_capacity = capacity;
        self
    }

    /// Set the background task intervals
    pub fn maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.config.maintenance = maintenance;
        self
    }

    /// Set the TCP listen host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the TCP listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the number of connection worker threads
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Listen address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8080
    #[serde(default = "BindConfig::default_port")]
    pub port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    /// `host:port`, ready for a TCP listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// What is served and where unmatched requests go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Served directory.
    /// Default: current directory
    #[serde(default = "ServeConfig::default_root")]
    pub root: PathBuf,

    /// URL prefix the files are mounted under, e.g. `/static`.
    #[serde(default)]
    pub base_path: String,

    /// 302 target for paths with no file behind them.
    #[serde(default)]
    pub redirect: Option<String>,

    /// File served for paths with no file behind them. Exclusive with `redirect`.
    #[serde(default)]
    pub fallback: Option<PathBuf>,

    /// Default: index.html
    #[serde(default = "ServeConfig::default_index_file")]
    pub index_file: String,
}

impl ServeConfig {
    fn default_root() -> PathBuf {
        PathBuf::from(".")
    }

    fn default_index_file() -> String {
        "index.html".to_string()
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            base_path: String::new(),
            redirect: None,
            fallback: None,
            index_file: Self::default_index_file(),
        }
    }
}

/// Response header policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadersConfig {
    /// Overrides the per-response max-age when non-zero (seconds).
    #[serde(default)]
    pub max_age: u64,

    /// Send `no-cache` instead of a max-age.
    #[serde(default)]
    pub no_cache: bool,

    /// Leave out the `ETag` header.
    #[serde(default)]
    pub no_etag: bool,

    /// Honour `Range` requests.
    /// Default: true
    #[serde(default = "HeadersConfig::default_ranges")]
    pub ranges: bool,
}

impl HeadersConfig {
    fn default_ranges() -> bool {
        true
    }
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            max_age: 0,
            no_cache: false,
            no_etag: false,
            ranges: Self::default_ranges(),
        }
    }
}

/// In-memory cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total capacity in MiB. 0 turns the cache off.
    /// Default: 100
    #[serde(default = "CacheConfig::default_max_mb")]
    pub max_mb: u64,

    /// Largest single file that will be cached, in MiB.
    /// Default: 10
    #[serde(default = "CacheConfig::default_file_limit_mb")]
    pub file_limit_mb: u64,

    /// End the startup walk at the first file that does not fit.
    #[serde(default)]
    pub stop_walk_when_full: bool,
}

const MIB: u64 = 1024 * 1024;

impl CacheConfig {
    fn default_max_mb() -> u64 {
        100
    }

    fn default_file_limit_mb() -> u64 {
        10
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.max_mb.saturating_mul(MIB)
    }

    pub fn per_file_limit_bytes(&self) -> u64 {
        self.file_limit_mb.saturating_mul(MIB)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_mb: Self::default_max_mb(),
            file_limit_mb: Self::default_file_limit_mb(),
            stop_walk_when_full: false,
        }
    }
}

/// Live reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Watch the root and push change messages to connected clients.
    #[serde(default)]
    pub watch: bool,

    /// Have the injected client reload the page when its own file changes.
    #[serde(default)]
    pub auto_reload: bool,

    /// Default: 250
    #[serde(default = "LiveConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl LiveConfig {
    fn default_debounce_ms() -> u64 {
        250
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            watch: false,
            auto_reload: false,
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

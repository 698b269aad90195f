//! Configuration loading for larder.
//!
//! # Usage
//!
//! ```rust,no_run
//! use larderconf::LarderConfig;
//!
//! let config = LarderConfig::load().expect("Failed to load config");
//! config.validate().expect("Invalid config");
//!
//! println!("Serving {} on {}", config.serve.root.display(), config.bind.addr());
//! println!("Cache: {} bytes", config.cache.capacity_bytes());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/larder/config.toml` (system)
//! 2. `~/.config/larder/config.toml` (user)
//! 3. `./larder.toml` (local override, or the file passed with `--config`)
//! 4. Environment variables (`LARDER_*`, `RUST_LOG`)
//!
//! Files are merged as TOML tables before they are deserialized, so each file
//! only needs the keys it changes.
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [serve]
//! root = "~/site/public"
//! fallback = "~/site/public/index.html"
//!
//! [headers]
//! max_age = 3600
//!
//! [cache]
//! max_mb = 64
//! file_limit_mb = 4
//!
//! [live]
//! watch = true
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use settings::{
    BindConfig, CacheConfig, HeadersConfig, LiveConfig, ServeConfig, TelemetryConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete larder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LarderConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub serve: ServeConfig,

    #[serde(default)]
    pub headers: HeadersConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl LarderConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/larder/config.toml`
    /// 3. `~/.config/larder/config.toml`
    /// 4. `./larder.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file in place of `./larder.toml`,
    /// then apply env overrides.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = Self::from_files(&files)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Merge the given files in order, without looking at the environment.
    pub fn from_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_from_file(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let origin = files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let config = loader::from_table(merged, &origin)?;
        Ok((config, sources))
    }

    /// Parse a single TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let origin = Path::new("<string>");
        let table = loader::parse_table(contents, origin)?;
        loader::from_table(table, origin)
    }

    /// Check combinations that individual fields cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serve.redirect.is_some() && self.serve.fallback.is_some() {
            return Err(ConfigError::Invalid(
                "serve.redirect and serve.fallback cannot both be set".to_string(),
            ));
        }
        if self.live.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "live.debounce_ms must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_mb > 0 && self.cache.file_limit_mb > self.cache.max_mb {
            return Err(ConfigError::Invalid(format!(
                "cache.file_limit_mb ({}) exceeds cache.max_mb ({})",
                self.cache.file_limit_mb, self.cache.max_mb
            )));
        }
        if !self.serve.base_path.is_empty() && !self.serve.base_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "serve.base_path must start with '/': {}",
                self.serve.base_path
            )));
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# larder configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("host = {}\n", quoted(&self.bind.host)));
        output.push_str(&format!("port = {}\n", self.bind.port));

        output.push_str("\n[serve]\n");
        let root = self.serve.root.display().to_string();
        output.push_str(&format!("root = {}\n", quoted(&root)));
        output.push_str(&format!("base_path = {}\n", quoted(&self.serve.base_path)));
        match &self.serve.redirect {
            Some(target) => output.push_str(&format!("redirect = {}\n", quoted(target))),
            None => output.push_str("# redirect = \"/\"\n"),
        }
        match &self.serve.fallback {
            Some(path) => {
                let path = path.display().to_string();
                output.push_str(&format!("fallback = {}\n", quoted(&path)));
            }
            None => output.push_str("# fallback = \"index.html\"\n"),
        }
        output.push_str(&format!("index_file = {}\n", quoted(&self.serve.index_file)));

        output.push_str("\n[headers]\n");
        output.push_str(&format!("max_age = {}\n", self.headers.max_age));
        output.push_str(&format!("no_cache = {}\n", self.headers.no_cache));
        output.push_str(&format!("no_etag = {}\n", self.headers.no_etag));
        output.push_str(&format!("ranges = {}\n", self.headers.ranges));

        output.push_str("\n[cache]\n");
        output.push_str(&format!("max_mb = {}\n", self.cache.max_mb));
        output.push_str(&format!("file_limit_mb = {}\n", self.cache.file_limit_mb));
        output.push_str(&format!(
            "stop_walk_when_full = {}\n",
            self.cache.stop_walk_when_full
        ));

        output.push_str("\n[live]\n");
        output.push_str(&format!("watch = {}\n", self.live.watch));
        output.push_str(&format!("auto_reload = {}\n", self.live.auto_reload));
        output.push_str(&format!("debounce_ms = {}\n", self.live.debounce_ms));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = {}\n", quoted(&self.telemetry.log_level)));

        output
    }
}

/// A string as a TOML basic or literal string, escaped as needed.
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

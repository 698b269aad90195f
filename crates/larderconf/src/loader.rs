//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, LarderConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided it replaces the local override. Unlike the
/// standard locations it is returned even when missing, so that loading it
/// reports the error.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/larder/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("larder/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("larder.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, table by table.
///
/// Nested tables merge recursively; any other value in `overlay` replaces
/// the one in `base`. A file therefore only needs the keys it changes.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table into a config.
pub(crate) fn from_table(table: toml::Table, origin: &Path) -> Result<LarderConfig, ConfigError> {
    let mut config: LarderConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
    normalize(&mut config);
    Ok(config)
}

/// Blank strings mean "unset"; `~` and `$VAR` are expanded in paths.
pub(crate) fn normalize(config: &mut LarderConfig) {
    config.serve.root = expand_path(&config.serve.root.to_string_lossy());
    if config
        .serve
        .redirect
        .as_deref()
        .is_some_and(|r| r.trim().is_empty())
    {
        config.serve.redirect = None;
    }
    config.serve.fallback = match config.serve.fallback.take() {
        Some(p) if p.as_os_str().is_empty() => None,
        Some(p) => Some(expand_path(&p.to_string_lossy())),
        None => None,
    };
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut LarderConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from any key lookup. `apply_env_overrides` passes the
/// process environment.
pub fn apply_overrides_from<F>(config: &mut LarderConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |key: &str| {
        let value = lookup(key)?;
        sources.env_overrides.push(key.to_string());
        Some(value)
    };

    if let Some(v) = take("LARDER_PORT").and_then(|v| v.parse().ok()) {
        config.bind.port = v;
    }
    if let Some(v) = take("LARDER_HOST") {
        config.bind.host = v;
    }
    if let Some(v) = take("LARDER_ROOT") {
        config.serve.root = expand_path(&v);
    }
    if let Some(v) = take("LARDER_REDIRECT") {
        config.serve.redirect = Some(v).filter(|v| !v.is_empty());
    }
    if let Some(v) = take("LARDER_FALLBACK") {
        config.serve.fallback = Some(v).filter(|v| !v.is_empty()).map(|v| expand_path(&v));
    }
    if let Some(v) = take("LARDER_MAX_AGE").and_then(|v| v.parse().ok()) {
        config.headers.max_age = v;
    }
    if let Some(v) = take("LARDER_CACHE_MAX_MB").and_then(|v| v.parse().ok()) {
        config.cache.max_mb = v;
    }
    if let Some(v) = take("LARDER_CACHE_FILE_LIMIT_MB").and_then(|v| v.parse().ok()) {
        config.cache.file_limit_mb = v;
    }
    if let Some(v) = take("LARDER_WATCH") {
        config.live.watch = parse_flag(&v);
    }
    if let Some(v) = take("LARDER_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    // Also support RUST_LOG
    if let Some(v) = take("RUST_LOG") {
        config.telemetry.log_level = v;
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

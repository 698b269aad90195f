use anyhow::{Context, Result};
use clap::Parser;
use larder::{server, telemetry};
use larderconf::LarderConfig;
use std::path::PathBuf;

/// Static file server with an in-memory cache and live reload
#[derive(Parser, Debug)]
#[command(name = "larder", version, about, long_about = None)]
struct Cli {
    /// Directory to serve
    dir: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Log level or filter directive (trace, debug, info, warn, error, off)
    #[arg(long)]
    loglevel: Option<String>,

    /// Cache-Control max-age in seconds
    #[arg(long)]
    maxage: Option<u64>,

    /// Send Cache-Control: no-cache
    #[arg(long)]
    nocache: bool,

    /// Do not send ETag headers
    #[arg(long)]
    noetag: bool,

    /// Redirect unmatched paths here (302)
    #[arg(long, conflicts_with = "fallback")]
    redirect: Option<String>,

    /// Serve this file for unmatched paths
    #[arg(long)]
    fallback: Option<PathBuf>,

    /// Total cache size in MB, 0 disables caching
    #[arg(long = "cache-max", value_name = "MB")]
    cache_max: Option<u64>,

    /// Largest file the cache admits, in MB
    #[arg(long = "cache-flimit", value_name = "MB")]
    cache_flimit: Option<u64>,

    /// Ignore Range headers
    #[arg(long)]
    no_ranges: bool,

    /// Watch the root and push changes to live-reload clients
    #[arg(long)]
    watch: bool,

    /// Reload pages when their own file changes (implies --watch)
    #[arg(long)]
    auto_reload: bool,

    /// URL prefix to serve files under, e.g. /static
    #[arg(long, value_name = "PATH")]
    base: Option<String>,

    /// Config file to use in place of ./larder.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Flags given on the command line win over every config source.
    fn apply(&self, config: &mut LarderConfig) {
        if let Some(dir) = &self.dir {
            config.serve.root = dir.clone();
        }
        if let Some(port) = self.port {
            config.bind.port = port;
        }
        if let Some(host) = &self.host {
            config.bind.host = host.clone();
        }
        if let Some(level) = &self.loglevel {
            config.telemetry.log_level = level.clone();
        }
        if let Some(max_age) = self.maxage {
            config.headers.max_age = max_age;
        }
        if self.nocache {
            config.headers.no_cache = true;
        }
        if self.noetag {
            config.headers.no_etag = true;
        }
        if let Some(redirect) = &self.redirect {
            config.serve.redirect = Some(redirect.clone());
            config.serve.fallback = None;
        }
        if let Some(fallback) = &self.fallback {
            config.serve.fallback = Some(fallback.clone());
            config.serve.redirect = None;
        }
        if let Some(mb) = self.cache_max {
            config.cache.max_mb = mb;
        }
        if let Some(mb) = self.cache_flimit {
            config.cache.file_limit_mb = mb;
        }
        if self.no_ranges {
            config.headers.ranges = false;
        }
        if self.watch || self.auto_reload {
            config.live.watch = true;
        }
        if self.auto_reload {
            config.live.auto_reload = true;
        }
        if let Some(base) = &self.base {
            config.serve.base_path = base.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = LarderConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.telemetry.log_level)?;

    for file in &sources.files {
        tracing::info!("Loaded config from {}", file.display());
    }
    for var in &sources.env_overrides {
        tracing::debug!("Config override from ${}", var);
    }

    server::run(config).await
}

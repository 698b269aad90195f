use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use larderconf::LarderConfig;
use pantry::{relative_key, AssetCache};

use crate::inject::LiveClient;
use crate::live::{Broadcaster, LIVE_ENDPOINT};
use crate::respond::Composer;

/// What happens to a request with no file behind it.
#[derive(Debug, Clone, PartialEq)]
pub enum Unmatched {
    NotFound,
    Redirect(String),
    /// Serve this file instead, cached under `key`.
    Fallback { path: PathBuf, key: String },
}

/// Live-reload handles, present only when watching.
#[derive(Clone)]
pub struct LiveState {
    pub broadcaster: Broadcaster,
    pub client: LiveClient,
}

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub cache: Arc<AssetCache>,
    pub composer: Composer,
    /// Served directory; request paths are joined onto it.
    pub root: PathBuf,
    /// URL prefix with no trailing slash; empty for `/`.
    pub base_path: String,
    pub index_file: String,
    pub unmatched: Unmatched,
    pub live: Option<LiveState>,
    pub start_time: Instant,
}

impl WebState {
    /// State serving `root` with default headers and no live reload.
    pub fn new(root: impl Into<PathBuf>, cache: Arc<AssetCache>, composer: Composer) -> Self {
        Self {
            cache,
            composer,
            root: root.into(),
            base_path: String::new(),
            index_file: "index.html".to_string(),
            unmatched: Unmatched::NotFound,
            live: None,
            start_time: Instant::now(),
        }
    }

    /// State for a loaded config. `root` should already be resolved.
    pub fn from_config(
        config: &LarderConfig,
        root: PathBuf,
        cache: Arc<AssetCache>,
        broadcaster: Option<Broadcaster>,
    ) -> Self {
        let mut state = Self::new(root, cache, Composer::new(config.headers.clone()))
            .with_base_path(&config.serve.base_path)
            .with_index_file(&config.serve.index_file);

        if let Some(target) = &config.serve.redirect {
            state = state.with_redirect(target.clone());
        } else if let Some(path) = &config.serve.fallback {
            state = state.with_fallback(path);
        }

        if let Some(broadcaster) = broadcaster {
            state = state.with_live(broadcaster, config.live.auto_reload);
        }

        state
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = base_path.trim_end_matches('/').to_string();
        self
    }

    pub fn with_index_file(mut self, index_file: &str) -> Self {
        self.index_file = index_file.to_string();
        self
    }

    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.unmatched = Unmatched::Redirect(target.into());
        self
    }

    /// Serve `path` for unmatched requests. A relative path is taken from the root.
    pub fn with_fallback(mut self, path: &Path) -> Self {
        let path = if path.is_relative() {
            self.root.join(path)
        } else {
            path.to_path_buf()
        };
        // Files outside the root get their absolute path as key, which no
        // relative request path can collide with.
        let key = relative_key(&self.root, &path).unwrap_or_else(|| path.display().to_string());
        self.unmatched = Unmatched::Fallback { path, key };
        self
    }

    pub fn with_live(mut self, broadcaster: Broadcaster, auto_reload: bool) -> Self {
        self.live = Some(LiveState {
            broadcaster,
            client: LiveClient {
                endpoint: LIVE_ENDPOINT.to_string(),
                auto_reload,
            },
        });
        self
    }
}

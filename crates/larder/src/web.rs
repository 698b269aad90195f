//! Web endpoints for larder.
//!
//! `GET <base>/{*path}` serves files from the root through the asset cache.
//! Cached records are revalidated against the disk on every hit; misses are
//! read from disk and offered to the cache. The live-reload socket and the
//! health check live under `/__larder/`.

mod state;

pub use state::{LiveState, Unmatched, WebState};

use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{future, SinkExt, StreamExt};
use pantry::{AssetError, AssetRecord};
use tracing::{debug, error, warn};

use crate::live::{HEALTH_ENDPOINT, LIVE_ENDPOINT};
use crate::respond::{Decision, RequestContext};

pub fn router(state: WebState) -> Router {
    let base = state.base_path.clone();

    let mut router = Router::new().route(HEALTH_ENDPOINT, get(health));
    if state.live.is_some() {
        router = router.route(LIVE_ENDPOINT, get(live_socket));
    }

    let router = if base.is_empty() {
        router
            .route("/", get(serve_index))
            .route("/{*path}", get(serve_path))
    } else {
        router
            .route(&base, get(serve_index))
            .route(&format!("{}/", base), get(serve_index))
            .route(&format!("{}/{{*path}}", base), get(serve_path))
    };

    router.with_state(state)
}

async fn serve_index(State(state): State<WebState>, headers: HeaderMap) -> Response {
    serve(state, String::new(), headers).await
}

async fn serve_path(
    State(state): State<WebState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    serve(state, path, headers).await
}

#[tracing::instrument(skip(state, headers), fields(outcome = tracing::field::Empty))]
async fn serve(state: WebState, path: String, headers: HeaderMap) -> Response {
    let request = RequestContext { path, headers };

    let decision = match asset_key(&request.path, &state.index_file) {
        Some(key) => decide(&state, key, &request).await,
        None => {
            debug!("Rejected unsafe path");
            Decision::NotFound
        }
    };

    tracing::Span::current().record("outcome", decision.outcome());
    debug!(status = %decision.status(), "Served");
    decision.into_response()
}

/// Map a request path to a cache key, or `None` if it could escape the root.
///
/// The key is rebuilt from its normal components, so `css//a.css` and
/// `css/a.css` name the same record.
fn asset_key(path: &str, index_file: &str) -> Option<String> {
    let mut raw = path.trim_start_matches('/').to_string();
    if raw.is_empty() || raw.ends_with('/') {
        raw.push_str(index_file);
    }

    let mut parts = Vec::new();
    for component in FsPath::new(&raw).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

async fn decide(state: &WebState, key: String, request: &RequestContext) -> Decision {
    let path = state.root.join(&key);

    match lookup(state, path, key).await {
        Lookup::Found(record) => compose(state, &record, request),
        Lookup::Failed => Decision::ServerError,
        Lookup::Missing => match &state.unmatched {
            Unmatched::NotFound => Decision::NotFound,
            Unmatched::Redirect(target) => Decision::Redirect(target.clone()),
            Unmatched::Fallback { path, key } => {
                match lookup(state, path.clone(), key.clone()).await {
                    Lookup::Found(record) => compose(state, &record, request),
                    Lookup::Missing => {
                        warn!("Fallback file {} does not exist", path.display());
                        Decision::NotFound
                    }
                    Lookup::Failed => Decision::ServerError,
                }
            }
        },
    }
}

enum Lookup {
    Found(Arc<AssetRecord>),
    Missing,
    Failed,
}

/// Find a record in the cache and revalidate it, or read it from disk.
async fn lookup(state: &WebState, path: PathBuf, key: String) -> Lookup {
    if let Some(record) = state.cache.find_by_relative_path(&key) {
        let stale = Arc::clone(&record);
        return match tokio::task::spawn_blocking(move || stale.revalidate()).await {
            Ok(Ok(changed)) => {
                if changed {
                    let size = state.cache.recompute_size();
                    debug!(key = %key, cache_bytes = size, "Revalidated changed file");
                }
                Lookup::Found(record)
            }
            Ok(Err(e)) => {
                error!("Revalidation failed, keeping cached copy: {}", e);
                Lookup::Failed
            }
            Err(e) => {
                error!("Revalidation task failed: {}", e);
                Lookup::Failed
            }
        };
    }

    let loaded = tokio::task::spawn_blocking(move || AssetRecord::load(path, key)).await;
    let record = match loaded {
        Ok(Ok(record)) => Arc::new(record),
        Ok(Err(AssetError::NotFound { .. })) => return Lookup::Missing,
        Ok(Err(e)) => {
            error!("{}", e);
            return Lookup::Failed;
        }
        Err(e) => {
            error!("Read task failed: {}", e);
            return Lookup::Failed;
        }
    };

    if state.cache.is_enabled() {
        let admission = state.cache.push(Arc::clone(&record));
        debug!(key = record.relative_path(), ?admission, "Cache miss");
    }

    Lookup::Found(record)
}

/// Run the composer, then add the live-reload client to full HTML pages.
fn compose(state: &WebState, record: &AssetRecord, request: &RequestContext) -> Decision {
    let decision = state.composer.compose(record, request);

    let Some(live) = &state.live else {
        return decision;
    };

    match decision {
        Decision::Full { headers, body } if is_html(&headers) => {
            let modified = record.content().last_modified;
            let body = live
                .client
                .inject(&body, record.relative_path(), modified)
                .unwrap_or(body);
            Decision::Full { headers, body }
        }
        other => other,
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

/// WebSocket endpoint for live-reload subscribers
async fn live_socket(State(state): State<WebState>, ws: WebSocketUpgrade) -> Response {
    let Some(live) = state.live else {
        return Decision::NotFound.into_response();
    };
    ws.on_upgrade(move |socket| subscribe(socket, live))
}

async fn subscribe(socket: WebSocket, live: LiveState) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));
    live.broadcaster.add_connection(sink, stream);
}

/// Health check endpoint
async fn health(State(state): State<WebState>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": uptime.as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "cache": {
            "enabled": state.cache.is_enabled(),
            "files": state.cache.len(),
            "bytes": state.cache.current_size(),
            "capacity_bytes": state.cache.capacity_bytes(),
        },
        "live": {
            "enabled": state.live.is_some(),
            "subscribers": state.live.as_ref().map_or(0, |l| l.broadcaster.subscriber_count()),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::Broadcaster;
    use crate::respond::{Composer, StaticResponse};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use larderconf::HeadersConfig;
    use pantry::AssetCache;
    use std::fs::{self, File};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn setup_site() -> TempDir {
        let dir = TempDir::new().unwrap();
        let site = dir.path().join("site");
        fs::create_dir_all(site.join("docs")).unwrap();
        fs::write(site.join("hello.txt"), "Hello, larder!").unwrap();
        fs::write(site.join("index.html"), "<html><head></head><body>home</body></html>").unwrap();
        fs::write(site.join("docs/index.html"), "<html><head></head><body>docs</body></html>").unwrap();
        fs::write(site.join("404.html"), "<p>nothing here</p>").unwrap();
        fs::write(dir.path().join("secret.txt"), "do not serve").unwrap();
        dir
    }

    fn state_for(dir: &TempDir, cache: AssetCache) -> WebState {
        WebState::new(
            dir.path().join("site"),
            Arc::new(cache),
            Composer::new(HeadersConfig::default()),
        )
    }

    fn default_state(dir: &TempDir) -> WebState {
        state_for(dir, AssetCache::new(1024 * 1024, 64 * 1024))
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn get_with(app: Router, uri: &str, name: &str, value: &str) -> Response {
        app.oneshot(
            Request::builder()
                .uri(uri)
                .header(name, value)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_asset_key() {
        assert_eq!(asset_key("hello.txt", "index.html").as_deref(), Some("hello.txt"));
        assert_eq!(asset_key("", "index.html").as_deref(), Some("index.html"));
        assert_eq!(asset_key("docs/", "index.html").as_deref(), Some("docs/index.html"));
        assert_eq!(asset_key("../etc/passwd", "index.html"), None);
        assert_eq!(asset_key("docs/../../x", "index.html"), None);
        assert_eq!(asset_key("./hello.txt", "index.html"), None);

        // empty segments collapse
        assert_eq!(asset_key("css//a.css", "index.html").as_deref(), Some("css/a.css"));
        assert_eq!(asset_key("css///a.css", "index.html").as_deref(), Some("css/a.css"));
        assert_eq!(asset_key("docs//", "index.html").as_deref(), Some("docs/index.html"));
        assert_eq!(asset_key("//", "index.html").as_deref(), Some("index.html"));
    }

    #[tokio::test]
    async fn test_serves_file() {
        let dir = setup_site();
        let state = default_state(&dir);
        let cache = Arc::clone(&state.cache);

        let response = get(router(state), "/hello.txt").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "text/plain; charset=utf-8");
        assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "14");
        assert!(header_str(&response, header::ETAG).starts_with('"'));
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body_text(response).await, "Hello, larder!");

        // the miss was admitted
        assert!(cache.find_by_relative_path("hello.txt").is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = setup_site();
        let response = get(router(default_state(&dir)), "/missing.txt").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Not found");
    }

    #[tokio::test]
    async fn test_missing_file_redirects() {
        let dir = setup_site();
        let app = router(default_state(&dir).with_redirect("/"));

        let response = get(app, "/missing.txt").await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header_str(&response, header::LOCATION), "/");
    }

    #[tokio::test]
    async fn test_path_through_file_is_404() {
        let dir = setup_site();
        let app = router(default_state(&dir));

        for uri in ["/hello.txt/x", "/hello.txt/"] {
            let response = get(app.clone(), uri).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
            assert_eq!(body_text(response).await, "Not found");
        }
    }

    #[tokio::test]
    async fn test_path_through_file_redirects() {
        let dir = setup_site();
        let app = router(default_state(&dir).with_redirect("/"));

        let response = get(app, "/hello.txt/x").await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header_str(&response, header::LOCATION), "/");
    }

    #[tokio::test]
    async fn test_missing_file_uses_fallback() {
        let dir = setup_site();
        let app = router(default_state(&dir).with_fallback(FsPath::new("404.html")));

        let response = get(app.clone(), "/app/route").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<p>nothing here</p>");

        // real files are unaffected
        let response = get(app, "/hello.txt").await;
        assert_eq!(body_text(response).await, "Hello, larder!");
    }

    #[tokio::test]
    async fn test_directory_index() {
        let dir = setup_site();
        let app = router(default_state(&dir));

        let response = get(app.clone(), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("home"));

        let response = get(app, "/docs/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("docs"));
    }

    #[tokio::test]
    async fn test_directory_without_slash_is_not_served() {
        let dir = setup_site();
        let response = get(router(default_state(&dir)), "/docs").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_repeated_slashes_share_one_record() {
        let dir = setup_site();
        fs::create_dir_all(dir.path().join("site/css")).unwrap();
        fs::write(dir.path().join("site/css/a.css"), "a { }").unwrap();

        let state = default_state(&dir);
        let cache = Arc::clone(&state.cache);
        let app = router(state);

        for uri in ["/css/a.css", "/css//a.css", "/css///a.css"] {
            let response = get(app.clone(), uri).await;
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert_eq!(body_text(response).await, "a { }");
        }

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.relative_paths(), vec!["css/a.css"]);
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = setup_site();
        let response = get(router(default_state(&dir)), "/%2e%2e/secret.txt").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_if_none_match_not_modified() {
        let dir = setup_site();
        let app = router(default_state(&dir));

        let first = get(app.clone(), "/hello.txt").await;
        let etag = header_str(&first, header::ETAG).to_string();

        for _ in 0..2 {
            let response = get_with(app.clone(), "/hello.txt", "if-none-match", &etag).await;
            assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
            assert_eq!(header_str(&response, header::ETAG), etag);
            assert!(body_text(response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_range_request() {
        let dir = setup_site();
        let app = router(default_state(&dir));

        let response = get_with(app.clone(), "/hello.txt", "range", "bytes=0-4").await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 0-4/14");
        assert_eq!(body_text(response).await, "Hello");

        let response = get_with(app, "/hello.txt", "range", "bytes=40-50").await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes */14");
    }

    #[tokio::test]
    async fn test_changed_file_is_revalidated() -> anyhow::Result<()> {
        let dir = setup_site();
        let path = dir.path().join("site/hello.txt");
        let state = default_state(&dir);
        let cache = Arc::clone(&state.cache);
        let app = router(state);

        let first = get(app.clone(), "/hello.txt").await;
        let old_etag = header_str(&first, header::ETAG).to_string();

        fs::write(&path, "Hello again, larder!")?;
        let later = SystemTime::now() + Duration::from_secs(5);
        File::options().write(true).open(&path)?.set_modified(later)?;

        let second = get(app, "/hello.txt").await;
        assert_ne!(header_str(&second, header::ETAG), old_etag);
        assert_eq!(body_text(second).await, "Hello again, larder!");

        let record = cache.find_by_relative_path("hello.txt").expect("cached");
        assert_eq!(record.content().last_modified, fs::metadata(&path)?.modified()?);
        assert_eq!(cache.current_size(), 20);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_revalidation_keeps_stale_copy() -> anyhow::Result<()> {
        let dir = setup_site();
        let state = default_state(&dir);
        let cache = Arc::clone(&state.cache);
        let app = router(state);

        assert_eq!(get(app.clone(), "/hello.txt").await.status(), StatusCode::OK);
        fs::remove_file(dir.path().join("site/hello.txt"))?;

        let response = get(app, "/hello.txt").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal server error");

        let record = cache.find_by_relative_path("hello.txt").expect("still cached");
        assert_eq!(&record.content().bytes[..], b"Hello, larder!");
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_cache_still_serves() {
        let dir = setup_site();
        let state = state_for(&dir, AssetCache::disabled());
        let cache = Arc::clone(&state.cache);
        let app = router(state);

        for _ in 0..2 {
            let response = get(app.clone(), "/hello.txt").await;
            assert_eq!(body_text(response).await, "Hello, larder!");
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_file_served_uncached() {
        let dir = setup_site();
        let state = state_for(&dir, AssetCache::new(1024, 4));
        let cache = Arc::clone(&state.cache);

        let response = get(router(state), "/hello.txt").await;

        assert_eq!(body_text(response).await, "Hello, larder!");
        assert!(cache.find_by_relative_path("hello.txt").is_none());
    }

    #[tokio::test]
    async fn test_base_path() {
        let dir = setup_site();
        let app = router(default_state(&dir).with_base_path("/static/"));

        let response = get(app.clone(), "/static/hello.txt").await;
        assert_eq!(body_text(response).await, "Hello, larder!");

        let response = get(app.clone(), "/static/").await;
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(get(app, "/hello.txt").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_html_injected_only_when_live() {
        let dir = setup_site();

        let plain = get(router(default_state(&dir)), "/").await;
        assert!(!body_text(plain).await.contains("_serve:fname"));

        let state = default_state(&dir).with_live(Broadcaster::new(), true);
        let live = get(router(state), "/").await;
        let declared: usize = header_str(&live, header::CONTENT_LENGTH).parse().unwrap();
        let body = body_text(live).await;
        assert!(body.contains("<meta name=\"_serve:fname\" content=\"index.html\" />"));
        assert_eq!(declared, body.len());
    }

    #[tokio::test]
    async fn test_live_does_not_touch_non_html_or_ranges() {
        let dir = setup_site();
        let app = router(default_state(&dir).with_live(Broadcaster::new(), false));

        let text = get(app.clone(), "/hello.txt").await;
        assert_eq!(body_text(text).await, "Hello, larder!");

        let partial = get_with(app, "/", "range", "bytes=0-5").await;
        assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_text(partial).await, "<html>");
    }

    #[tokio::test]
    async fn test_hook_substitutes_response() {
        let dir = setup_site();
        let composer = Composer::new(HeadersConfig::default()).with_hook(
            |resp: &mut StaticResponse, req: &RequestContext| {
                if req.path == "hello.txt" {
                    resp.instead((StatusCode::IM_A_TEAPOT, "short and stout"));
                }
            },
        );
        let state = WebState::new(
            dir.path().join("site"),
            Arc::new(AssetCache::new(1024 * 1024, 64 * 1024)),
            composer,
        );

        let response = get(router(state), "/hello.txt").await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_live_endpoint_absent_without_watch() {
        let dir = setup_site();
        let response = get(router(default_state(&dir)), LIVE_ENDPOINT).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = setup_site();
        let app = router(default_state(&dir));
        let _ = get(app.clone(), "/hello.txt").await;

        let response = get(app, HEALTH_ENDPOINT).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["cache"]["files"], 1);
        assert_eq!(json["cache"]["bytes"], 14);
        assert_eq!(json["live"]["enabled"], false);
    }
}

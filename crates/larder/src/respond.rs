//! Response composition for a cached asset.
//!
//! [`Composer::compose`] turns an [`AssetRecord`] plus the request headers into
//! a [`Decision`]. The order is fixed: the pre-send hook runs first and may
//! replace the whole response, then conditional headers are checked, then the
//! `Range` header.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use larderconf::HeadersConfig;
use pantry::{AssetContent, AssetRecord};
use tracing::warn;

use crate::range::{ByteRange, Unsatisfiable};

/// Max-age a response starts with before config or hook overrides.
pub const DEFAULT_MAX_AGE: u64 = 86400;

/// What the pre-send hook gets to see of the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request path with the base path stripped.
    pub path: String,
    pub headers: HeaderMap,
}

/// Mutable description of a response that is about to be sent.
pub struct StaticResponse {
    content: Arc<AssetContent>,
    file_path: std::path::PathBuf,
    relative_path: String,
    content_type: String,
    instead: Option<Response>,
    pub cache_max_age: u64,
    pub no_cache: bool,
    pub accept_ranges: bool,
    pub is_private: bool,
}

impl StaticResponse {
    pub fn new(record: &AssetRecord) -> Self {
        let content = record.content();
        Self {
            content_type: content.content_type.clone(),
            content,
            file_path: record.path().to_path_buf(),
            relative_path: record.relative_path().to_string(),
            instead: None,
            cache_max_age: DEFAULT_MAX_AGE,
            no_cache: false,
            accept_ranges: true,
            is_private: false,
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// The bytes that will be sent. Cheap to clone and immutable.
    pub fn content(&self) -> Bytes {
        self.content.bytes.clone()
    }

    /// Detected type of the file, ignoring any override.
    pub fn detected_content_type(&self) -> &str {
        &self.content.content_type
    }

    /// Type that will be sent.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    /// `Last-Modified` value of the file.
    pub fn last_modified(&self) -> &str {
        &self.content.last_modified_http
    }

    /// Send `response` instead. Nothing else is evaluated.
    pub fn instead(&mut self, response: impl IntoResponse) {
        self.instead = Some(response.into_response());
    }

    /// `Cache-Control` value for this response under `policy`.
    pub fn cache_control(&self, policy: &HeadersConfig) -> String {
        let mut value = String::from(if self.is_private { "private" } else { "public" });

        if self.no_cache || policy.no_cache {
            value.push_str(", no-cache");
        } else if self.cache_max_age != 0 {
            let max_age = if policy.max_age != 0 {
                policy.max_age
            } else {
                self.cache_max_age
            };
            value.push_str(&format!(", must-revalidate, max-age={}", max_age));
        }

        value
    }
}

/// Hook run on every response before headers are decided.
pub trait BeforeSend: Send + Sync + 'static {
    fn before_send(&self, response: &mut StaticResponse, request: &RequestContext);
}

impl<F> BeforeSend for F
where
    F: Fn(&mut StaticResponse, &RequestContext) + Send + Sync + 'static,
{
    fn before_send(&self, response: &mut StaticResponse, request: &RequestContext) {
        self(response, request)
    }
}

/// Terminal outcome for one request.
pub enum Decision {
    /// The hook supplied its own response.
    Substituted(Response),
    NotModified(HeaderMap),
    Partial { headers: HeaderMap, body: Bytes },
    Full { headers: HeaderMap, body: Bytes },
    RangeNotSatisfiable(HeaderMap),
    Redirect(String),
    NotFound,
    ServerError,
}

impl Decision {
    /// Short label for logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Substituted(_) => "substituted",
            Decision::NotModified(_) => "not_modified",
            Decision::Partial { .. } => "partial",
            Decision::Full { .. } => "full",
            Decision::RangeNotSatisfiable(_) => "range_not_satisfiable",
            Decision::Redirect(_) => "redirect",
            Decision::NotFound => "not_found",
            Decision::ServerError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Decision::Substituted(r) => r.status(),
            Decision::NotModified(_) => StatusCode::NOT_MODIFIED,
            Decision::Partial { .. } => StatusCode::PARTIAL_CONTENT,
            Decision::Full { .. } => StatusCode::OK,
            Decision::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Decision::Redirect(_) => StatusCode::FOUND,
            Decision::NotFound => StatusCode::NOT_FOUND,
            Decision::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Decision {
    fn into_response(self) -> Response {
        match self {
            Decision::Substituted(response) => response,
            Decision::NotModified(headers) => with_body(StatusCode::NOT_MODIFIED, headers, Body::empty()),
            Decision::Partial { mut headers, body } => {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                with_body(StatusCode::PARTIAL_CONTENT, headers, Body::from(body))
            }
            Decision::Full { mut headers, body } => {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                with_body(StatusCode::OK, headers, Body::from(body))
            }
            Decision::RangeNotSatisfiable(headers) => {
                with_body(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty())
            }
            Decision::Redirect(target) => match HeaderValue::from_str(&target) {
                Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
                Err(_) => {
                    warn!("Redirect target is not a valid header value: {:?}", target);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
                }
            },
            Decision::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            Decision::ServerError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

fn with_body(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Decides responses for cached assets under a header policy.
#[derive(Clone)]
pub struct Composer {
    policy: HeadersConfig,
    hook: Option<Arc<dyn BeforeSend>>,
}

impl Composer {
    pub fn new(policy: HeadersConfig) -> Self {
        Self { policy, hook: None }
    }

    pub fn with_hook(mut self, hook: impl BeforeSend) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn policy(&self) -> &HeadersConfig {
        &self.policy
    }

    pub fn compose(&self, record: &AssetRecord, request: &RequestContext) -> Decision {
        let mut response = StaticResponse::new(record);

        if let Some(hook) = &self.hook {
            hook.before_send(&mut response, request);
            if let Some(instead) = response.instead.take() {
                return Decision::Substituted(instead);
            }
        }

        let content = response.content.clone();

        if is_not_modified(&content, &request.headers) {
            let mut headers = HeaderMap::new();
            set(&mut headers, header::LAST_MODIFIED, &content.last_modified_http);
            set(&mut headers, header::DATE, &httpdate::fmt_http_date(SystemTime::now()));
            if !self.policy.no_etag {
                set(&mut headers, header::ETAG, &content.fingerprint.entity_tag());
            }
            return Decision::NotModified(headers);
        }

        let mut headers = HeaderMap::new();
        set(&mut headers, header::LAST_MODIFIED, &content.last_modified_http);
        set(&mut headers, header::DATE, &httpdate::fmt_http_date(SystemTime::now()));
        set(&mut headers, header::CONTENT_TYPE, response.content_type());
        set(&mut headers, header::CACHE_CONTROL, &response.cache_control(&self.policy));
        if !self.policy.no_etag {
            set(&mut headers, header::ETAG, &content.fingerprint.entity_tag());
        }

        if response.accept_ranges && self.policy.ranges {
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

            let requested = request
                .headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(ByteRange::parse);

            if let Some(requested) = requested {
                let total = content.len() as u64;
                match requested.resolve(total) {
                    Ok(span) => {
                        let (start, end) = (*span.start(), *span.end());
                        set(
                            &mut headers,
                            header::CONTENT_RANGE,
                            &format!("bytes {}-{}/{}", start, end, total),
                        );
                        let body = content.bytes.slice(start as usize..=end as usize);
                        return Decision::Partial { headers, body };
                    }
                    Err(Unsatisfiable { len }) => {
                        let mut headers = HeaderMap::new();
                        set(&mut headers, header::CONTENT_RANGE, &format!("bytes */{}", len));
                        set(&mut headers, header::DATE, &httpdate::fmt_http_date(SystemTime::now()));
                        return Decision::RangeNotSatisfiable(headers);
                    }
                }
            }
        }

        Decision::Full {
            headers,
            body: content.bytes.clone(),
        }
    }
}

/// `If-None-Match` alone decides when present; otherwise `If-Modified-Since`
/// is compared at whole-second precision.
fn is_not_modified(content: &AssetContent, request: &HeaderMap) -> bool {
    if let Some(value) = request.get(header::IF_NONE_MATCH) {
        return value
            .to_str()
            .map(|v| content.fingerprint.matches_if_none_match(v))
            .unwrap_or(false);
    }

    let since = request
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok());

    match since {
        Some(since) => truncate_to_seconds(content.last_modified) <= since,
        None => false,
    }
}

fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => warn!("Dropping invalid {} header value {:?}", name, value),
    }
}

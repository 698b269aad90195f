//! Live-reload snippet injection into HTML pages.
//!
//! The snippet goes right before the first `</head>`: three `_serve:*` meta
//! tags describing the page, a small config object and the client script.
//! Pages without a `</head>` are left alone.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

/// Client script served inline in every injected page.
pub const LIVE_CLIENT: &str = include_str!("../assets/live-reload.js");

/// Settings rendered into the injected config object.
#[derive(Debug, Clone)]
pub struct LiveClient {
    /// WebSocket path the client connects to.
    pub endpoint: String,
    pub auto_reload: bool,
}

impl LiveClient {
    /// Insert the snippet into `html`, or `None` when there is no `</head>`.
    pub fn inject(&self, html: &[u8], relative_path: &str, modified: SystemTime) -> Option<Bytes> {
        let at = find_head_end(html)?;
        let snippet = self.snippet(relative_path, modified, html.len());

        let mut out = BytesMut::with_capacity(html.len() + snippet.len());
        out.put_slice(&html[..at]);
        out.put_slice(snippet.as_bytes());
        out.put_slice(&html[at..]);
        Some(out.freeze())
    }

    fn snippet(&self, relative_path: &str, modified: SystemTime, size: usize) -> String {
        let mtime_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        let config = serde_json::json!({
            "endpoint": self.endpoint,
            "autoReload": self.auto_reload,
        });

        format!(
            concat!(
                "<meta name=\"_serve:fname\" content=\"{fname}\" />\n",
                "<meta name=\"_serve:mtime\" content=\"{mtime}\" />\n",
                "<meta name=\"_serve:fsize\" content=\"{fsize}\" />\n",
                "<script>window.__larder = {config};</script>\n",
                "<script>\n{client}</script>\n",
            ),
            fname = escape_attr(relative_path),
            mtime = mtime_ms,
            fsize = size,
            config = escape_script(&config.to_string()),
            client = LIVE_CLIENT,
        )
    }
}

fn find_head_end(html: &[u8]) -> Option<usize> {
    const NEEDLE: &[u8] = b"</head>";
    html.windows(NEEDLE.len())
        .position(|w| w.eq_ignore_ascii_case(NEEDLE))
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Keep a JSON literal from closing the surrounding `<script>`.
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/")
}

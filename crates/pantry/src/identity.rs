//! Content-type classification for cached assets.
//!
//! Classification starts from the bytes: a sniffer in the style of the WHATWG
//! MIME sniffing algorithm looks at the first 512 bytes. The file extension
//! only refines the generic answers:
//!
//! - `.svg` is always `image/svg+xml; charset=utf-8`.
//! - generic plain text is narrowed to html/css/javascript/typescript/json/xml
//!   by extension, keeping the sniffed charset parameter.
//! - the generic binary fallback is looked up in the `mime_guess` table.
//!
//! A specific sniffed type (png, pdf, html...) is never overridden except by
//! `.svg`.

use std::path::Path;

/// Number of leading bytes the sniffer considers.
pub const SNIFF_LEN: usize = 512;

/// Generic text classification returned by the sniffer.
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Generic binary classification returned by the sniffer.
pub const OCTET_STREAM: &str = "application/octet-stream";

const SVG: &str = "image/svg+xml; charset=utf-8";

/// Classify `data` that was read from `path`.
pub fn detect_content_type(path: &Path, data: &[u8]) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if ext == "svg" {
        return SVG.to_string();
    }

    let sniffed = sniff(data);

    if sniffed.starts_with("text/plain") {
        let narrowed = match ext.as_str() {
            "html" | "htm" => Some("text/html"),
            "css" => Some("text/css"),
            "js" | "mjs" | "cjs" => Some("text/javascript"),
            "ts" | "mts" | "cts" => Some("text/typescript"),
            "json" => Some("application/json"),
            "xml" => Some("application/xml"),
            _ => None,
        };
        if let Some(narrowed) = narrowed {
            return sniffed.replacen("text/plain", narrowed, 1);
        }
        return sniffed.to_string();
    }

    if sniffed == OCTET_STREAM {
        if let Some(guess) = mime_guess::from_path(path).first_raw() {
            return guess.to_string();
        }
    }

    sniffed.to_string()
}

/// Sniff a content type from the leading bytes of `data`.
pub fn sniff(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    if let Some(html) = sniff_markup(data) {
        return html;
    }

    for (signature, content_type) in EXACT_SIGNATURES {
        if data.starts_with(signature) {
            return content_type;
        }
    }

    if data.len() >= 12 && &data[0..4] == b"RIFF" {
        match &data[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wave",
            b"AVI " => return "video/avi",
            _ => {}
        }
    }

    if is_mp4(data) {
        return "video/mp4";
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN
    }
}

const EXACT_SIGNATURES: &[(&[u8], &str)] = &[
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", TEXT_PLAIN),
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"BM", "image/bmp"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x00\x00\x02\x00", "image/x-icon"),
    (b"OggS\x00", "application/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"\x1A\x45\xDF\xA3", "video/webm"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    (b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    (b"\x00asm", "application/wasm"),
];

/// Tags that identify an HTML document when they open the (whitespace
/// trimmed) content, compared case-insensitively and followed by a space or
/// `>`.
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

fn sniff_markup(data: &[u8]) -> Option<&'static str> {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))?;
    let data = &data[start..];

    if data.starts_with(b"<?xml") {
        return Some("text/xml; charset=utf-8");
    }

    for tag in HTML_TAGS {
        if data.len() <= tag.len() {
            continue;
        }
        if !data[..tag.len()].eq_ignore_ascii_case(tag) {
            continue;
        }
        if matches!(data[tag.len()], b' ' | b'>') {
            return Some("text/html; charset=utf-8");
        }
    }

    None
}

fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if box_size % 4 != 0 || box_size < 12 || data.len() < box_size {
        return false;
    }
    if &data[4..8] != b"ftyp" {
        return false;
    }
    (8..box_size).step_by(4).any(|i| {
        // Skip the minor version field at offset 12.
        i != 12 && data.len() >= i + 3 && &data[i..i + 3] == b"mp4"
    })
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

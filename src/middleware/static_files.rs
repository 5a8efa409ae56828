//! Static file serving with byte-range support.
//!
//! # Responsibilities
//! - Map `{prefix}/a/b.txt` onto `{root}/a/b.txt`, directories onto the index file
//! - Refuse traversal (`..`, backslashes, NUL) by passing the request on
//! - Answer `Range: bytes=` with `206` and `Content-Range`, everything else
//!   with `200` and the full file
//! - Stream the selected window in fixed-size chunks
//!
//! Requests that do not resolve to a regular file continue down the chain.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{header, Method, StatusCode};

use crate::config::StaticFilesConfig;
use crate::container::Container;
use crate::http::response::{FileWindow, DEFAULT_CHUNK_SIZE};
use crate::http::RequestContext;
use crate::middleware::mime::MimeTable;
use crate::middleware::range::{parse_range, ByteRange};
use crate::pipeline::{Middleware, MiddlewareResult, Next};

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    prefix: String,
    index_file: Option<String>,
    chunk_size: usize,
    mime: MimeTable,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: String::new(),
            index_file: Some("index.html".to_string()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            mime: MimeTable::default(),
        }
    }

    pub fn from_config(config: &StaticFilesConfig) -> Self {
        Self::new(&config.root)
            .prefix(&config.prefix)
            .index_file(Some(config.index_file.clone()).filter(|f| !f.is_empty()))
            .chunk_size(config.chunk_size)
            .mime_table(MimeTable::with_overrides(&config.mime_types))
    }

    /// URL prefix the files are mounted under, e.g. `/assets`.
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn index_file(mut self, index_file: Option<String>) -> Self {
        self.index_file = index_file;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn mime_table(mut self, mime: MimeTable) -> Self {
        self.mime = mime;
        self
    }

    /// File-system path for a request path, if it lies inside the mount.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let rest = if self.prefix.is_empty() {
            request_path
        } else {
            let rest = request_path.strip_prefix(&self.prefix)?;
            if !rest.is_empty() && !rest.starts_with('/') {
                return None;
            }
            rest
        };

        let decoded = percent_decode(rest)?;
        let mut path = self.root.clone();
        for segment in decoded.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." || segment.contains('\\') || segment.contains('\0') {
                return None;
            }
            path.push(segment);
        }
        if path.is_dir() {
            path.push(self.index_file.as_ref()?);
        }
        Some(path)
    }

    fn serve(&self, ctx: &mut RequestContext, path: &Path, metadata: &Metadata, head_only: bool) {
        let size = metadata.len();
        let response = &mut ctx.response;

        response.set_content_type(self.mime.lookup(path));
        response.set_header(header::ACCEPT_RANGES.as_str(), "bytes");
        if let Some(modified) = metadata.modified().ok().and_then(http_date) {
            response.set_header(header::LAST_MODIFIED.as_str(), &modified);
        }

        let window = match ctx.request.header(header::RANGE.as_str()).map(|h| parse_range(h, size)) {
            Some(Ok(range)) => {
                response.set_status(StatusCode::PARTIAL_CONTENT);
                response.set_header(header::CONTENT_RANGE.as_str(), &range.content_range(size));
                Some(range)
            }
            Some(Err(err)) => {
                tracing::debug!(path = %path.display(), error = %err, "Ignoring range header");
                response.set_status(StatusCode::OK);
                full_window(size)
            }
            None => {
                response.set_status(StatusCode::OK);
                full_window(size)
            }
        };

        let length = window.map(|w| w.len()).unwrap_or(0);
        response.set_header(header::CONTENT_LENGTH.as_str(), &length.to_string());

        if let (Some(window), false) = (window, head_only) {
            response.send_file(FileWindow::new(path, window.start, window.end, self.chunk_size));
        }

        tracing::debug!(
            path = %path.display(),
            size,
            status = response.status().as_u16(),
            length,
            "Serving static file"
        );
    }
}

impl Middleware for StaticFiles {
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult {
        let method = ctx.request.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return next.run(scope, ctx);
        }
        let head_only = method == Method::HEAD;

        let Some(path) = self.resolve(ctx.request.path()) else {
            return next.run(scope, ctx);
        };
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return next.run(scope, ctx),
        };

        self.serve(ctx, &path, &metadata, head_only);
        Ok(())
    }

    fn name(&self) -> &str {
        "static_files"
    }
}

fn full_window(size: u64) -> Option<ByteRange> {
    (size > 0).then(|| ByteRange { start: 0, end: size - 1 })
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

const WEEKDAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
fn http_date(time: SystemTime) -> Option<String> {
    let secs = time.duration_since(UNIX_EPOCH).ok()?.as_secs();
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3_600, (rem % 3_600) / 60, rem % 60);

    // Civil date from days since 1970-01-01.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    Some(format!(
        "{}, {day:02} {} {year} {hour:02}:{minute:02}:{second:02} GMT",
        WEEKDAYS[(days % 7) as usize],
        MONTHS[(month - 1) as usize],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn http_dates() {
        assert_eq!(http_date(UNIX_EPOCH).unwrap(), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(
            http_date(UNIX_EPOCH + Duration::from_secs(784_111_777)).unwrap(),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
        assert_eq!(
            http_date(UNIX_EPOCH + Duration::from_secs(951_782_400)).unwrap(),
            "Tue, 29 Feb 2000 00:00:00 GMT"
        );
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("/a%20b.txt").unwrap(), "/a b.txt");
        assert_eq!(percent_decode("/%2e%2e/x").unwrap(), "/../x");
        assert!(percent_decode("/bad%zz").is_none());
        assert!(percent_decode("/cut%2").is_none());
    }

    #[test]
    fn resolve_respects_mount_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        let files = StaticFiles::new(dir.path()).prefix("/assets/");

        assert_eq!(files.resolve("/assets/a.txt"), Some(dir.path().join("a.txt")));
        assert_eq!(files.resolve("/assets/docs"), Some(dir.path().join("docs").join("index.html")));
        assert_eq!(files.resolve("/assetsx/a.txt"), None);
        assert_eq!(files.resolve("/other/a.txt"), None);
        assert_eq!(files.resolve("/assets/../secret"), None);
        assert_eq!(files.resolve("/assets/%2e%2e/secret"), None);
    }
}

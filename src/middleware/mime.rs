//! Extension → content-type table.

use std::collections::HashMap;
use std::path::Path;

pub const FALLBACK_MIME: &str = "application/octet-stream";

const BUILTIN: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("txt", "text/plain; charset=utf-8"),
    ("xml", "application/xml"),
    ("csv", "text/csv; charset=utf-8"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("wasm", "application/wasm"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

#[derive(Debug, Clone)]
pub struct MimeTable {
    types: HashMap<String, String>,
}

impl Default for MimeTable {
    fn default() -> Self {
        Self {
            types: BUILTIN
                .iter()
                .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
                .collect(),
        }
    }
}

impl MimeTable {
    /// Built-in table with `overrides` applied. Keys may carry a leading dot.
    pub fn with_overrides<'a>(overrides: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut table = Self::default();
        for (ext, mime) in overrides {
            table.insert(ext, mime);
        }
        table
    }

    pub fn insert(&mut self, extension: &str, mime: &str) {
        self.types.insert(normalize(extension), mime.to_string());
    }

    pub fn lookup(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.types.get(&normalize(ext)))
            .map(String::as_str)
            .unwrap_or(FALLBACK_MIME)
    }
}

fn normalize(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_fallback() {
        let mut table = MimeTable::default();
        table.insert(".BIN", "application/x-custom");
        assert_eq!(table.lookup(Path::new("a/b/INDEX.HTML")), "text/html; charset=utf-8");
        assert_eq!(table.lookup(Path::new("blob.bin")), "application/x-custom");
        assert_eq!(table.lookup(Path::new("noext")), FALLBACK_MIME);
        assert_eq!(table.lookup(Path::new("x.unknown")), FALLBACK_MIME);
    }
}

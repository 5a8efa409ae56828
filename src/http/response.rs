//! Mutable response view and response bodies.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use futures_util::Stream;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::container::{Injectable, TypeDescriptor};
use crate::http::cookie::Cookie;
use crate::http::transport::Outgoing;
use crate::http::websocket::PendingSession;
use crate::pipeline::DispatchOutcome;

/// Default streaming chunk for file windows.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// An inclusive byte window of a file, streamed in fixed-size chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWindow {
    pub path: PathBuf,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub chunk_size: usize,
}

impl FileWindow {
    pub fn new(path: impl Into<PathBuf>, start: u64, end: u64, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            start,
            end,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn len(&self) -> u64 {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking chunk iterator over the window.
    pub fn chunks(&self) -> io::Result<FileChunks> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.start))?;
        Ok(FileChunks {
            file,
            remaining: self.len(),
            chunk_size: self.chunk_size,
        })
    }

    /// Async chunk stream over the window for the transport.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        struct State {
            file: Option<tokio::fs::File>,
            window: FileWindow,
            remaining: u64,
        }

        let remaining = self.len();
        let state = State {
            file: None,
            window: self,
            remaining,
        };

        futures_util::stream::unfold(state, |mut state| async move {
            if state.remaining == 0 {
                return None;
            }
            if state.file.is_none() {
                let opened = async {
                    let mut file = tokio::fs::File::open(&state.window.path).await?;
                    file.seek(SeekFrom::Start(state.window.start)).await?;
                    Ok::<_, io::Error>(file)
                }
                .await;
                match opened {
                    Ok(file) => state.file = Some(file),
                    Err(e) => {
                        state.remaining = 0;
                        return Some((Err(e), state));
                    }
                }
            }

            let want = state.remaining.min(state.window.chunk_size as u64) as usize;
            let mut buf = vec![0u8; want];
            let read = match state.file.as_mut() {
                Some(file) => file.read(&mut buf).await,
                None => Ok(0),
            };
            match read {
                Ok(0) => {
                    state.remaining = 0;
                    Some((Err(io::ErrorKind::UnexpectedEof.into()), state))
                }
                Ok(n) => {
                    buf.truncate(n);
                    state.remaining -= n as u64;
                    Some((Ok(Bytes::from(buf)), state))
                }
                Err(e) => {
                    state.remaining = 0;
                    Some((Err(e), state))
                }
            }
        })
    }
}

/// Blocking iterator produced by [`FileWindow::chunks`].
pub struct FileChunks {
    file: File,
    remaining: u64,
    chunk_size: usize,
}

impl Iterator for FileChunks {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let want = self.remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        match self.file.read(&mut buf) {
            Ok(0) => {
                self.remaining = 0;
                Some(Err(io::ErrorKind::UnexpectedEof.into()))
            }
            Ok(n) => {
                buf.truncate(n);
                self.remaining -= n as u64;
                Some(Ok(buf))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

/// Response payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    File(FileWindow),
}

impl ResponseBody {
    /// Buffered bytes, if the body is in memory.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseBody::Empty => Some(&[]),
            ResponseBody::Bytes(bytes) => Some(bytes),
            ResponseBody::File(_) => None,
        }
    }

    /// Read the whole body, including file windows. Meant for tests and
    /// small bodies.
    pub fn collect(&self) -> io::Result<Vec<u8>> {
        match self {
            ResponseBody::File(window) => {
                let mut out = Vec::with_capacity(window.len() as usize);
                for chunk in window.chunks()? {
                    out.extend_from_slice(&chunk?);
                }
                Ok(out)
            }
            other => Ok(other.as_bytes().unwrap_or_default().to_vec()),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            ResponseBody::Empty => 0,
            ResponseBody::Bytes(bytes) => bytes.len() as u64,
            ResponseBody::File(window) => window.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Response view handed to middleware through the request context.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    upgrade: Option<PendingSession>,
    touched: bool,
    error_body: bool,
}

impl Injectable for Response {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Vec::new(), |_| Ok(Response::new()))
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
            upgrade: None,
            touched: false,
            error_body: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.touched = true;
    }

    /// Raise the status to at least `floor`; a higher status already set is
    /// kept.
    pub fn raise_status(&mut self, floor: StatusCode) {
        if self.status.as_u16() < floor.as_u16() {
            self.status = floor;
        }
        self.touched = true;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.touched = true;
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
        self.touched = true;
    }

    /// Set a header from text. Invalid names or values are dropped with a
    /// warning; returns whether the header was set.
    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.insert_header(name, value);
                true
            }
            _ => {
                tracing::warn!(header = %name, "Dropping invalid response header");
                false
            }
        }
    }

    /// Set a header only when it is not present yet.
    pub fn set_default_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.headers.contains_key(&name) {
            self.headers.insert(name, value);
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn set_content_type(&mut self, content_type: &str) -> bool {
        self.set_header(header::CONTENT_TYPE.as_str(), content_type)
    }

    pub fn set_cookie(&mut self, cookie: &Cookie) -> bool {
        match HeaderValue::try_from(cookie.to_string()) {
            Ok(value) => {
                self.headers.append(header::SET_COOKIE, value);
                self.touched = true;
                true
            }
            Err(_) => {
                tracing::warn!(cookie = %cookie.name, "Dropping invalid cookie");
                false
            }
        }
    }

    pub fn delete_cookie(&mut self, name: &str) -> bool {
        self.set_cookie(&Cookie::removal(name))
    }

    /// Append to the output buffer. A file body is replaced by the buffer.
    pub fn write(&mut self, bytes: &[u8]) {
        match &mut self.body {
            ResponseBody::Bytes(buffer) => buffer.extend_from_slice(bytes),
            body => *body = ResponseBody::Bytes(bytes.to_vec()),
        }
        self.touched = true;
    }

    pub fn write_str(&mut self, text: &str) {
        self.write(text.as_bytes());
    }

    /// Replace the body with `value` serialized as JSON.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.set_content_type("application/json");
        self.body = ResponseBody::Bytes(body);
        self.touched = true;
        Ok(())
    }

    /// Respond with a window of a file.
    pub fn send_file(&mut self, window: FileWindow) {
        self.body = ResponseBody::File(window);
        self.touched = true;
    }

    pub fn redirect(&mut self, location: &str, status: StatusCode) {
        self.set_status(status);
        self.set_header(header::LOCATION.as_str(), location);
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn clear_body(&mut self) {
        self.body = ResponseBody::Empty;
        self.error_body = false;
    }

    /// Mark the current body as the rendering of a failure, so the dispatcher
    /// keeps it instead of writing its own.
    pub fn mark_error_body(&mut self) {
        self.error_body = true;
    }

    pub fn has_error_body(&self) -> bool {
        self.error_body && !self.body.is_empty()
    }

    /// Whether anything changed status, headers or body. Default headers set by
    /// the dispatcher do not count.
    pub fn is_touched(&self) -> bool {
        self.touched
    }

    /// Stage an accepted WebSocket session; the transport performs the upgrade.
    pub fn accept_upgrade(&mut self, session: PendingSession) {
        self.status = StatusCode::SWITCHING_PROTOCOLS;
        self.upgrade = Some(session);
        self.touched = true;
    }

    pub fn has_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    pub(crate) fn into_outgoing(self, outcome: DispatchOutcome) -> Outgoing {
        Outgoing {
            status: self.status,
            headers: self.headers,
            body: self.body,
            upgrade: self.upgrade,
            outcome,
        }
    }
}

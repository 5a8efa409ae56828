//! Read-only request view.
//!
//! Parsed once per request from the shared [`RawRequest`]: query pairs,
//! cookies, form fields and JSON body are decoded eagerly so the pipeline can
//! look values up without re-parsing.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::http::{header, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::config::HttpConfig;
use crate::container::{Injectable, Param, TypeDescriptor};
use crate::http::cookie::parse_cookie_header;
use crate::http::transport::RawRequest;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Longest inbound request id that is propagated instead of replaced.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Coarse client category derived from the `User-Agent` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceClass {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.trim().is_empty() {
            return DeviceClass::Unknown;
        }
        if ["bot", "spider", "crawl", "slurp"].iter().any(|m| ua.contains(m)) {
            return DeviceClass::Bot;
        }
        if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
            return DeviceClass::Tablet;
        }
        if ["mobi", "iphone", "ipod", "android", "windows phone"]
            .iter()
            .any(|m| ua.contains(m))
        {
            return DeviceClass::Mobile;
        }
        DeviceClass::Desktop
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Bot => "bot",
            DeviceClass::Unknown => "unknown",
        }
    }
}

/// Where [`Request::param`] found a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    Body,
    Query,
    Cookie,
    Header,
}

/// A looked-up parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue<'a> {
    /// A field of a JSON request body.
    Json(&'a Value),
    /// A form field, query pair, cookie or header.
    Text(&'a str),
}

impl<'a> ParamValue<'a> {
    /// The value as text; JSON strings are unquoted, other JSON is rendered.
    pub fn as_text(&self) -> Cow<'a, str> {
        match self {
            ParamValue::Json(Value::String(s)) => Cow::Borrowed(s.as_str()),
            ParamValue::Json(other) => Cow::Owned(other.to_string()),
            ParamValue::Text(s) => Cow::Borrowed(s),
        }
    }

    /// Deserialize into `T`. Text is read as JSON first and, failing that, as
    /// a plain JSON string, so `?id=7` and `?name=bob` both bind naturally.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            ParamValue::Json(value) => T::deserialize(*value),
            ParamValue::Text(text) => serde_json::from_str(text)
                .or_else(|_| serde_json::from_value(Value::String((*text).to_string()))),
        }
    }
}

/// Request view handed to middleware through the request context.
#[derive(Debug, Clone)]
pub struct Request {
    raw: Arc<RawRequest>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    json: Option<Value>,
    remote_ip: IpAddr,
    device: DeviceClass,
    request_id: String,
}

impl Injectable for Request {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(
            vec![
                Param::of::<RawRequest>("raw"),
                Param::of::<HttpConfig>("http").or_value(HttpConfig::default()),
            ],
            |args| {
                let raw = args.shared::<RawRequest>()?;
                let http = args.shared::<HttpConfig>()?;
                Ok(Request::from_raw(raw, http.trust_proxy_headers))
            },
        )
    }
}

impl Request {
    /// Decode a raw request. With `trust_proxy_headers`, the client address is
    /// taken from `X-Forwarded-For` / `X-Real-IP` when present.
    pub fn from_raw(raw: Arc<RawRequest>, trust_proxy_headers: bool) -> Self {
        let query = raw
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let cookies = raw
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_cookie_header)
            .collect();

        let content_type = raw
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let json = if content_type.contains("json") && !raw.body.is_empty() {
            serde_json::from_slice(&raw.body).ok()
        } else {
            None
        };

        let form = if content_type.starts_with("application/x-www-form-urlencoded") {
            url::form_urlencoded::parse(&raw.body).into_owned().collect()
        } else {
            Vec::new()
        };

        let remote_ip = if trust_proxy_headers {
            forwarded_ip(&raw.headers).unwrap_or_else(|| raw.remote_addr.ip())
        } else {
            raw.remote_addr.ip()
        };

        let device = DeviceClass::from_user_agent(
            raw.headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
        );

        let request_id = raw
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            raw,
            query,
            form,
            cookies,
            json,
            remote_ip,
            device,
            request_id,
        }
    }

    pub fn method(&self) -> &Method {
        &self.raw.method
    }

    pub fn uri(&self) -> &Uri {
        &self.raw.uri
    }

    pub fn path(&self) -> &str {
        self.raw.uri.path()
    }

    pub fn query_string(&self) -> Option<&str> {
        self.raw.uri.query()
    }

    /// First query value for `name`.
    pub fn query(&self, name: &str) -> Option<&str> {
        find(&self.query, name)
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.raw.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.raw.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        find(&self.cookies, name)
    }

    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// First urlencoded form field for `name`.
    pub fn form(&self, name: &str) -> Option<&str> {
        find(&self.form, name)
    }

    pub fn body(&self) -> &[u8] {
        &self.raw.body
    }

    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.raw.body).ok()
    }

    /// Body parsed as JSON, when it was sent as JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Deserialize the body into `T` regardless of its content type.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.raw.body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.raw.remote_addr
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    /// Correlation id: the caller's `X-Request-Id`, or a fresh UUID.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header(header::UPGRADE.as_str())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// Sub-protocols offered in `Sec-WebSocket-Protocol`, in client order.
    pub fn websocket_protocols(&self) -> Vec<&str> {
        self.raw
            .headers
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Look up a named value: body (JSON field or form field), then query
    /// string, then cookies, then headers.
    pub fn param(&self, name: &str) -> Option<ParamValue<'_>> {
        self.lookup(name).map(|(_, value)| value)
    }

    /// Which source [`param`](Self::param) would read `name` from.
    pub fn param_source(&self, name: &str) -> Option<ParamSource> {
        self.lookup(name).map(|(source, _)| source)
    }

    fn lookup(&self, name: &str) -> Option<(ParamSource, ParamValue<'_>)> {
        if let Some(value) = self.json.as_ref().and_then(|body| body.get(name)) {
            return Some((ParamSource::Body, ParamValue::Json(value)));
        }
        if let Some(value) = self.form(name) {
            return Some((ParamSource::Body, ParamValue::Text(value)));
        }
        if let Some(value) = self.query(name) {
            return Some((ParamSource::Query, ParamValue::Text(value)));
        }
        if let Some(value) = self.cookie(name) {
            return Some((ParamSource::Cookie, ParamValue::Text(value)));
        }
        self.header(name)
            .map(|value| (ParamSource::Header, ParamValue::Text(value)))
    }
}

fn find<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    })
}

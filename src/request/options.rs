//! Per-call request options and their normalization.
//!
//! [`RequestOptions`] is the caller-facing option bag. [`normalize`] validates
//! it once and produces a [`PreparedRequest`], the fully-resolved descriptor
//! consumed by the encoder and dispatcher. All validation that does not need
//! I/O happens here, before any file is touched or socket opened.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::warn;
use url::Url;

use super::constants::{APPLICATION_JSON, DEFAULT_FILE_FIELD, FORM_URLENCODED, OCTET_STREAM, TEXT_PLAIN};
use super::cookies::{Cookie, cookie_header_value};
use super::error::RequestError;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    /// GET; never carries a body.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
    /// OPTIONS.
    Options,
}

impl Verb {
    /// Returns the method name as sent on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    pub(crate) fn to_method(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// UTF-8 text, sent as `text/plain` unless a content type is set.
    Text(String),
    /// Raw bytes, sent as `application/octet-stream` unless a content type is set.
    Bytes(Vec<u8>),
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// A local file to upload as one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Form field name of the part.
    pub field: String,
    /// Path of the file; must exist and be readable at encode time.
    pub path: PathBuf,
}

impl UploadFile {
    /// Creates an upload under the default field name (`file`).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_field(DEFAULT_FILE_FIELD, path)
    }

    /// Creates an upload under an explicit field name.
    #[must_use]
    pub fn with_field(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            path: path.into(),
        }
    }

    /// Basename sent in the part's `filename` parameter.
    pub(crate) fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.field.clone())
    }
}

impl From<PathBuf> for UploadFile {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for UploadFile {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<&str> for UploadFile {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Basic authentication credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name.
    pub username: String,
    /// Password (sensitive; never log).
    pub password: Option<String>,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Options for a single request.
///
/// Every field is optional; `RequestOptions::default()` (or passing `None`
/// to a dispatch method) means: method GET, no extra headers, no body, no
/// files, no deadline.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use httpreq::RequestOptions;
///
/// let options = RequestOptions::new()
///     .header("X-Trace", "1")
///     .body("wacky wheels")
///     .timeout(Duration::from_secs(5));
/// assert_eq!(options.timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Method; `None` resolves to GET (POST for uploads).
    pub method: Option<Verb>,
    /// Extra headers; caller values win over generated defaults.
    pub headers: Vec<(String, String)>,
    /// Raw request payload.
    pub body: Option<RequestBody>,
    /// JSON request payload.
    pub json: Option<serde_json::Value>,
    /// Query parameters (GET), form fields (other verbs), or multipart text fields (with files).
    pub parameters: Vec<(String, String)>,
    /// Files to upload as `multipart/form-data`; incompatible with GET.
    pub files: Vec<UploadFile>,
    /// Wall-clock deadline for the whole exchange.
    pub timeout: Option<Duration>,
    /// Cookies sent in the `Cookie` header.
    pub cookies: Vec<Cookie>,
    /// Basic authentication credentials.
    pub auth: Option<BasicAuth>,
    /// Expose the response body as bytes regardless of its content type.
    pub binary: bool,
}

impl RequestOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: Verb) -> Self {
        self.method = Some(method);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.json = Some(value);
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Adds a file to upload.
    #[must_use]
    pub fn file(mut self, file: impl Into<UploadFile>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a request cookie.
    #[must_use]
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Sets basic authentication credentials.
    #[must_use]
    pub fn basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password,
        });
        self
    }

    /// Forces the response body to be exposed as bytes.
    #[must_use]
    pub fn binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }
}

/// What the encoder turns into a transport body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Payload {
    /// No request body.
    Empty,
    /// An in-memory body with its default content type.
    Bytes {
        bytes: Vec<u8>,
        content_type: &'static str,
    },
    /// A multipart body: text fields first, then file parts.
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<UploadFile>,
    },
}

/// A validated request, ready for encoding and dispatch.
#[derive(Debug)]
pub(crate) struct PreparedRequest {
    pub method: Verb,
    pub url: Url,
    pub headers: HeaderMap,
    pub payload: Payload,
    pub timeout: Option<Duration>,
    pub auth: Option<BasicAuth>,
    pub binary: bool,
}

/// Validates options and resolves defaults.
///
/// `default_method` applies when the caller left `method` unset.
///
/// # Errors
///
/// - [`RequestError::InvalidUrl`] for an empty, malformed or non-http(s) URL
/// - [`RequestError::CantSendFilesUsingGet`] when files are combined with GET
/// - [`RequestError::ConflictingBody`] when more than one payload source is set
/// - [`RequestError::InvalidHeader`] for a header that cannot be encoded
pub(crate) fn normalize(
    url: &str,
    options: Option<RequestOptions>,
    default_method: Verb,
) -> Result<PreparedRequest, RequestError> {
    let options = options.unwrap_or_default();
    let mut url = parse_url(url)?;
    let method = options.method.unwrap_or(default_method);

    if method == Verb::Get && !options.files.is_empty() {
        return Err(RequestError::cant_send_files_using_get(url.as_str()));
    }

    let payload = resolve_payload(&mut url, method, &options)?;
    let headers = build_headers(&options)?;

    Ok(PreparedRequest {
        method,
        url,
        headers,
        payload,
        timeout: options.timeout,
        auth: options.auth,
        binary: options.binary,
    })
}

fn parse_url(raw: &str) -> Result<Url, RequestError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RequestError::invalid_url(raw, "URL is empty"));
    }
    let parsed =
        Url::parse(trimmed).map_err(|e| RequestError::invalid_url(raw, e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RequestError::invalid_url(
            raw,
            format!("unsupported scheme {:?}", parsed.scheme()),
        ));
    }
    Ok(parsed)
}

fn resolve_payload(
    url: &mut Url,
    method: Verb,
    options: &RequestOptions,
) -> Result<Payload, RequestError> {
    let mut sources = Vec::new();
    if options.body.is_some() {
        sources.push("body");
    }
    if options.json.is_some() {
        sources.push("json");
    }
    if !options.files.is_empty() {
        sources.push("files");
    }
    if sources.len() > 1 {
        return Err(RequestError::conflicting_body(&sources));
    }

    if method == Verb::Get {
        if !sources.is_empty() {
            warn!(url = %url, ignored = ?sources, "GET request carries no body; payload dropped");
        }
        if !options.parameters.is_empty() {
            url.query_pairs_mut().extend_pairs(&options.parameters);
        }
        return Ok(Payload::Empty);
    }

    if !options.parameters.is_empty() && options.files.is_empty() {
        if !sources.is_empty() {
            sources.push("parameters");
            return Err(RequestError::conflicting_body(&sources));
        }
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&options.parameters)
            .finish();
        return Ok(Payload::Bytes {
            bytes: encoded.into_bytes(),
            content_type: FORM_URLENCODED,
        });
    }

    if !options.files.is_empty() {
        return Ok(Payload::Multipart {
            fields: options.parameters.clone(),
            files: options.files.clone(),
        });
    }

    if let Some(value) = &options.json {
        return Ok(Payload::Bytes {
            bytes: value.to_string().into_bytes(),
            content_type: APPLICATION_JSON,
        });
    }

    Ok(match &options.body {
        Some(RequestBody::Text(text)) => Payload::Bytes {
            bytes: text.clone().into_bytes(),
            content_type: TEXT_PLAIN,
        },
        Some(RequestBody::Bytes(bytes)) => Payload::Bytes {
            bytes: bytes.clone(),
            content_type: OCTET_STREAM,
        },
        None => Payload::Empty,
    })
}

fn build_headers(options: &RequestOptions) -> Result<HeaderMap, RequestError> {
    let mut headers = HeaderMap::new();

    if let Some(cookie) = cookie_header_value(&options.cookies) {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| RequestError::invalid_header(COOKIE.as_str(), e.to_string()))?;
        headers.insert(COOKIE, value);
    }

    for (name, value) in &options.headers {
        let lowered = name.trim().to_ascii_lowercase();
        let header_name = HeaderName::from_bytes(lowered.as_bytes())
            .map_err(|e| RequestError::invalid_header(name.as_str(), e.to_string()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| RequestError::invalid_header(name.as_str(), e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

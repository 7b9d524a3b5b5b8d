//! Response materializer.
//!
//! Converts a live transport response into the uniform [`Response`] record,
//! either buffering the body in memory or streaming it into a
//! [`DownloadTarget`]. Materialization starts only once the full header set
//! has arrived.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, SET_COOKIE};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::cookies::{Cookie, parse_set_cookies};
use super::error::RequestError;
use super::mime::is_binary_content_type;

/// A response body held in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// Body decoded as UTF-8 text.
    Text(String),
    /// Raw body bytes.
    Bytes(Vec<u8>),
}

impl ResponseBody {
    /// Returns the body as text, if it was decoded as text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    /// Returns the raw bytes of the body.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The uniform result of a successful call.
///
/// `body` is `Some` for in-memory responses and `None` for downloads, whose
/// body lives in the destination file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// HTTP status code. Non-2xx statuses are returned here, not as errors.
    pub status_code: u16,
    /// Headers with lower-cased names; repeated values joined with `", "`.
    pub headers: HashMap<String, String>,
    /// Cookies from every `Set-Cookie` header, in receipt order.
    pub cookies: Vec<Cookie>,
    /// In-memory body; absent for downloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ResponseBody>,
}

impl Response {
    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the body as text when it was decoded as text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.body.as_ref().and_then(ResponseBody::as_text)
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Returns the first cookie with the given name.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|cookie| cookie.name == name)
    }
}

/// Where the response body goes.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Destination<'a> {
    /// Buffer in memory; `binary` forces a bytes body.
    Memory { binary: bool },
    /// Stream into the file at this path.
    File(&'a Path),
}

/// Materializes a transport response.
///
/// # Errors
///
/// - [`RequestError::Truncated`] when fewer bytes than the declared
///   `Content-Length` arrive
/// - [`RequestError::Network`] / [`RequestError::Timeout`] for transport
///   failures while reading the body
/// - [`RequestError::File`] when the download destination cannot be
///   created or written
pub(crate) async fn materialize(
    response: reqwest::Response,
    url: &str,
    destination: Destination<'_>,
) -> Result<Response, RequestError> {
    let status = response.status();
    let headers = collect_headers(response.headers());
    let cookies = parse_set_cookies(
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    );
    let declared = declared_length(status, response.headers());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = match destination {
        Destination::Memory { binary } => {
            let bytes = read_to_memory(response, url, declared).await?;
            Some(decode_body(bytes, content_type.as_deref(), binary))
        }
        Destination::File(path) => {
            let mut target = DownloadTarget::create(path).await?;
            let written = stream_to_target(&mut target, response, url, declared).await?;
            target.commit().await?;
            debug!(path = %path.display(), bytes = written, "download written");
            None
        }
    };

    Ok(Response {
        status_code: status.as_u16(),
        headers,
        cookies,
        body,
    })
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_string(), joined)
        })
        .collect()
}

/// Declared body length, if the response carries one a body must honor.
fn declared_length(status: StatusCode, headers: &HeaderMap) -> Option<u64> {
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return None;
    }
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

async fn read_to_memory(
    response: reqwest::Response,
    url: &str,
    declared: Option<u64>,
) -> Result<Vec<u8>, RequestError> {
    let mut buffer = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk_result) = stream.next().await {
        let chunk =
            chunk_result.map_err(|e| body_error(url, e, declared, buffer.len() as u64))?;
        buffer.extend_from_slice(&chunk);
    }

    ensure_complete(url, declared, buffer.len() as u64)?;
    Ok(buffer)
}

/// Streams the response body into the target, returning bytes written.
async fn stream_to_target(
    target: &mut DownloadTarget,
    response: reqwest::Response,
    url: &str,
    declared: Option<u64>,
) -> Result<u64, RequestError> {
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| body_error(url, e, declared, bytes_written))?;
        target.write(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }

    ensure_complete(url, declared, bytes_written)?;
    Ok(bytes_written)
}

/// Classifies an error raised while reading the body.
fn body_error(
    url: &str,
    error: reqwest::Error,
    declared: Option<u64>,
    received: u64,
) -> RequestError {
    match declared {
        Some(expected) if received < expected && !error.is_timeout() => {
            warn!(url, expected, received, error = %error, "connection closed before declared length");
            RequestError::truncated(url, expected, received)
        }
        _ => RequestError::transport(url, error, None),
    }
}

fn ensure_complete(url: &str, declared: Option<u64>, received: u64) -> Result<(), RequestError> {
    match declared {
        Some(expected) if received < expected => {
            Err(RequestError::truncated(url, expected, received))
        }
        _ => Ok(()),
    }
}

/// Decides text vs. bytes for an in-memory body.
fn decode_body(bytes: Vec<u8>, content_type: Option<&str>, binary: bool) -> ResponseBody {
    if binary || content_type.is_some_and(is_binary_content_type) {
        return ResponseBody::Bytes(bytes);
    }
    match String::from_utf8(bytes) {
        Ok(text) => ResponseBody::Text(text),
        Err(e) => {
            debug!("response body is not valid UTF-8; exposing bytes");
            ResponseBody::Bytes(e.into_bytes())
        }
    }
}

/// A download destination owned by one call.
///
/// The file is created (or truncated) when the target is opened and removed
/// again on drop unless [`commit`](Self::commit) succeeded, so every failure
/// path, including cancellation by the deadline, leaves no partial file.
pub(crate) struct DownloadTarget {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    committed: bool,
}

impl DownloadTarget {
    /// Creates or truncates the destination file.
    pub(crate) async fn create(path: &Path) -> Result<Self, RequestError> {
        let file = File::create(path)
            .await
            .map_err(|e| RequestError::file(path, e))?;
        debug!(path = %path.display(), "download target opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            committed: false,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), RequestError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(closed_error(&self.path));
        };
        writer
            .write_all(chunk)
            .await
            .map_err(|e| RequestError::file(self.path.clone(), e))
    }

    /// Flushes, closes the handle and keeps the file.
    async fn commit(mut self) -> Result<(), RequestError> {
        let Some(mut writer) = self.writer.take() else {
            return Err(closed_error(&self.path));
        };
        writer
            .flush()
            .await
            .map_err(|e| RequestError::file(self.path.clone(), e))?;
        drop(writer);
        self.committed = true;
        Ok(())
    }
}

fn closed_error(path: &Path) -> RequestError {
    RequestError::file(
        path,
        std::io::Error::other("download target already closed"),
    )
}

impl Drop for DownloadTarget {
    fn drop(&mut self) {
        // Close the handle before removing the file.
        drop(self.writer.take());
        if !self.committed {
            debug!(path = %self.path.display(), "removing partial download");
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

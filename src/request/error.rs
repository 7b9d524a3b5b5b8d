//! Error types for the request module.
//!
//! Every failure of a dispatched call is reported as a [`RequestError`]. Each
//! variant carries the context needed for an actionable message and maps onto
//! one value of the closed [`ErrorCode`] taxonomy, so callers can branch on
//! `error.code()` without matching message strings.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Closed set of machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Files were supplied on a GET request.
    CantSendFilesUsingGet,
    /// The caller-specified deadline (or a transport timeout) elapsed.
    Timeout,
    /// Connection could not be established or was reset mid-exchange.
    NetworkError,
    /// An upload source or a download destination could not be read/written.
    FileError,
    /// Fewer body bytes arrived than the response declared.
    TruncatedResponse,
    /// The URL is empty, malformed, or not http(s).
    InvalidUrl,
    /// A caller header name or value is not a valid HTTP token.
    InvalidHeader,
    /// More than one request payload source was supplied.
    ConflictingBody,
    /// The underlying transport could not be constructed.
    ClientBuildError,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CantSendFilesUsingGet => "CANT_SEND_FILES_USING_GET",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::FileError => "FILE_ERROR",
            Self::TruncatedResponse => "TRUNCATED_RESPONSE",
            Self::InvalidUrl => "INVALID_URL",
            Self::InvalidHeader => "INVALID_HEADER",
            Self::ConflictingBody => "CONFLICTING_BODY",
            Self::ClientBuildError => "CLIENT_BUILD_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while dispatching a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Files were supplied together with the GET method.
    #[error("can't send files using GET ({url}); use POST, PUT or PATCH for uploads")]
    CantSendFilesUsingGet {
        /// The request URL.
        url: String,
    },

    /// The deadline elapsed before the exchange completed.
    #[error("timeout{} requesting {url}", describe_limit(.after))]
    Timeout {
        /// The request URL.
        url: String,
        /// The limit that elapsed, when known.
        after: Option<Duration>,
    },

    /// Transport-level failure (DNS resolution, connection refused, reset, TLS).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The request URL.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Reading an upload file or writing a download destination failed.
    #[error("file error on {path}: {source}")]
    File {
        /// The local path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The response body ended before its declared content length.
    #[error("truncated response from {url}: expected {expected_bytes} bytes, got {received_bytes}")]
    Truncated {
        /// The request URL.
        url: String,
        /// Declared `Content-Length`.
        expected_bytes: u64,
        /// Bytes actually received.
        received_bytes: u64,
    },

    /// The URL is empty or malformed.
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A caller-supplied header could not be encoded.
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// More than one payload source was supplied for a single request.
    #[error("conflicting request payloads: {sources} cannot be combined in one request")]
    ConflictingBody {
        /// The payload sources that were supplied together.
        sources: String,
    },

    /// The transport could not be constructed.
    #[error("failed to build HTTP client: {reason}")]
    ClientBuild {
        /// Why construction failed.
        reason: String,
    },
}

impl RequestError {
    /// Returns the machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CantSendFilesUsingGet { .. } => ErrorCode::CantSendFilesUsingGet,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Network { .. } => ErrorCode::NetworkError,
            Self::File { .. } => ErrorCode::FileError,
            Self::Truncated { .. } => ErrorCode::TruncatedResponse,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidHeader { .. } => ErrorCode::InvalidHeader,
            Self::ConflictingBody { .. } => ErrorCode::ConflictingBody,
            Self::ClientBuild { .. } => ErrorCode::ClientBuildError,
        }
    }

    /// Creates the files-with-GET error.
    pub fn cant_send_files_using_get(url: impl Into<String>) -> Self {
        Self::CantSendFilesUsingGet { url: url.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            url: url.into(),
            after: Some(after),
        }
    }

    /// Classifies a transport error: the transport's own timeouts become
    /// [`ErrorCode::Timeout`], everything else [`ErrorCode::NetworkError`].
    ///
    /// `limit` is the transport timeout that applied to the failed phase;
    /// `None` leaves the duration out of the message.
    pub fn transport(url: impl Into<String>, source: reqwest::Error, limit: Option<Duration>) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.into(),
                after: limit,
            }
        } else {
            Self::network(url, source)
        }
    }

    /// Creates a network error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a file error.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Creates a truncation error.
    pub fn truncated(url: impl Into<String>, expected_bytes: u64, received_bytes: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            expected_bytes,
            received_bytes,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a conflicting payload error from the names of the supplied sources.
    pub fn conflicting_body(sources: &[&str]) -> Self {
        Self::ConflictingBody {
            sources: sources.join(" + "),
        }
    }

    /// Creates a client construction error.
    pub fn client_build(reason: impl Into<String>) -> Self {
        Self::ClientBuild {
            reason: reason.into(),
        }
    }
}

#[allow(clippy::ref_option)]
fn describe_limit(after: &Option<Duration>) -> String {
    after.map_or_else(String::new, |limit| format!(" after {}ms", limit.as_millis()))
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// URL or path the source error lacks, so the constructors above are the way in.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_have_wire_names() {
        assert_eq!(
            ErrorCode::CantSendFilesUsingGet.as_str(),
            "CANT_SEND_FILES_USING_GET"
        );
        assert_eq!(ErrorCode::Timeout.as_str(), "TIMEOUT");
        assert_eq!(ErrorCode::NetworkError.as_str(), "NETWORK_ERROR");
        assert_eq!(ErrorCode::FileError.as_str(), "FILE_ERROR");
        assert_eq!(ErrorCode::TruncatedResponse.as_str(), "TRUNCATED_RESPONSE");
        assert_eq!(ErrorCode::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn test_error_code_serializes_as_wire_name() {
        let json = serde_json::to_string(&ErrorCode::CantSendFilesUsingGet).unwrap();
        assert_eq!(json, "\"CANT_SEND_FILES_USING_GET\"");
        let json = serde_json::to_string(&ErrorCode::TruncatedResponse).unwrap();
        assert_eq!(json, "\"TRUNCATED_RESPONSE\"");
    }

    #[test]
    fn test_cant_send_files_using_get_message() {
        let error = RequestError::cant_send_files_using_get("http://127.0.0.1/upload");
        assert_eq!(error.code(), ErrorCode::CantSendFilesUsingGet);
        let msg = error.to_string();
        assert!(msg.contains("GET"), "Expected method in: {msg}");
        assert!(msg.contains("http://127.0.0.1/upload"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_timeout_message_includes_deadline() {
        let error = RequestError::timeout("http://example.com/slow", Duration::from_millis(250));
        assert_eq!(error.code(), ErrorCode::Timeout);
        let msg = error.to_string();
        assert!(msg.contains("250ms"), "Expected deadline in: {msg}");
        assert!(msg.contains("http://example.com/slow"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_timeout_without_known_limit_omits_duration() {
        let error = RequestError::Timeout {
            url: "http://example.com/slow".to_string(),
            after: None,
        };
        let msg = error.to_string();
        assert_eq!(msg, "timeout requesting http://example.com/slow");
        assert!(!msg.contains("0ms"), "Unknown limit must not render as 0ms: {msg}");
    }

    #[tokio::test]
    async fn test_transport_maps_refused_connection_to_network() {
        // Port 9 (discard) is closed on loopback in test environments.
        let source = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        let error = RequestError::transport("http://127.0.0.1:9/", source, None);
        assert_eq!(error.code(), ErrorCode::NetworkError);
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_file_error_keeps_source() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = RequestError::file("/tmp/missing.bin", io_error);
        assert_eq!(error.code(), ErrorCode::FileError);
        assert!(error.to_string().contains("/tmp/missing.bin"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_truncated_message_has_byte_counts() {
        let error = RequestError::truncated("http://example.com/file", 100, 42);
        assert_eq!(error.code(), ErrorCode::TruncatedResponse);
        let msg = error.to_string();
        assert!(msg.contains("100") && msg.contains("42"), "Expected counts in: {msg}");
    }

    #[test]
    fn test_conflicting_body_lists_sources() {
        let error = RequestError::conflicting_body(&["body", "files"]);
        assert_eq!(error.code(), ErrorCode::ConflictingBody);
        assert!(error.to_string().contains("body + files"));
    }

    #[test]
    fn test_every_message_is_non_empty() {
        let errors = [
            RequestError::cant_send_files_using_get(""),
            RequestError::timeout("", Duration::ZERO),
            RequestError::file("", std::io::Error::other("x")),
            RequestError::truncated("", 0, 0),
            RequestError::invalid_url("", "empty"),
            RequestError::invalid_header("", "empty"),
            RequestError::conflicting_body(&[]),
            RequestError::client_build("x"),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty(), "{:?}", error.code());
        }
    }
}

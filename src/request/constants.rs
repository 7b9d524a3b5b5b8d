//! Constants for the request module (timeouts, redirects, encoding).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default number of redirects followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Multipart field name used when a file is uploaded without an explicit one.
pub const DEFAULT_FILE_FIELD: &str = "file";

/// Chunk size used when streaming upload files into a request body.
pub(crate) const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Attempts at drawing a multipart boundary that does not occur in any in-memory part.
pub(crate) const MAX_BOUNDARY_ATTEMPTS: usize = 8;

/// Content type for plain string bodies.
pub(crate) const TEXT_PLAIN: &str = "text/plain";

/// Content type for raw byte bodies and unknown upload files.
pub(crate) const OCTET_STREAM: &str = "application/octet-stream";

/// Content type for JSON bodies.
pub(crate) const APPLICATION_JSON: &str = "application/json";

/// Content type for urlencoded parameter bodies.
pub(crate) const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";


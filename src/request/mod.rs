//! Unified HTTP request facade.
//!
//! Every HTTP exchange goes through one dispatcher that normalizes the
//! caller's options, encodes the body, bounds the exchange with a deadline
//! and materializes a uniform [`Response`].
//!
//! # Features
//!
//! - One routine behind GET/POST/PUT/PATCH/DELETE/OPTIONS helpers
//! - Text, JSON, urlencoded and streamed multipart bodies
//! - Streaming downloads with cleanup of partial files
//! - Per-call deadline that aborts the transport call
//! - Closed error taxonomy with stable codes
//!
//! # Example
//!
//! ```no_run
//! use httpreq::request::{HttpClient, RequestOptions};
//!
//! # async fn example() -> Result<(), httpreq::RequestError> {
//! let client = HttpClient::new();
//! let response = client
//!     .post(
//!         "https://example.com/notes",
//!         Some(RequestOptions::new().body("wacky wheels")),
//!     )
//!     .await?;
//! println!("status {}", response.status_code);
//!
//! client
//!     .download("https://example.com/paper.pdf", "./paper.pdf", None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
pub mod constants;
mod cookies;
mod deadline;
mod error;
mod mime;
mod multipart;
mod options;
mod response;

pub use client::{ClientConfig, HttpClient};
pub use constants::{CONNECT_TIMEOUT_SECS, DEFAULT_FILE_FIELD, DEFAULT_MAX_REDIRECTS};
pub use cookies::{Cookie, parse_set_cookie};
pub use error::{ErrorCode, RequestError};
pub use options::{BasicAuth, RequestBody, RequestOptions, UploadFile, Verb};
pub use response::{Response, ResponseBody};

// Note: no module-local Result alias; use `Result<T, RequestError>` explicitly.

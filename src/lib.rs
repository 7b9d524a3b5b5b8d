//! httpreq
//!
//! An async HTTP client library exposing a single, uniform request facade.
//! All verbs, downloads and multipart uploads share one dispatcher and
//! produce the same [`Response`] shape; every failure is a [`RequestError`]
//! carrying one code from the closed [`ErrorCode`] set.
//!
//! # Architecture
//!
//! - [`request`] - options normalizer, body encoder, deadline controller,
//!   response materializer and the [`HttpClient`] dispatcher

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod request;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use request::{
    BasicAuth, ClientConfig, Cookie, ErrorCode, HttpClient, RequestBody, RequestError,
    RequestOptions, Response, ResponseBody, UploadFile, Verb, parse_set_cookie,
};

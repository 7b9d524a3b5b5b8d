//! `multipart/form-data` encoding for file uploads.
//!
//! Files are stat'ed when the form is prepared so the full `Content-Length`
//! is known before the request starts, then streamed from disk in chunks as
//! the transport pulls the body.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::Stream;
use futures_util::stream;
use percent_encoding::percent_encode_byte;
use rand::RngCore;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::constants::{MAX_BOUNDARY_ATTEMPTS, UPLOAD_CHUNK_SIZE};
use super::error::RequestError;
use super::mime::content_type_for_path;
use super::options::UploadFile;

/// A multipart body whose layout and length are fully known.
#[derive(Debug)]
pub(crate) struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

#[derive(Debug)]
struct Part {
    headers: Vec<u8>,
    body: PartBody,
}

#[derive(Debug)]
enum PartBody {
    Text(String),
    File { path: PathBuf, len: u64 },
}

/// One piece of the serialized body.
#[derive(Debug)]
enum Segment {
    Bytes(Vec<u8>),
    File { path: PathBuf, len: u64 },
}

impl MultipartForm {
    /// Builds the form, stat'ing every file.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::File`] when a file is missing, unreadable or
    /// not a regular file.
    pub(crate) async fn prepare(
        fields: Vec<(String, String)>,
        files: Vec<UploadFile>,
    ) -> Result<Self, RequestError> {
        let mut parts = Vec::with_capacity(fields.len() + files.len());

        for (name, value) in fields {
            parts.push(Part {
                headers: encode_part_headers(&name, None, None),
                body: PartBody::Text(value),
            });
        }

        for upload in files {
            let metadata = tokio::fs::metadata(&upload.path)
                .await
                .map_err(|e| RequestError::file(upload.path.clone(), e))?;
            if !metadata.is_file() {
                return Err(RequestError::file(
                    upload.path.clone(),
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
                ));
            }
            let file_name = upload.file_name();
            let content_type = content_type_for_path(&upload.path);
            debug!(
                path = %upload.path.display(),
                bytes = metadata.len(),
                content_type,
                "prepared upload part"
            );
            parts.push(Part {
                headers: encode_part_headers(&upload.field, Some(&file_name), Some(content_type)),
                body: PartBody::File {
                    path: upload.path,
                    len: metadata.len(),
                },
            });
        }

        let boundary = choose_boundary(&parts);
        Ok(Self { boundary, parts })
    }

    /// Value for the request `Content-Type` header.
    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact length of the serialized body.
    pub(crate) fn content_length(&self) -> u64 {
        let boundary_len = self.boundary.len() as u64;
        let parts: u64 = self
            .parts
            .iter()
            .map(|part| {
                // "--" boundary "\r\n" headers "\r\n\r\n" body "\r\n"
                2 + boundary_len + 2 + part.headers.len() as u64 + 4 + part.body_len() + 2
            })
            .sum();
        // "--" boundary "--\r\n"
        parts + 2 + boundary_len + 4
    }

    /// Streams the serialized body, reading files lazily.
    ///
    /// A file that cannot be opened or read is recorded in `failure` before
    /// the stream yields the error, so the caller can report it as a file
    /// error rather than a transport one.
    pub(crate) fn into_stream(
        self,
        failure: UploadFailure,
    ) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
        stream::unfold(
            BodyState {
                segments: self.into_segments(),
                open: None,
                failure,
            },
            |mut state| async move {
                let item = state.next_chunk().await?;
                Some((item, state))
            },
        )
    }

    fn into_segments(self) -> VecDeque<Segment> {
        let mut segments = VecDeque::new();
        for part in self.parts {
            let mut head = Vec::with_capacity(part.headers.len() + self.boundary.len() + 8);
            head.extend_from_slice(b"--");
            head.extend_from_slice(self.boundary.as_bytes());
            head.extend_from_slice(b"\r\n");
            head.extend_from_slice(&part.headers);
            head.extend_from_slice(b"\r\n\r\n");
            match part.body {
                PartBody::Text(value) => {
                    head.extend_from_slice(value.as_bytes());
                    head.extend_from_slice(b"\r\n");
                    segments.push_back(Segment::Bytes(head));
                }
                PartBody::File { path, len } => {
                    segments.push_back(Segment::Bytes(head));
                    segments.push_back(Segment::File { path, len });
                    segments.push_back(Segment::Bytes(b"\r\n".to_vec()));
                }
            }
        }
        segments.push_back(Segment::Bytes(
            format!("--{}--\r\n", self.boundary).into_bytes(),
        ));
        segments
    }

    #[cfg(test)]
    pub(crate) fn boundary(&self) -> &str {
        &self.boundary
    }
}

impl Part {
    fn body_len(&self) -> u64 {
        match &self.body {
            PartBody::Text(value) => value.len() as u64,
            PartBody::File { len, .. } => *len,
        }
    }
}

/// First upload file failure seen by a body stream, shared with the dispatcher.
#[derive(Debug, Clone, Default)]
pub(crate) struct UploadFailure(Arc<Mutex<Option<RequestError>>>);

impl UploadFailure {
    fn record(&self, error: RequestError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Takes the recorded failure, if any.
    pub(crate) fn take(&self) -> Option<RequestError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

struct OpenFile {
    file: File,
    path: PathBuf,
    remaining: u64,
}

struct BodyState {
    segments: VecDeque<Segment>,
    open: Option<OpenFile>,
    failure: UploadFailure,
}

impl BodyState {
    /// Produces the next chunk; `None` once the body is complete or after an error.
    async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, std::io::Error>> {
        loop {
            if let Some(open) = self.open.as_mut() {
                if open.remaining == 0 {
                    self.open = None;
                    continue;
                }
                let want = usize::try_from(open.remaining)
                    .unwrap_or(UPLOAD_CHUNK_SIZE)
                    .min(UPLOAD_CHUNK_SIZE);
                let mut buf = vec![0u8; want];
                let read = open.file.read(&mut buf).await;
                return match read {
                    Ok(0) => {
                        let path = open.path.clone();
                        Some(Err(self.abort(
                            path,
                            std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "upload file shrank while streaming",
                            ),
                        )))
                    }
                    Ok(n) => {
                        buf.truncate(n);
                        open.remaining -= n as u64;
                        Some(Ok(buf))
                    }
                    Err(e) => {
                        let path = open.path.clone();
                        Some(Err(self.abort(path, e)))
                    }
                };
            }

            match self.segments.pop_front()? {
                Segment::Bytes(bytes) => return Some(Ok(bytes)),
                Segment::File { path, len } => match File::open(&path).await {
                    Ok(file) => {
                        self.open = Some(OpenFile {
                            file,
                            path,
                            remaining: len,
                        });
                    }
                    Err(e) => return Some(Err(self.abort(path, e))),
                },
            }
        }
    }

    fn abort(&mut self, path: PathBuf, error: std::io::Error) -> std::io::Error {
        self.segments.clear();
        self.open = None;
        debug!(path = %path.display(), error = %error, "upload file read failed");
        let recorded = std::io::Error::new(error.kind(), error.to_string());
        self.failure.record(RequestError::file(path, recorded));
        error
    }
}

/// Draws a random boundary that does not occur in any in-memory part.
fn choose_boundary(parts: &[Part]) -> String {
    let mut boundary = gen_boundary();
    for _ in 1..MAX_BOUNDARY_ATTEMPTS {
        if !collides(&boundary, parts) {
            break;
        }
        debug!("multipart boundary collided with part content; regenerating");
        boundary = gen_boundary();
    }
    boundary
}

fn collides(boundary: &str, parts: &[Part]) -> bool {
    let needle = boundary.as_bytes();
    parts.iter().any(|part| {
        contains(&part.headers, needle)
            || matches!(&part.body, PartBody::Text(value) if contains(value.as_bytes(), needle))
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn gen_boundary() -> String {
    let mut rng = rand::thread_rng();
    let a = rng.next_u64();
    let b = rng.next_u64();
    let c = rng.next_u64();
    let d = rng.next_u64();
    format!("{a:016x}-{b:016x}-{c:016x}-{d:016x}")
}

fn encode_part_headers(name: &str, file_name: Option<&str>, content_type: Option<&str>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"Content-Disposition: form-data; name=\"");
    buf.extend_from_slice(escape_quoted(name).as_bytes());
    buf.extend_from_slice(b"\"");
    if let Some(file_name) = file_name {
        buf.extend_from_slice(b"; filename=\"");
        buf.extend_from_slice(escape_quoted(file_name).as_bytes());
        buf.extend_from_slice(b"\"");
    }
    if let Some(content_type) = content_type {
        buf.extend_from_slice(b"\r\nContent-Type: ");
        buf.extend_from_slice(content_type.as_bytes());
    }
    buf
}

/// Percent-encodes `"`, CR, LF and other ASCII controls in a quoted
/// `Content-Disposition` value; everything else, UTF-8 included, stays raw.
fn escape_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '"' || ch.is_ascii_control() {
            let mut byte = [0u8; 1];
            ch.encode_utf8(&mut byte);
            escaped.push_str(percent_encode_byte(byte[0]));
        } else {
            escaped.push(ch);
        }
    }
    escaped
}

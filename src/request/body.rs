//! Body encoder: turns a normalized payload into a transport body plus the
//! `Content-Type` and `Content-Length` that describe it.

use tracing::debug;

use super::error::RequestError;
use super::multipart::{MultipartForm, UploadFailure};
use super::options::Payload;

/// A transport-ready request body.
pub(crate) struct EncodedBody {
    /// The body; `None` when the request carries no payload.
    pub body: Option<reqwest::Body>,
    /// Default content type; a caller-supplied header overrides it.
    pub content_type: Option<String>,
    /// Exact body length in bytes.
    pub content_length: Option<u64>,
    /// Upload file failures raised while the transport pulls a multipart body.
    pub upload_failure: Option<UploadFailure>,
}

impl EncodedBody {
    fn empty() -> Self {
        Self {
            body: None,
            content_type: None,
            content_length: None,
            upload_failure: None,
        }
    }
}

/// Encodes a payload.
///
/// Multipart payloads stat every file here, so a missing upload fails before
/// the transport call starts.
///
/// # Errors
///
/// Returns [`RequestError::File`] when an upload file cannot be stat'ed.
pub(crate) async fn encode(payload: Payload) -> Result<EncodedBody, RequestError> {
    match payload {
        Payload::Empty => Ok(EncodedBody::empty()),
        Payload::Bytes {
            bytes,
            content_type,
        } => {
            let len = bytes.len() as u64;
            debug!(bytes = len, content_type, "encoded in-memory body");
            Ok(EncodedBody {
                body: Some(reqwest::Body::from(bytes)),
                content_type: Some(content_type.to_string()),
                content_length: Some(len),
                upload_failure: None,
            })
        }
        Payload::Multipart { fields, files } => {
            let form = MultipartForm::prepare(fields, files).await?;
            let content_type = form.content_type();
            let content_length = form.content_length();
            debug!(bytes = content_length, "encoded multipart body");
            let failure = UploadFailure::default();
            Ok(EncodedBody {
                body: Some(reqwest::Body::wrap_stream(form.into_stream(failure.clone()))),
                content_type: Some(content_type),
                content_length: Some(content_length),
                upload_failure: Some(failure),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::request::ErrorCode;
    use crate::request::options::UploadFile;

    #[test]
    fn test_encode_empty_sets_no_headers() {
        let encoded = tokio_test::block_on(encode(Payload::Empty)).unwrap();
        assert!(encoded.body.is_none());
        assert!(encoded.content_type.is_none());
        assert!(encoded.content_length.is_none());
    }

    #[test]
    fn test_encode_text_reports_exact_byte_length() {
        let encoded = tokio_test::block_on(encode(Payload::Bytes {
            bytes: "héllo".as_bytes().to_vec(),
            content_type: "text/plain",
        }))
        .unwrap();
        assert_eq!(encoded.content_length, Some(6));
        assert_eq!(encoded.content_type.as_deref(), Some("text/plain"));
        assert!(encoded.body.is_some());
        assert!(encoded.upload_failure.is_none());
    }

    #[tokio::test]
    async fn test_encode_multipart_missing_file_fails() {
        let err = encode(Payload::Multipart {
            fields: Vec::new(),
            files: vec![UploadFile::new("/nonexistent/dir/upload.bin")],
        })
        .await
        .err()
        .unwrap();
        assert_eq!(err.code(), ErrorCode::FileError);
    }
}

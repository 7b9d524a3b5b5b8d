//! Cookie model, `Set-Cookie` parsing and `Cookie` header rendering.
//!
//! Response cookies are parsed from every `Set-Cookie` occurrence in receipt
//! order. Request cookies supplied through
//! [`RequestOptions`](super::RequestOptions) are rendered into a single
//! `Cookie` header.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;

/// A single cookie: name, value and its attributes.
///
/// Attribute names are lower-cased (`path`, `domain`, `expires`, ...); flag
/// attributes such as `HttpOnly` map to an empty string. The value is
/// redacted in `Debug` output so cookies never leak through logs.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive; never log).
    pub value: String,
    /// Attributes following the `name=value` pair.
    pub attributes: HashMap<String, String>,
}

impl Cookie {
    /// Creates a cookie without attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            attributes: HashMap::new(),
        }
    }

    /// Returns an attribute by case-insensitive name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the `Path` attribute, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.attribute("path")
    }

    /// Returns the `Domain` attribute, if any.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.attribute("domain")
    }

    /// Whether the `Secure` flag is present.
    #[must_use]
    pub fn secure(&self) -> bool {
        self.attributes.contains_key("secure")
    }

    /// Whether the `HttpOnly` flag is present.
    #[must_use]
    pub fn http_only(&self) -> bool {
        self.attributes.contains_key("httponly")
    }

    /// Parses the `Expires` attribute as an HTTP date.
    ///
    /// Returns `None` for session cookies and for unparseable dates.
    #[must_use]
    pub fn expires(&self) -> Option<SystemTime> {
        self.attribute("expires")
            .and_then(|value| httpdate::parse_http_date(value).ok())
    }

    /// Renders the `name=value` pair sent in a request `Cookie` header.
    #[must_use]
    pub fn to_header_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Parses one `Set-Cookie` header value.
///
/// Returns `None` when the leading `name=value` pair is missing or the name
/// is empty.
#[must_use]
pub fn parse_set_cookie(header: &str) -> Option<Cookie> {
    let mut segments = header.split(';');
    let (name, value) = segments.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let attributes = segments
        .filter_map(|segment| {
            let segment = segment.trim();
            if segment.is_empty() {
                return None;
            }
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();

    Some(Cookie {
        name: name.to_string(),
        value: strip_quotes(value.trim()).to_string(),
        attributes,
    })
}

/// Parses every `Set-Cookie` value, preserving order and skipping malformed ones.
pub(crate) fn parse_set_cookies<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<Cookie> {
    values
        .into_iter()
        .filter_map(|raw| {
            let parsed = parse_set_cookie(raw);
            if parsed.is_none() {
                debug!(length = raw.len(), "skipping malformed Set-Cookie header");
            }
            parsed
        })
        .collect()
}

/// Renders request cookies into a `Cookie` header value.
///
/// Returns `None` when there are no cookies to send.
pub(crate) fn cookie_header_value(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(Cookie::to_header_pair)
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

//! HTTP client handle and request dispatcher.
//!
//! [`HttpClient`] owns the transport (a pooled `reqwest::Client`). Every
//! operation funnels through one dispatch routine:
//! normalize -> encode -> arm deadline -> send -> materialize.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, info, instrument, warn};

use super::body::{EncodedBody, encode};
use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_MAX_REDIRECTS};
use super::deadline::with_deadline;
use super::error::RequestError;
use super::multipart::UploadFailure;
use super::options::{Payload, PreparedRequest, RequestOptions, UploadFile, Verb, normalize};
use super::response::{Destination, Response, materialize};
use crate::user_agent;

/// Configuration for the transport behind an [`HttpClient`].
#[derive(Clone)]
pub struct ClientConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Per-read timeout enforced by the transport; `None` disables it.
    pub read_timeout: Option<Duration>,
    /// Redirects followed before giving up; `0` disables redirects.
    pub max_redirects: usize,
    /// `User-Agent` sent unless a request overrides it.
    pub user_agent: String,
    /// Proxy URL applied to all schemes.
    pub proxy: Option<String>,
    /// Cookie jar shared across requests made by this client.
    pub cookie_jar: Option<Arc<Jar>>,
    /// Transparent gzip decompression.
    pub gzip: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: user_agent::default_user_agent(),
            proxy: None,
            cookie_jar: None,
            gzip: true,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("user_agent", &self.user_agent)
            .field("proxy", &self.proxy)
            .field("cookie_jar", &self.cookie_jar.is_some())
            .field("gzip", &self.gzip)
            .finish()
    }
}

/// Async HTTP client exposing the unified request facade.
///
/// Create it once and clone it freely: clones share one connection pool and
/// are safe to use from concurrent tasks. Calls share no other state.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use httpreq::{HttpClient, RequestOptions};
///
/// # async fn example() -> Result<(), httpreq::RequestError> {
/// let client = HttpClient::new();
/// let options = RequestOptions::new().timeout(Duration::from_secs(5));
/// let response = client.get("https://example.com/", Some(options)).await?;
/// println!("{} {:?}", response.status_code, response.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the default [`ClientConfig`].
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static default
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client from explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientBuild`] when the proxy URL is invalid or
    /// the transport cannot be constructed.
    #[instrument(level = "debug")]
    pub fn with_config(config: ClientConfig) -> Result<Self, RequestError> {
        let client = build_client(&config)?;
        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        })
    }

    /// Dispatches a request using the method in `options` (GET when unset).
    ///
    /// This is the single routine every other operation delegates to.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`]; its [`code`](RequestError::code) is one of
    /// the closed [`ErrorCode`](super::ErrorCode) values.
    #[instrument(skip(self, options), fields(url = %url))]
    pub async fn do_request(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        self.dispatch(url, options, Verb::Get, None).await
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request); supplying files fails with
    /// `CANT_SEND_FILES_USING_GET`.
    pub async fn get(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        self.do_request(url, Some(with_method(options, Verb::Get)))
            .await
    }

    /// Sends a POST request.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn post(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        self.do_request(url, Some(with_method(options, Verb::Post)))
            .await
    }

    /// Sends a PUT request.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn put(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        self.do_request(url, Some(with_method(options, Verb::Put)))
            .await
    }

    /// Sends a PATCH request.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn patch(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        self.do_request(url, Some(with_method(options, Verb::Patch)))
            .await
    }

    /// Sends a DELETE request.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn delete(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        self.do_request(url, Some(with_method(options, Verb::Delete)))
            .await
    }

    /// Sends an OPTIONS request.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn options(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        self.do_request(url, Some(with_method(options, Verb::Options)))
            .await
    }

    /// Downloads the response body of a GET straight into `path`.
    ///
    /// The file is created or truncated once response headers arrive. On
    /// success it holds exactly the body bytes and the returned response has
    /// no `body`. On any failure, including the deadline firing mid-stream,
    /// the partial file is removed before the error is returned.
    ///
    /// A file already at `path` is overwritten as soon as headers arrive, so
    /// a download that then fails leaves no file there at all, not the old
    /// contents. Download to a fresh path and rename it to keep the previous
    /// file until the new one is complete.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request); additionally `FILE_ERROR` when
    /// the destination cannot be created or written.
    #[instrument(skip(self, path, options), fields(url = %url))]
    pub async fn download(
        &self,
        url: &str,
        path: impl AsRef<Path>,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "starting download");
        self.dispatch(url, Some(with_method(options, Verb::Get)), Verb::Get, Some(path))
            .await
    }

    /// Uploads local files as a `multipart/form-data` body.
    ///
    /// The method defaults to POST; a method set in `options` wins (GET
    /// still fails with `CANT_SEND_FILES_USING_GET`). Files already listed in
    /// `options` are sent first.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request); `FILE_ERROR` when a file cannot be
    /// stat'ed, before any network I/O.
    #[instrument(skip(self, files, options), fields(url = %url))]
    pub async fn upload_files(
        &self,
        url: &str,
        files: impl IntoIterator<Item = impl Into<UploadFile>>,
        options: Option<RequestOptions>,
    ) -> Result<Response, RequestError> {
        let mut options = options.unwrap_or_default();
        options.files.extend(files.into_iter().map(Into::into));
        debug!(files = options.files.len(), "starting upload");
        self.dispatch(url, Some(options), Verb::Post, None).await
    }

    /// Returns a reference to the underlying reqwest client.
    ///
    /// This can be used for advanced operations not covered by this wrapper.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn dispatch(
        &self,
        url: &str,
        options: Option<RequestOptions>,
        default_method: Verb,
        download_path: Option<&Path>,
    ) -> Result<Response, RequestError> {
        let mut prepared = normalize(url, options, default_method)?;
        debug!(method = %prepared.method, url = %prepared.url, "request normalized");

        let payload = std::mem::replace(&mut prepared.payload, Payload::Empty);
        let encoded = encode(payload).await?;
        let response = self.exchange(&prepared, encoded, download_path).await?;

        info!(
            method = %prepared.method,
            status = response.status_code,
            cookies = response.cookies.len(),
            "request complete"
        );
        Ok(response)
    }

    /// Sends an encoded request under its deadline and materializes the response.
    async fn exchange(
        &self,
        prepared: &PreparedRequest,
        encoded: EncodedBody,
        download_path: Option<&Path>,
    ) -> Result<Response, RequestError> {
        let upload_failure = encoded.upload_failure.clone();
        let request = self.build_request(prepared, encoded)?;

        let target_url = prepared.url.to_string();
        let destination = match download_path {
            Some(path) => Destination::File(path),
            None => Destination::Memory {
                binary: prepared.binary,
            },
        };

        with_deadline(&target_url, prepared.timeout, async {
            let response = request.send().await.map_err(|e| {
                // A body stream error surfaces from send(); report the file behind it.
                upload_failure
                    .as_ref()
                    .and_then(UploadFailure::take)
                    .unwrap_or_else(|| self.transport_error(&target_url, e))
            })?;
            debug!(status = response.status().as_u16(), "response headers received");
            materialize(response, &target_url, destination).await
        })
        .await
    }

    /// Maps a send error, naming the transport timeout of the phase that failed.
    fn transport_error(&self, url: &str, error: reqwest::Error) -> RequestError {
        let limit = if error.is_connect() {
            Some(self.connect_timeout)
        } else {
            self.read_timeout
        };
        RequestError::transport(url, error, limit)
    }

    fn build_request(
        &self,
        prepared: &PreparedRequest,
        encoded: EncodedBody,
    ) -> Result<reqwest::RequestBuilder, RequestError> {
        let mut builder = self
            .client
            .request(prepared.method.to_method(), prepared.url.clone());

        if let Some(auth) = &prepared.auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_deref());
        }

        let headers = merge_headers(&prepared.headers, &encoded)?;
        builder = builder.headers(headers);

        if let Some(body) = encoded.body {
            builder = builder.body(body);
        }
        Ok(builder)
    }
}

/// Overrides the method of `options`, creating defaults when absent.
fn with_method(options: Option<RequestOptions>, method: Verb) -> RequestOptions {
    let mut options = options.unwrap_or_default();
    options.method = Some(method);
    options
}

/// Caller headers plus encoder defaults: caller `content-type` wins,
/// `content-length` always reflects the encoded body.
fn merge_headers(caller: &HeaderMap, encoded: &EncodedBody) -> Result<HeaderMap, RequestError> {
    let mut headers = caller.clone();

    if let Some(content_type) = &encoded.content_type
        && !headers.contains_key(CONTENT_TYPE)
    {
        let value = HeaderValue::from_str(content_type)
            .map_err(|e| RequestError::invalid_header(CONTENT_TYPE.as_str(), e.to_string()))?;
        headers.insert(CONTENT_TYPE, value);
    }

    if let Some(length) = encoded.content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    } else {
        headers.remove(CONTENT_LENGTH);
    }

    Ok(headers)
}

fn build_client(config: &ClientConfig) -> Result<Client, RequestError> {
    match try_build_client(config, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!(
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            match try_build_client(config, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Build(error)) => Err(error),
                Err(BuildClientFailure::Panic) => Err(RequestError::client_build(
                    "client builder panicked while applying env-proxy fallback",
                )),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(error),
    }
}

enum BuildClientFailure {
    Panic,
    Build(RequestError),
}

// `catch_unwind` does not suppress panic-hook stderr output, so the hook is
// silenced while a guarded build runs.
static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    config: &ClientConfig,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        #[cfg(test)]
        maybe_inject_client_build_panic(disable_system_proxy_lookup);

        let mut builder = base_client_builder(config).map_err(BuildClientFailure::Build)?;
        if disable_system_proxy_lookup && config.proxy.is_none() {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder
            .build()
            .map_err(|e| BuildClientFailure::Build(RequestError::client_build(e.to_string())))
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _panic_hook_guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn base_client_builder(config: &ClientConfig) -> Result<ClientBuilder, RequestError> {
    let redirect = if config.max_redirects == 0 {
        Policy::none()
    } else {
        Policy::limited(config.max_redirects)
    };

    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .redirect(redirect)
        .gzip(config.gzip)
        .user_agent(config.user_agent.as_str());
    if let Some(read_timeout) = config.read_timeout {
        builder = builder.read_timeout(read_timeout);
    }
    if let Some(proxy) = &config.proxy {
        let resolved = Proxy::all(proxy.as_str())
            .map_err(|e| RequestError::client_build(format!("invalid proxy {proxy:?}: {e}")))?;
        builder = builder.proxy(resolved);
    }
    if let Some(jar) = &config.cookie_jar {
        builder = builder.cookie_provider(Arc::clone(jar));
    }
    Ok(builder)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
static CLIENT_BUILD_PANIC_INJECTION_COUNT: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
fn inject_client_build_panics(count: usize) {
    CLIENT_BUILD_PANIC_INJECTION_COUNT.store(count, std::sync::atomic::Ordering::SeqCst);
}

#[cfg(test)]
fn maybe_inject_client_build_panic(disable_system_proxy_lookup: bool) {
    use std::sync::atomic::Ordering;

    if disable_system_proxy_lookup {
        return;
    }

    if CLIENT_BUILD_PANIC_INJECTION_COUNT
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            if count > 0 { Some(count - 1) } else { None }
        })
        .is_ok()
    {
        panic!("injected HTTP client builder panic");
    }
}

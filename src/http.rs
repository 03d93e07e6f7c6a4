//! HTTP and HTTPS transport.

use crate::{transport::remote_path, Transport, TransportError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{
    blocking::{Client, Response},
    header::{CONTENT_LENGTH, RANGE},
    StatusCode,
};
use std::{cmp::min, env, ops::Range, time::Duration};
use tracing::debug;
use url::Url;

/// Environment variable naming the endpoint that accepts write-back posts.
pub const POST_URL_ENV: &str = "IO_ENGINES_HTTP_POST";

/// Options for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Limit on establishing a connection.
    pub connect_timeout: Option<Duration>,
    /// Limit on a whole request, including reading the body.
    pub timeout: Option<Duration>,
    /// Endpoint accepting changed ranges. Without one the transport is
    /// read-only.
    pub post_url: Option<String>,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Honor `HTTP_PROXY` and related environment variables.
    pub use_system_proxy: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            timeout: Some(Duration::from_secs(120)),
            post_url: None,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            use_system_proxy: true,
        }
    }
}

impl HttpConfig {
    /// The defaults, with `post_url` taken from the environment variable
    /// named by [`POST_URL_ENV`] if it is set and not empty.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            post_url: env::var(POST_URL_ENV).ok().filter(|url| !url.is_empty()),
            ..Self::default()
        }
    }
}

/// Reads a resource with HTTP range requests.
///
/// Writing back posts a form with the fields `path`, `from`, `to` and
/// `data` (base64) to the configured endpoint, which is expected to replace
/// bytes `from..to` of the resource at `path` with `data`.
pub struct HttpTransport {
    url: String,
    path: String,
    client: Client,
    post_url: Option<String>,
}

impl HttpTransport {
    /// Create a transport for `url` with [`HttpConfig::from_env`].
    pub fn new(url: &str) -> Result<Self, TransportError> {
        Self::with_config(url, HttpConfig::from_env())
    }

    /// Create a transport for `url`.
    pub fn with_config(url: &str, config: HttpConfig) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme `{}`",
                    scheme
                )))
            }
        }
        let mut builder = Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;
        Ok(Self {
            url: url.to_owned(),
            path: remote_path(&parsed)?,
            client,
            post_url: config.post_url,
        })
    }

    fn check(response: Response) -> Result<Response, TransportError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }
}

impl Transport for HttpTransport {
    #[inline]
    fn url(&self) -> &str {
        &self.url
    }

    fn probe_size(&mut self) -> Result<Option<u64>, TransportError> {
        let response = Self::check(self.client.head(&self.url).send()?)?;
        // `Response::content_length` describes the (empty) HEAD body.
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        debug!(url = %self.url, ?size, "probed size");
        Ok(size)
    }

    fn fetch_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let last = offset + len as u64 - 1;
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", offset, last))
            .send()?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(response.bytes()?.to_vec()),
            StatusCode::OK => {
                // The server ignored the range and sent everything.
                debug!(url = %self.url, "range request answered with the whole resource");
                let body = response.bytes()?;
                let start = min(offset, body.len() as u64) as usize;
                let end = min(start + len, body.len());
                Ok(body.slice(start..end).to_vec())
            }
            status => Err(TransportError::Status(status.as_u16())),
        }
    }

    fn fetch_all(&mut self) -> Result<Vec<u8>, TransportError> {
        let response = Self::check(self.client.get(&self.url).send()?)?;
        Ok(response.bytes()?.to_vec())
    }

    #[inline]
    fn supports_write(&self) -> bool {
        self.post_url.is_some()
    }

    fn push_range(&mut self, range: Range<u64>, data: &[u8]) -> Result<(), TransportError> {
        let post_url = self.post_url.as_deref().ok_or(TransportError::ReadOnly)?;
        let form = [
            ("path", self.path.clone()),
            ("from", range.start.to_string()),
            ("to", range.end.to_string()),
            ("data", STANDARD.encode(data)),
        ];
        debug!(url = %self.url, post_url, from = range.start, to = range.end, len = data.len(), "posting range");
        Self::check(self.client.post(post_url).form(&form).send()?)?;
        Ok(())
    }
}

use percent_encoding::percent_decode_str;
use std::{io, ops::Range, process::ExitStatus};
use thiserror::Error;
use url::Url;

/// Failures reported by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client failed.
    #[cfg(feature = "http")]
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The URL can't be used by this transport.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The server answered with an unexpected status code.
    #[error("server returned status {0}")]
    Status(u16),

    /// Local I/O, such as spawning a helper process, failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A helper process exited unsuccessfully.
    #[error("remote command failed ({status}): {stderr}")]
    Command {
        /// Exit status of the process.
        status: ExitStatus,
        /// What the process wrote to its standard error.
        stderr: String,
    },

    /// The server's answer didn't make sense.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The transport can't write.
    #[error("the transport is read-only")]
    ReadOnly,
}

/// How a [`RemoteIo`](crate::RemoteIo) reaches its resource.
///
/// Implementations only move bytes; block caching, positions and diffing
/// belong to `RemoteIo`. Calls block until complete.
pub trait Transport {
    /// Returns the URL of the resource.
    fn url(&self) -> &str;

    /// Ask the server for the size of the resource. `None` means the server
    /// can't tell, in which case the whole resource is fetched once with
    /// [`fetch_all`](Self::fetch_all).
    fn probe_size(&mut self) -> Result<Option<u64>, TransportError>;

    /// Fetch `len` bytes starting at `offset`. Fewer bytes are returned only
    /// if the resource ends first.
    fn fetch_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Fetch the whole resource.
    fn fetch_all(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Returns `true` if [`push_range`](Self::push_range) is supported.
    fn supports_write(&self) -> bool;

    /// Replace the bytes in `range` of the remote resource with `data`,
    /// which may be longer or shorter than the range.
    fn push_range(&mut self, range: Range<u64>, data: &[u8]) -> Result<(), TransportError>;
}

/// The decoded path component of `url`, as the remote side names the file.
pub(crate) fn remote_path(url: &Url) -> Result<String, TransportError> {
    percent_decode_str(url.path())
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|err| TransportError::InvalidUrl(format!("{}: {}", url, err)))
}

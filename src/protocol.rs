use crate::{
    Error, FileIo, IoEngine, RemoteIo, Result, SshTransport, TransportError, XPathBacking, XPathIo,
};
#[cfg(feature = "http")]
use crate::HttpTransport;
use url::Url;

/// The kind of resource a path or URL names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// A local path.
    File,
    /// A `file://` URL.
    FileUri,
    /// `http://`
    Http,
    /// `https://`
    Https,
    /// `ftp://`
    Ftp,
    /// `ssh://`
    Ssh,
    /// `sftp://`
    Sftp,
    /// A `data:` URI.
    DataUri,
    /// `-`, standard input.
    Stdin,
}

impl Protocol {
    /// Classify `path` by its prefix. Scheme names are compared
    /// case-insensitively.
    #[must_use]
    pub fn of(path: &str) -> Self {
        const SCHEMES: &[(&str, Protocol)] = &[
            ("http://", Protocol::Http),
            ("https://", Protocol::Https),
            ("ftp://", Protocol::Ftp),
            ("sftp://", Protocol::Sftp),
            ("ssh://", Protocol::Ssh),
            ("file://", Protocol::FileUri),
            ("data:", Protocol::DataUri),
        ];
        if path == "-" {
            return Self::Stdin;
        }
        SCHEMES
            .iter()
            .find(|(prefix, _)| {
                path.get(..prefix.len())
                    .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
            })
            .map_or(Self::File, |(_, protocol)| *protocol)
    }

    /// Returns `true` for resources a [`RemoteIo`] reads. `ftp://` is
    /// recognized but has no transport.
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Http | Self::Https | Self::Ssh | Self::Sftp)
    }
}

/// Create the engine suited to `path`.
///
/// Local paths and `file://` URLs get a [`FileIo`], `http(s)`, `ssh` and
/// `sftp` URLs a [`RemoteIo`], and `-` or `data:` URIs an [`XPathIo`] backed
/// by a temporary file. The engine is not opened.
pub fn create_io(path: &str) -> Result<Box<dyn IoEngine>> {
    let transport_error = |source: TransportError| Error::Transport {
        url: path.to_owned(),
        source,
    };
    let io: Box<dyn IoEngine> = match Protocol::of(path) {
        Protocol::File => Box::new(FileIo::new(path)),
        Protocol::FileUri => {
            let file = Url::parse(path)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| Error::UnsupportedProtocol {
                    url: path.to_owned(),
                })?;
            Box::new(FileIo::new(file))
        }
        #[cfg(feature = "http")]
        Protocol::Http | Protocol::Https => Box::new(RemoteIo::new(
            HttpTransport::new(path).map_err(transport_error)?,
        )),
        Protocol::Ssh | Protocol::Sftp => Box::new(RemoteIo::new(
            SshTransport::new(path).map_err(transport_error)?,
        )),
        Protocol::DataUri | Protocol::Stdin => Box::new(XPathIo::new(path, XPathBacking::default())?),
        _ => {
            return Err(Error::UnsupportedProtocol {
                url: path.to_owned(),
            })
        }
    };
    Ok(io)
}

use crate::transport::TransportError;
use std::io;
use thiserror::Error;

/// Failures of structural I/O operations.
///
/// Per-byte operations (`read`, `write`, `get_byte`, `put_byte`) don't use
/// this type; they report failure in-band.
#[derive(Debug, Error)]
pub enum Error {
    /// The resource could not be opened in the requested mode.
    #[error("{path}: failed to open the data source in mode `{mode}`: {source}")]
    OpenFailed {
        /// Path or URL of the resource.
        path: String,
        /// The requested open mode.
        mode: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// An OS or library call failed.
    #[error("{path}: call to `{call}` failed: {source}")]
    CallFailed {
        /// Path or URL of the resource.
        path: String,
        /// Name of the failing call.
        call: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A buffer allocation failed.
    #[error("failed to allocate {size} bytes")]
    MallocFailed {
        /// Requested allocation size.
        size: u64,
    },

    /// A read asked for more bytes than the resource holds.
    #[error("{path}: cannot read {requested} bytes from a resource of {size} bytes")]
    InvalidAllocationSize {
        /// Path or URL of the resource.
        path: String,
        /// Number of bytes requested.
        requested: u64,
        /// Size of the resource.
        size: u64,
    },

    /// Replacing the content of a resource failed.
    #[error("{path}: transfer failed: {source}")]
    TransferFailed {
        /// Path or URL of the destination.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The source of a transfer could not be opened.
    #[error("{path}: failed to open the data source: {source}")]
    DataSourceOpenFailed {
        /// Path or URL of the source.
        path: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// Renaming a file over its destination failed.
    #[error("failed to rename `{from}` to `{to}`: {source}")]
    FileRenameFailed {
        /// The file being moved.
        from: String,
        /// The destination path.
        to: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A memory-to-memory transfer left either side in an error state.
    #[error("memory transfer failed")]
    MemoryTransferFailed,

    /// The engine or its transport can't perform the operation.
    #[error("{path}: `{operation}` is not supported")]
    CapabilityUnsupported {
        /// Path or URL of the resource.
        path: String,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// A remote transport failed.
    #[error("{url}: {source}")]
    Transport {
        /// URL of the remote resource.
        url: String,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// A `data:` URI could not be decoded.
    #[error("invalid data URI: {reason}")]
    InvalidDataUri {
        /// What was wrong with the URI.
        reason: String,
    },

    /// Standard input is attached to a terminal, not to data.
    #[error("standard input is a terminal")]
    StdinIsTerminal,

    /// No engine handles the URL scheme.
    #[error("{url}: unsupported protocol")]
    UnsupportedProtocol {
        /// The rejected URL.
        url: String,
    },
}

/// A specialized `Result` type for I/O engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn call(path: impl Into<String>, call: &'static str, source: io::Error) -> Self {
        Self::CallFailed {
            path: path.into(),
            call,
            source,
        }
    }

    pub(crate) fn not_open(path: impl Into<String>, call: &'static str) -> Self {
        Self::call(
            path,
            call,
            io::Error::new(io::ErrorKind::NotConnected, "the resource is not open"),
        )
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::OpenFailed { source, .. }
            | Error::CallFailed { source, .. }
            | Error::TransferFailed { source, .. }
            | Error::FileRenameFailed { source, .. } => source.kind(),
            Error::CapabilityUnsupported { .. } | Error::UnsupportedProtocol { .. } => {
                io::ErrorKind::Unsupported
            }
            Error::MallocFailed { .. } => io::ErrorKind::OutOfMemory,
            Error::InvalidAllocationSize { .. } | Error::InvalidDataUri { .. } => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

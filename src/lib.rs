//! Binary I/O engines
//!
//! Every engine implements [`IoEngine`]: positioned reads and writes, seeking,
//! memory mapping, and [`transfer`](IoEngine::transfer) to replace one
//! resource's content with another's. For a starting point, see [`MemIo`]
//! for memory buffers, [`FileIo`] for local files, and [`RemoteIo`] for
//! resources behind a [`Transport`]. [`create_io`] picks one for a path or
//! URL.

#![deny(missing_docs)]

mod data_buf;
mod engine;
mod error;
mod file_io;
#[cfg(feature = "http")]
mod http;
mod mem_io;
#[cfg(not(windows))]
mod posish;
mod protocol;
mod remote_io;
mod ssh;
mod stream;
mod transport;
#[cfg(windows)]
mod windows;
mod xpath_io;

/// Helpers for file-like types and file metadata.
pub(crate) mod filelike {
    #[cfg(not(windows))]
    pub(crate) use crate::posish::*;
    #[cfg(windows)]
    pub(crate) use crate::windows::*;
}

pub use data_buf::DataBuf;
pub use engine::{IoCloser, IoEngine, Position};
pub use error::{Error, Result};
pub use file_io::{read_file, write_file, FileIo, OpenMode};
#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpTransport, POST_URL_ENV};
pub use mem_io::MemIo;
pub use protocol::{create_io, Protocol};
pub use remote_io::{BlockState, RemoteIo, DEFAULT_BLOCK_SIZE};
pub use ssh::SshTransport;
pub use stream::IoStream;
pub use transport::{Transport, TransportError};
pub use xpath_io::{XPathBacking, XPathIo, GEN_FILE_SUFFIX, TEMP_FILE_SUFFIX};

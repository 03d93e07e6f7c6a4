//! Helpers for file-like types and file metadata on Windows.
//!
//! Windows has no Posix permission bits or extended attributes to carry
//! across a rename; only the read-only flag is preserved.

use io_lifetimes::AsFilelike;
use std::{
    fs::{self, File, Permissions},
    io,
    path::Path,
};
use system_interface::fs::{Advice, FileIoExt};
use tracing::warn;

/// Metadata of a file that a replace-by-rename would otherwise lose.
pub(crate) struct Preserved {
    permissions: Option<Permissions>,
}

/// Returns the length of the file behind `filelike`.
#[inline]
pub(crate) fn len<Filelike: AsFilelike>(filelike: &Filelike) -> io::Result<u64> {
    filelike
        .as_filelike_view::<File>()
        .metadata()
        .map(|meta| meta.len())
}

/// Announce the expected access pattern; purely a performance hint.
#[inline]
pub(crate) fn advise<Filelike: AsFilelike>(
    filelike: &Filelike,
    offset: u64,
    len: u64,
    advice: Advice,
) -> io::Result<()> {
    <File as FileIoExt>::advise(&filelike.as_filelike_view::<File>(), offset, len, advice)
}

pub(crate) fn capture(path: &Path) -> Preserved {
    let permissions = match fs::metadata(path) {
        Ok(meta) => Some(meta.permissions()),
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to stat file, permissions won't be preserved");
            None
        }
    };
    Preserved { permissions }
}

pub(crate) fn restore(path: &Path, preserved: &Preserved) {
    if let Some(permissions) = &preserved.permissions {
        if let Err(err) = fs::set_permissions(path, permissions.clone()) {
            warn!(path = %path.display(), %err, "failed to restore permissions");
        }
    }
}

//! Helpers for file-like types and file metadata on Posix-ish platforms.
//!
//! Permission bits are handled through `rustix`; extended attributes through
//! `xattr` when that feature is enabled.

use io_lifetimes::AsFilelike;
use rustix::fs::{chmod, stat, Mode, RawMode};
#[cfg(all(unix, feature = "xattr"))]
use std::ffi::OsString;
use std::{fs::File, io, path::Path};
use system_interface::fs::{Advice, FileIoExt};
use tracing::warn;

/// Metadata of a file that a replace-by-rename would otherwise lose.
pub(crate) struct Preserved {
    mode: Option<RawMode>,
    #[cfg(all(unix, feature = "xattr"))]
    xattrs: Vec<(OsString, Vec<u8>)>,
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

fn permissions(path: &Path) -> io::Result<RawMode> {
    Ok(stat(path)?.st_mode as RawMode & 0o7777)
}

#[cfg(all(unix, feature = "xattr"))]
fn xattrs(path: &Path) -> io::Result<Vec<(OsString, Vec<u8>)>> {
    let mut attrs = Vec::new();
    if !xattr::SUPPORTED_PLATFORM {
        return Ok(attrs);
    }
    for name in xattr::list_deref(path)? {
        if let Some(value) = xattr::get_deref(path, &name)? {
            attrs.push((name, value));
        }
    }
    Ok(attrs)
}

/// Capture the permission bits and extended attributes of `path`,
/// following symlinks. Failures are logged and leave the corresponding field
/// empty.
pub(crate) fn capture(path: &Path) -> Preserved {
    let mode = match permissions(path) {
        Ok(mode) => Some(mode),
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to stat file, permissions won't be preserved");
            None
        }
    };
    #[cfg(all(unix, feature = "xattr"))]
    let xattrs = match xattrs(path) {
        Ok(attrs) => attrs,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to list extended attributes");
            Vec::new()
        }
    };
    Preserved {
        mode,
        #[cfg(all(unix, feature = "xattr"))]
        xattrs,
    }
}

/// Reapply what [`capture`] saw. Best-effort: failures are logged, never
/// returned.
pub(crate) fn restore(path: &Path, preserved: &Preserved) {
    if let Some(orig) = preserved.mode {
        match permissions(path) {
            Ok(current) if current == orig => {}
            Ok(_) => {
                if let Err(err) = chmod(path, Mode::from_raw_mode(orig)) {
                    warn!(path = %path.display(), %err, "failed to restore permissions");
                }
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to stat replaced file");
            }
        }
    }

    #[cfg(all(unix, feature = "xattr"))]
    restore_xattrs(path, &preserved.xattrs);
}

#[cfg(all(unix, feature = "xattr"))]
fn restore_xattrs(path: &Path, xattrs: &[(OsString, Vec<u8>)]) {
    for (name, value) in xattrs {
        tracing::debug!(path = %path.display(), name = ?name, size = value.len(), "restoring xattr");
        if let Err(err) = xattr::set_deref(path, name, value) {
            warn!(path = %path.display(), name = ?name, %err, "failed to restore extended attribute");
        }
    }
}

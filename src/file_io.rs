use crate::{
    engine::{copy_stream, read_available},
    filelike, DataBuf, Error, IoCloser, IoEngine, Position, Result,
};
use memmap2::{MmapMut, MmapOptions};
use std::{
    cmp::max,
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use system_interface::fs::Advice;
use tracing::{debug, warn};

/// How a [`FileIo`] opens its file, in the vocabulary of C `fopen` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `"rb"`: read an existing file.
    Read,
    /// `"r+b"`: read and write an existing file.
    ReadWrite,
    /// `"wb"`: create or truncate, then write.
    Truncate,
    /// `"w+b"`: create or truncate, then read and write.
    TruncateRead,
    /// `"ab"`: create if needed, every write goes to the end.
    Append,
    /// `"a+b"`: like `Append`, and reads are allowed anywhere.
    AppendRead,
}

impl OpenMode {
    /// Returns the `fopen`-style spelling of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "rb",
            Self::ReadWrite => "r+b",
            Self::Truncate => "wb",
            Self::TruncateRead => "w+b",
            Self::Append => "ab",
            Self::AppendRead => "a+b",
        }
    }

    /// Returns `true` if a file opened in this mode can be read.
    #[must_use]
    pub fn can_read(self) -> bool {
        !matches!(self, Self::Truncate | Self::Append)
    }

    /// Returns `true` if a file opened in this mode can be written.
    #[must_use]
    pub fn can_write(self) -> bool {
        !matches!(self, Self::Read)
    }

    fn is_append(self) -> bool {
        matches!(self, Self::Append | Self::AppendRead)
    }

    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::Read => options.read(true),
            Self::ReadWrite => options.read(true).write(true),
            Self::Truncate => options.write(true).create(true).truncate(true),
            Self::TruncateRead => options.read(true).write(true).create(true).truncate(true),
            Self::Append => options.append(true).create(true),
            Self::AppendRead => options.read(true).append(true).create(true),
        };
        options
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = io::Error;

    /// Parse an `fopen` mode. The `b` is optional and may come before or
    /// after the `+`.
    fn from_str(s: &str) -> io::Result<Self> {
        let mode: String = s.chars().filter(|c| *c != 'b').collect();
        Ok(match mode.as_str() {
            "r" => Self::Read,
            "r+" => Self::ReadWrite,
            "w" => Self::Truncate,
            "w+" => Self::TruncateRead,
            "a" => Self::Append,
            "a+" => Self::AppendRead,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid open mode `{}`", s),
                ))
            }
        })
    }
}

/// The last kind of operation performed on the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpMode {
    Read,
    Write,
    Seek,
}

/// The open file, wrapped for the kind of access in progress.
///
/// A bare `Seek` file is always positioned at `FileIo::pos`.
enum Handle {
    Seek(File),
    Read(BufReader<File>),
    Write(BufWriter<File>),
}

impl Handle {
    fn op_mode(&self) -> OpMode {
        match self {
            Self::Seek(_) => OpMode::Seek,
            Self::Read(_) => OpMode::Read,
            Self::Write(_) => OpMode::Write,
        }
    }

    fn file(&self) -> &File {
        match self {
            Self::Seek(file) => file,
            Self::Read(reader) => reader.get_ref(),
            Self::Write(writer) => writer.get_ref(),
        }
    }
}

enum Mapping {
    /// Shared with the file; flushed on release.
    Shared(MmapMut),
    /// Private copy-on-write view; changes are discarded.
    Private(MmapMut),
    /// Mapping a zero-length file is not possible.
    Empty,
}

/// Binary I/O over a file on the local filesystem.
///
/// Constructing a `FileIo` never touches the filesystem; failures surface
/// from [`open`](IoEngine::open). Reads and writes go through buffers that
/// are flushed whenever the handle switches between reading, writing, and
/// seeking, so the position reported by [`tell`](IoEngine::tell) is always
/// exact.
pub struct FileIo {
    path: PathBuf,
    open_mode: OpenMode,
    handle: Option<Handle>,
    mapping: Option<Mapping>,
    pos: u64,
    eof: bool,
    failed: bool,
}

impl FileIo {
    /// Create an engine for the file at `path`. The file is not opened.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            open_mode: OpenMode::Read,
            handle: None,
            mapping: None,
            pos: 0,
            eof: false,
            failed: false,
        }
    }

    /// Returns the path of the file.
    #[inline]
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Returns the mode the file was last opened in.
    #[inline]
    #[must_use]
    pub fn open_mode(&self) -> OpenMode {
        self.open_mode
    }

    /// Close the file if it is open and point the engine at `path`.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.close()?;
        self.path = path.into();
        Ok(())
    }

    /// Open the file in `mode`, closing it first if it is open.
    pub fn open_with(&mut self, mode: OpenMode) -> Result<()> {
        self.close()?;
        let file = mode
            .options()
            .open(&self.path)
            .map_err(|source| Error::OpenFailed {
                path: self.path(),
                mode: mode.to_string(),
                source,
            })?;
        self.open_mode = mode;
        self.handle = Some(Handle::Seek(file));
        self.pos = 0;
        self.eof = false;
        self.failed = false;
        Ok(())
    }

    /// Flush or drop buffered state, leaving a bare file positioned at
    /// `self.pos`. On failure the bare file is put back as the handle.
    fn settle(&mut self) -> Result<File> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Err(Error::not_open(self.path(), "settle")),
        };
        let was_writer = handle.op_mode() == OpMode::Write;
        let (mut file, flushed) = match handle {
            Handle::Seek(file) => return Ok(file),
            Handle::Read(reader) => (reader.into_inner(), Ok(())),
            Handle::Write(writer) => match writer.into_inner() {
                Ok(file) => (file, Ok(())),
                Err(err) => {
                    let (source, writer) = err.into_parts();
                    let (file, _lost) = writer.into_parts();
                    (file, Err(source))
                }
            },
        };
        if let Err(source) = flushed {
            self.failed = true;
            self.handle = Some(Handle::Seek(file));
            return Err(Error::call(self.path(), "fflush", source));
        }

        // Appended bytes land at the end regardless of where we thought we were.
        let positioned = if was_writer && self.open_mode.is_append() {
            file.stream_position()
        } else {
            file.seek(SeekFrom::Start(self.pos))
        };
        match positioned {
            Ok(pos) => {
                self.pos = pos;
                Ok(file)
            }
            Err(source) => {
                self.handle = Some(Handle::Seek(file));
                Err(Error::call(self.path(), "fseek", source))
            }
        }
    }

    /// Replace the handle with a fresh read-write one at the same offset.
    fn reopen_read_write(&mut self, file: File) -> Result<File> {
        debug!(path = %self.path.display(), mode = %self.open_mode, pos = self.pos, "reopening read-write");
        let mut reopened = match OpenMode::ReadWrite.options().open(&self.path) {
            Ok(reopened) => reopened,
            Err(source) => {
                self.handle = Some(Handle::Seek(file));
                return Err(Error::OpenFailed {
                    path: self.path(),
                    mode: OpenMode::ReadWrite.to_string(),
                    source,
                });
            }
        };
        drop(file);
        self.open_mode = OpenMode::ReadWrite;
        if let Err(source) = reopened.seek(SeekFrom::Start(self.pos)) {
            self.handle = Some(Handle::Seek(reopened));
            return Err(Error::call(self.path(), "fseek", source));
        }
        Ok(reopened)
    }

    /// Prepare the handle for `target` access.
    ///
    /// Moving out of `Seek` only rewraps the file. Moving between reading and
    /// writing flushes buffers, and reopens the file read-write when the
    /// current mode doesn't allow the new kind of access.
    fn switch_mode(&mut self, target: OpMode) -> Result<()> {
        match &self.handle {
            None => return Err(Error::not_open(self.path(), "switch_mode")),
            Some(handle) if handle.op_mode() == target => return Ok(()),
            Some(_) => {}
        }
        let mut file = self.settle()?;
        let allowed = match target {
            OpMode::Read => self.open_mode.can_read(),
            OpMode::Write => self.open_mode.can_write(),
            OpMode::Seek => true,
        };
        if !allowed {
            file = self.reopen_read_write(file)?;
        }
        self.handle = Some(match target {
            OpMode::Read => Handle::Read(BufReader::new(file)),
            OpMode::Write => Handle::Write(BufWriter::new(file)),
            OpMode::Seek => Handle::Seek(file),
        });
        Ok(())
    }

    /// Pass an access-pattern hint for the whole file to the OS.
    fn advise(&self, advice: Advice) {
        if let Some(handle) = &self.handle {
            if let Err(err) = filelike::advise(handle.file(), 0, self.size(), advice) {
                debug!(path = %self.path.display(), %err, "advise failed");
            }
        }
    }

    /// Resolve the file that a rename should replace: the target of a
    /// symlink rather than the link itself.
    fn rename_target(&self) -> PathBuf {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.file_type().is_symlink() => match fs::read_link(&self.path) {
                Ok(link) if link.is_absolute() => link,
                Ok(link) => match self.path.parent() {
                    Some(parent) => parent.join(link),
                    None => link,
                },
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "failed to read symlink, replacing the link itself");
                    self.path.clone()
                }
            },
            _ => self.path.clone(),
        }
    }

    /// Move `src`'s file over ours.
    fn replace_with(&mut self, src: &mut FileIo) -> Result<()> {
        src.close()?;

        // Probe that we may write the destination before giving up the source.
        if let Err(source) = OpenMode::AppendRead.options().open(&self.path) {
            if let Err(err) = fs::remove_file(&src.path) {
                warn!(path = %src.path.display(), %err, "failed to remove transfer source");
            }
            return Err(Error::OpenFailed {
                path: self.path(),
                mode: OpenMode::AppendRead.to_string(),
                source,
            });
        }

        let target = self.rename_target();
        let preserved = filelike::capture(&target);
        debug!(from = %src.path.display(), to = %target.display(), "replacing file");
        fs::rename(&src.path, &target).map_err(|source| Error::FileRenameFailed {
            from: src.path(),
            to: target.display().to_string(),
            source,
        })?;
        filelike::restore(&target, &preserved);
        Ok(())
    }

    /// Truncate our file and stream all of `src` into it.
    fn copy_from(&mut self, src: &mut dyn IoEngine) -> Result<()> {
        self.open_with(OpenMode::TruncateRead)?;
        src.open().map_err(|err| Error::DataSourceOpenFailed {
            path: src.path(),
            source: Box::new(err),
        })?;
        let copied = self.write_from(src);
        let failed = self.error() || src.error();
        src.close()?;
        copied?;
        if failed {
            return Err(Error::TransferFailed {
                path: self.path(),
                source: io::Error::new(io::ErrorKind::Other, "stream copy failed"),
            });
        }
        Ok(())
    }
}

impl IoEngine for FileIo {
    /// Open the file for reading. The handle is upgraded to read-write on
    /// the first write.
    #[inline]
    fn open(&mut self) -> Result<()> {
        self.open_with(OpenMode::Read)
    }

    fn close(&mut self) -> Result<()> {
        let mut result = self.munmap();
        if self.handle.is_some() {
            if let Err(err) = self.settle() {
                result = result.and(Err(err));
            }
            self.handle = None;
        }
        self.eof = false;
        result
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if self.switch_mode(OpMode::Write).is_err() {
            return 0;
        }
        let writer = match &mut self.handle {
            Some(Handle::Write(writer)) => writer,
            _ => return 0,
        };
        let mut written = 0;
        while written < data.len() {
            match writer.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(path = %self.path.display(), %err, "write failed");
                    self.failed = true;
                    break;
                }
            }
        }
        if self.open_mode.is_append() {
            self.pos = self.size();
        } else {
            self.pos += written as u64;
        }
        written
    }

    fn write_from(&mut self, src: &mut dyn IoEngine) -> Result<u64> {
        if !src.is_open() {
            return Ok(0);
        }
        self.switch_mode(OpMode::Write)?;
        Ok(copy_stream(self, src))
    }

    #[inline]
    fn put_byte(&mut self, byte: u8) -> Option<u8> {
        (self.write(&[byte]) == 1).then(|| byte)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.switch_mode(OpMode::Read).is_err() {
            return 0;
        }
        let reader = match &mut self.handle {
            Some(Handle::Read(reader)) => reader,
            _ => return 0,
        };
        let mut total = 0;
        while total < buf.len() {
            match reader.read(&mut buf[total..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => total += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(path = %self.path.display(), %err, "read failed");
                    self.failed = true;
                    break;
                }
            }
        }
        self.pos += total as u64;
        total
    }

    fn read_data(&mut self, count: u64) -> Result<DataBuf> {
        let size = self.size();
        if count > size {
            return Err(Error::InvalidAllocationSize {
                path: self.path(),
                requested: count,
                size,
            });
        }
        read_available(self, count)
    }

    #[inline]
    fn get_byte(&mut self) -> Option<u8> {
        let mut byte = [0_u8];
        (self.read(&mut byte) == 1).then(|| byte[0])
    }

    fn transfer(&mut self, src: &mut dyn IoEngine) -> Result<()> {
        let was_open = self.is_open();
        let last_mode = self.open_mode;
        self.close()?;

        match src.as_file_io() {
            Some(file_src) => self.replace_with(file_src)?,
            None => self.copy_from(src)?,
        }

        if was_open {
            let mode = match last_mode {
                OpenMode::Truncate | OpenMode::TruncateRead => OpenMode::ReadWrite,
                mode => mode,
            };
            self.open_with(mode)
        } else {
            self.close()
        }
    }

    fn seek(&mut self, offset: i64, pos: Position) -> Result<u64> {
        self.switch_mode(OpMode::Seek)?;
        let target = match pos {
            Position::Begin => match u64::try_from(offset) {
                Ok(offset) => SeekFrom::Start(offset),
                Err(err) => {
                    return Err(Error::call(
                        self.path(),
                        "fseek",
                        io::Error::new(io::ErrorKind::InvalidInput, err),
                    ))
                }
            },
            Position::Current => SeekFrom::Current(offset),
            Position::End => SeekFrom::End(offset),
        };
        let file = match &mut self.handle {
            Some(Handle::Seek(file)) => file,
            _ => return Err(Error::not_open(self.path(), "fseek")),
        };
        match file.seek(target) {
            Ok(new_pos) => {
                self.pos = new_pos;
                self.eof = false;
                Ok(new_pos)
            }
            Err(source) => Err(Error::call(self.path(), "fseek", source)),
        }
    }

    fn mmap(&mut self, writeable: bool) -> Result<&mut [u8]> {
        self.munmap()?;
        self.switch_mode(OpMode::Seek)?;
        if writeable && !(self.open_mode.can_read() && self.open_mode.can_write()) {
            let file = self.settle()?;
            let file = self.reopen_read_write(file)?;
            self.handle = Some(Handle::Seek(file));
        }

        let size = self.size();
        let len = usize::try_from(size).map_err(|_| Error::MallocFailed { size })?;
        let file = match &self.handle {
            Some(handle) => handle.file(),
            None => return Err(Error::not_open(self.path(), "mmap")),
        };
        let mapping = if len == 0 {
            Mapping::Empty
        } else {
            if let Err(err) = filelike::advise(file, 0, size, Advice::WillNeed) {
                debug!(path = %self.path.display(), %err, "advise failed");
            }
            let mut options = MmapOptions::new();
            options.len(len);
            // SAFETY: the mapping is only reachable through a borrow of
            // `self`, and is dropped before the file is closed or replaced.
            // Other processes truncating the file is outside our control.
            let mapped = unsafe {
                if writeable {
                    options.map_mut(file)
                } else {
                    options.map_copy(file)
                }
            };
            let mapped = mapped.map_err(|source| Error::call(self.path(), "mmap", source))?;
            if writeable {
                Mapping::Shared(mapped)
            } else {
                Mapping::Private(mapped)
            }
        };

        Ok(match self.mapping.insert(mapping) {
            Mapping::Shared(mapped) | Mapping::Private(mapped) => &mut mapped[..],
            Mapping::Empty => &mut [],
        })
    }

    fn munmap(&mut self) -> Result<()> {
        match self.mapping.take() {
            Some(Mapping::Shared(mapped)) => mapped
                .flush()
                .map_err(|source| Error::call(self.path(), "msync", source)),
            _ => Ok(()),
        }
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    /// Returns the size of the file, counting bytes still in the write
    /// buffer. Returns 0 if the file can't be examined.
    fn size(&self) -> u64 {
        let handle = match &self.handle {
            Some(handle) => handle,
            None => return fs::metadata(&self.path).map_or(0, |meta| meta.len()),
        };
        let len = match filelike::len(handle.file()) {
            Ok(len) => len,
            Err(err) => {
                debug!(path = %self.path.display(), %err, "fstat failed");
                return 0;
            }
        };
        match handle {
            Handle::Write(writer) if self.open_mode.is_append() => len + writer.buffer().len() as u64,
            Handle::Write(_) => max(len, self.pos),
            _ => len,
        }
    }

    #[inline]
    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    #[inline]
    fn error(&self) -> bool {
        self.failed
    }

    #[inline]
    fn eof(&self) -> bool {
        self.eof
    }

    #[inline]
    fn path(&self) -> String {
        self.path.display().to_string()
    }

    #[inline]
    fn as_file_io(&mut self) -> Option<&mut FileIo> {
        Some(self)
    }
}

impl Drop for FileIo {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(path = %self.path.display(), %err, "close on drop failed");
        }
    }
}

/// Read the whole file at `path` into memory.
pub fn read_file(path: impl AsRef<Path>) -> Result<DataBuf> {
    let path = path.as_ref();
    let mut file = FileIo::new(path);
    file.open_with(OpenMode::Read)
        .map_err(|err| Error::DataSourceOpenFailed {
            path: path.display().to_string(),
            source: Box::new(err),
        })?;
    let mut io = IoCloser::new(&mut file);
    let size = io.size();
    io.advise(Advice::Sequential);
    let buf = io.read_data(size)?;
    if buf.len() as u64 != size {
        return Err(Error::call(
            io.path(),
            "FileIo::read",
            io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while reading"),
        ));
    }
    Ok(buf)
}

/// Create or truncate the file at `path` and write `buf` to it.
///
/// Returns the number of bytes written.
pub fn write_file(buf: &[u8], path: impl AsRef<Path>) -> Result<u64> {
    let mut file = FileIo::new(path.as_ref());
    file.open_with(OpenMode::Truncate)?;
    let written = file.write(buf);
    file.close()?;
    if written != buf.len() {
        return Err(Error::call(
            file.path(),
            "FileIo::write",
            io::Error::new(io::ErrorKind::WriteZero, "short write"),
        ));
    }
    Ok(written as u64)
}

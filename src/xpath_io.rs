use crate::{DataBuf, Error, FileIo, IoEngine, IoStream, MemIo, Position, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::{
    fs,
    io::{self, IsTerminal, Read},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// Suffix of a materialized file that is deleted on drop.
pub const TEMP_FILE_SUFFIX: &str = ".io-engines_temp";

/// Suffix a materialized file gets once it has been written to and kept.
pub const GEN_FILE_SUFFIX: &str = ".io-engines";

/// Where an [`XPathIo`] keeps the data it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XPathBacking {
    /// A [`MemIo`].
    Memory,
    /// A [`FileIo`] over a new file in `dir`.
    TempFile {
        /// Directory to create the file in.
        dir: PathBuf,
    },
}

impl Default for XPathBacking {
    fn default() -> Self {
        Self::TempFile {
            dir: PathBuf::from("."),
        }
    }
}

enum Backing {
    Mem(MemIo),
    File {
        io: FileIo,
        /// Set while the file is still ours to delete.
        temp: Option<PathBuf>,
    },
}

/// Binary I/O over data that can only be read once, such as standard input
/// or a `data:` URI.
///
/// The data is read in full up front into memory or into a file, and all
/// operations are forwarded to the resulting [`MemIo`] or [`FileIo`]. A
/// file is deleted on drop unless the engine has been the destination of a
/// [`transfer`](IoEngine::transfer), which renames it from
/// `*`[`TEMP_FILE_SUFFIX`] to `*`[`GEN_FILE_SUFFIX`] and keeps it.
pub struct XPathIo {
    backing: Backing,
}

impl XPathIo {
    /// Read the source `path` names: `-` for standard input, or a `data:`
    /// URI.
    pub fn new(path: &str, backing: XPathBacking) -> Result<Self> {
        if path == "-" {
            Self::from_stdin(backing)
        } else if path.starts_with("data:") {
            Self::from_data_uri(path, backing)
        } else {
            Err(Error::UnsupportedProtocol {
                url: path.to_owned(),
            })
        }
    }

    /// Read all of standard input. Fails if it is a terminal.
    pub fn from_stdin(backing: XPathBacking) -> Result<Self> {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            return Err(Error::StdinIsTerminal);
        }
        Self::from_reader(stdin.lock(), backing)
    }

    /// Decode the base64 payload of a `data:` URI.
    pub fn from_data_uri(uri: &str, backing: XPathBacking) -> Result<Self> {
        let data = decode_data_uri(uri)?;
        match backing {
            XPathBacking::Memory => Ok(Self {
                backing: Backing::Mem(MemIo::from_bytes(data)),
            }),
            backing => Self::from_reader(&data[..], backing),
        }
    }

    /// Read `reader` to its end.
    pub fn from_reader(mut reader: impl Read, backing: XPathBacking) -> Result<Self> {
        let backing = match backing {
            XPathBacking::Memory => {
                let mut mem = MemIo::new();
                io::copy(&mut reader, &mut IoStream::new(&mut mem))
                    .map_err(|source| Error::call("MemIo", "read", source))?;
                mem.open()?;
                Backing::Mem(mem)
            }
            XPathBacking::TempFile { dir } => {
                let path = write_temp_file(&mut reader, &dir)?;
                debug!(path = %path.display(), "materialized input");
                Backing::File {
                    io: FileIo::new(&path),
                    temp: Some(path),
                }
            }
        };
        Ok(Self { backing })
    }

    /// Returns `true` if the backing file will be deleted on drop.
    pub fn is_temporary(&self) -> bool {
        matches!(self.backing, Backing::File { temp: Some(_), .. })
    }

    /// Returns the path of the backing file, if there is one.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Mem(_) => None,
            Backing::File { io, .. } => Some(io.file_path()),
        }
    }

    fn engine(&self) -> &dyn IoEngine {
        match &self.backing {
            Backing::Mem(mem) => mem,
            Backing::File { io, .. } => io,
        }
    }

    fn engine_mut(&mut self) -> &mut dyn IoEngine {
        match &mut self.backing {
            Backing::Mem(mem) => mem,
            Backing::File { io, .. } => io,
        }
    }

    /// Rename the temporary file to its permanent name and stop owning it.
    ///
    /// If the rename fails the file keeps its temporary name and is still
    /// removed on drop.
    fn keep_file(&mut self) -> Result<()> {
        if let Backing::File { io, temp } = &mut self.backing {
            if let Some(temp_path) = temp.as_deref() {
                let kept = kept_path(temp_path);
                io.close()?;
                match fs::rename(temp_path, &kept) {
                    Ok(()) => {
                        io.set_path(&kept)?;
                        *temp = None;
                    }
                    Err(err) => {
                        warn!(from = %temp_path.display(), to = %kept.display(), %err, "failed to rename temporary file");
                    }
                }
            }
        }
        Ok(())
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    const MARKER: &str = "base64,";
    let start = uri.find(MARKER).ok_or_else(|| Error::InvalidDataUri {
        reason: "no base64 data".to_owned(),
    })?;
    let data = STANDARD
        .decode(uri[start + MARKER.len()..].trim_end())
        .map_err(|err| Error::InvalidDataUri {
            reason: err.to_string(),
        })?;
    if data.is_empty() {
        return Err(Error::InvalidDataUri {
            reason: "empty payload".to_owned(),
        });
    }
    Ok(data)
}

/// Copy `reader` into a new file named after the current time.
fn write_temp_file(reader: &mut impl Read, dir: &Path) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());
    let mut file = tempfile::Builder::new()
        .prefix(&timestamp.to_string())
        .suffix(TEMP_FILE_SUFFIX)
        .tempfile_in(dir)
        .map_err(|source| Error::OpenFailed {
            path: dir.display().to_string(),
            mode: "w+b".to_owned(),
            source,
        })?;
    io::copy(reader, &mut file)
        .map_err(|source| Error::call(file.path().display().to_string(), "write", source))?;
    let (_, path) = file
        .keep()
        .map_err(|err| Error::call(dir.display().to_string(), "keep", err.error))?;
    Ok(path)
}

fn kept_path(temp_path: &Path) -> PathBuf {
    let name = temp_path.to_string_lossy();
    match name.strip_suffix(TEMP_FILE_SUFFIX) {
        Some(stem) => PathBuf::from(format!("{}{}", stem, GEN_FILE_SUFFIX)),
        None => temp_path.to_owned(),
    }
}

impl IoEngine for XPathIo {
    #[inline]
    fn open(&mut self) -> Result<()> {
        self.engine_mut().open()
    }

    #[inline]
    fn close(&mut self) -> Result<()> {
        self.engine_mut().close()
    }

    #[inline]
    fn write(&mut self, data: &[u8]) -> usize {
        self.engine_mut().write(data)
    }

    #[inline]
    fn write_from(&mut self, src: &mut dyn IoEngine) -> Result<u64> {
        self.engine_mut().write_from(src)
    }

    #[inline]
    fn put_byte(&mut self, byte: u8) -> Option<u8> {
        self.engine_mut().put_byte(byte)
    }

    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.engine_mut().read(buf)
    }

    #[inline]
    fn read_data(&mut self, count: u64) -> Result<DataBuf> {
        self.engine_mut().read_data(count)
    }

    #[inline]
    fn get_byte(&mut self) -> Option<u8> {
        self.engine_mut().get_byte()
    }

    /// Keep the backing file under its permanent name, then replace its
    /// content with `src`'s.
    fn transfer(&mut self, src: &mut dyn IoEngine) -> Result<()> {
        self.keep_file()?;
        self.engine_mut().transfer(src)
    }

    #[inline]
    fn seek(&mut self, offset: i64, pos: Position) -> Result<u64> {
        self.engine_mut().seek(offset, pos)
    }

    #[inline]
    fn mmap(&mut self, writeable: bool) -> Result<&mut [u8]> {
        self.engine_mut().mmap(writeable)
    }

    #[inline]
    fn munmap(&mut self) -> Result<()> {
        self.engine_mut().munmap()
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.engine().tell()
    }

    #[inline]
    fn size(&self) -> u64 {
        self.engine().size()
    }

    #[inline]
    fn is_open(&self) -> bool {
        self.engine().is_open()
    }

    #[inline]
    fn error(&self) -> bool {
        self.engine().error()
    }

    #[inline]
    fn eof(&self) -> bool {
        self.engine().eof()
    }

    #[inline]
    fn path(&self) -> String {
        self.engine().path()
    }

    fn as_file_io(&mut self) -> Option<&mut FileIo> {
        match &mut self.backing {
            Backing::File { io, .. } => Some(io),
            Backing::Mem(_) => None,
        }
    }

    fn as_mem_io(&mut self) -> Option<&mut MemIo> {
        match &mut self.backing {
            Backing::Mem(mem) => Some(mem),
            Backing::File { .. } => None,
        }
    }
}

impl Drop for XPathIo {
    fn drop(&mut self) {
        if let Backing::File {
            io,
            temp: Some(path),
        } = &mut self.backing
        {
            let _ = io.close();
            if let Err(err) = fs::remove_file(&*path) {
                debug!(path = %path.display(), %err, "failed to remove temporary file");
            }
        }
    }
}

use crate::{engine::copy_stream, Error, IoEngine, Position, Result};
use bytes::Bytes;
use std::{
    cmp::{max, min},
    io, mem,
};

/// Minimum size of the first owned allocation.
const MIN_BLOCK_SIZE: usize = 32 * 1024;

/// Upper bound on a single growth step.
const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

enum Store {
    /// Externally supplied bytes; never written to.
    Shared(Bytes),
    /// Bytes this engine owns exclusively.
    Owned(Vec<u8>),
}

impl Store {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Shared(bytes) => bytes,
            Self::Owned(vec) => vec,
        }
    }
}

/// Binary I/O over a growable memory buffer.
///
/// A `MemIo` built from existing data reads it in place. The first write
/// copies it into a buffer the engine owns, so the original is never
/// modified. `MemIo` is always open.
pub struct MemIo {
    store: Store,
    idx: u64,
    eof: bool,
    failed: bool,
}

impl MemIo {
    /// Create an empty memory engine.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Create a memory engine that reads `data` without copying it.
    #[inline]
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            store: Store::Shared(data.into()),
            idx: 0,
            eof: false,
            failed: false,
        }
    }

    /// Create a memory engine over static data.
    #[inline]
    #[must_use]
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(data))
    }

    /// Returns the bytes currently held.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.store.as_slice()
    }

    /// Give up the engine, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self.store {
            Store::Shared(bytes) => bytes,
            Store::Owned(vec) => Bytes::from(vec),
        }
    }

    /// Advance the position by `count` bytes as if they had been written,
    /// growing the buffer to cover them without copying any data in. Bytes
    /// in the gap that were never written read back as zeros.
    ///
    /// Returns the number of bytes reserved, 0 on allocation failure.
    pub fn write_reserved(&mut self, count: usize) -> usize {
        if self.reserve(count).is_err() {
            self.failed = true;
            return 0;
        }
        self.idx += count as u64;
        count
    }

    fn make_owned(&mut self, capacity: usize) -> Result<&mut Vec<u8>> {
        if let Store::Shared(bytes) = &self.store {
            let size = max(capacity, bytes.len());
            let mut owned = Vec::new();
            owned
                .try_reserve_exact(size)
                .map_err(|_| Error::MallocFailed { size: size as u64 })?;
            owned.extend_from_slice(bytes);
            self.store = Store::Owned(owned);
        }
        match &mut self.store {
            Store::Owned(owned) => Ok(owned),
            Store::Shared(_) => unreachable!(),
        }
    }

    /// Make room for `count` bytes at the current position.
    fn reserve(&mut self, count: usize) -> Result<&mut Vec<u8>> {
        let need = self
            .idx
            .checked_add(count as u64)
            .and_then(|need| usize::try_from(need).ok())
            .ok_or(Error::MallocFailed {
                size: self.idx.saturating_add(count as u64),
            })?;

        let too_big = || Error::MallocFailed { size: need as u64 };
        let first_block = next_multiple(need, MIN_BLOCK_SIZE).ok_or_else(too_big)?;
        let buf = self.make_owned(first_block)?;

        if need > buf.capacity() {
            let block = min(
                max(buf.capacity().saturating_mul(2), MIN_BLOCK_SIZE),
                MAX_BLOCK_SIZE,
            );
            let want = next_multiple(need, block).ok_or_else(too_big)?;
            buf.try_reserve_exact(want - buf.len())
                .map_err(|_| Error::MallocFailed { size: want as u64 })?;
        }
        if need > buf.len() {
            buf.resize(need, 0);
        }
        Ok(buf)
    }
}

/// The smallest multiple of `block` strictly greater than `need`.
fn next_multiple(need: usize, block: usize) -> Option<usize> {
    (need / block).checked_add(1)?.checked_mul(block)
}

impl Default for MemIo {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl IoEngine for MemIo {
    #[inline]
    fn open(&mut self) -> Result<()> {
        self.idx = 0;
        self.eof = false;
        Ok(())
    }

    #[inline]
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let start = self.idx as usize;
        match self.reserve(data.len()) {
            Ok(buf) => buf[start..start + data.len()].copy_from_slice(data),
            Err(_) => {
                self.failed = true;
                return 0;
            }
        }
        self.idx += data.len() as u64;
        data.len()
    }

    fn write_from(&mut self, src: &mut dyn IoEngine) -> Result<u64> {
        if !src.is_open() {
            return Ok(0);
        }
        Ok(copy_stream(self, src))
    }

    fn put_byte(&mut self, byte: u8) -> Option<u8> {
        (self.write(&[byte]) == 1).then(|| byte)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.store.as_slice();
        let avail = (data.len() as u64).saturating_sub(self.idx);
        let allow = min(buf.len() as u64, avail) as usize;
        if allow > 0 {
            let start = self.idx as usize;
            buf[..allow].copy_from_slice(&data[start..start + allow]);
        }
        self.idx += allow as u64;
        if buf.len() as u64 > avail {
            self.eof = true;
        }
        allow
    }

    fn get_byte(&mut self) -> Option<u8> {
        let data = self.store.as_slice();
        match usize::try_from(self.idx).ok().and_then(|idx| data.get(idx)) {
            Some(&byte) => {
                self.idx += 1;
                Some(byte)
            }
            None => {
                self.eof = true;
                None
            }
        }
    }

    fn transfer(&mut self, src: &mut dyn IoEngine) -> Result<()> {
        if let Some(mem) = src.as_mem_io() {
            self.store = mem::replace(&mut mem.store, Store::Shared(Bytes::new()));
            mem.idx = 0;
            mem.eof = false;
        } else {
            src.open().map_err(|err| Error::DataSourceOpenFailed {
                path: src.path(),
                source: Box::new(err),
            })?;
            self.store = Store::Shared(Bytes::new());
            self.idx = 0;
            copy_stream(self, src);
            src.close()?;
        }
        self.idx = 0;
        self.eof = false;
        if self.error() || src.error() {
            return Err(Error::MemoryTransferFailed);
        }
        Ok(())
    }

    fn seek(&mut self, offset: i64, pos: Position) -> Result<u64> {
        let base = match pos {
            Position::Begin => 0,
            Position::Current => i128::from(self.idx),
            Position::End => self.store.as_slice().len() as i128,
        };
        let new_idx = base + i128::from(offset);
        if new_idx < 0 {
            return Err(Error::call(
                self.path(),
                "seek",
                io::Error::new(io::ErrorKind::InvalidInput, "negative position"),
            ));
        }
        self.idx = u64::try_from(new_idx).map_err(|err| {
            Error::call(
                "MemIo",
                "seek",
                io::Error::new(io::ErrorKind::InvalidInput, err),
            )
        })?;
        self.eof = false;
        Ok(self.idx)
    }

    fn mmap(&mut self, _writeable: bool) -> Result<&mut [u8]> {
        let buf = self.make_owned(0)?;
        Ok(buf.as_mut_slice())
    }

    #[inline]
    fn munmap(&mut self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.idx
    }

    #[inline]
    fn size(&self) -> u64 {
        self.store.as_slice().len() as u64
    }

    #[inline]
    fn is_open(&self) -> bool {
        true
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
        "MemIo".to_owned()
    }

    #[inline]
    fn as_mem_io(&mut self) -> Option<&mut MemIo> {
        Some(self)
    }
}

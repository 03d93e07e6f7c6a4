use crate::{DataBuf, Error, FileIo, MemIo, Result};
use std::{
    cmp::min,
    ops::{Deref, DerefMut},
};
use tracing::debug;

/// Size of the intermediate buffer used when streaming one engine into
/// another.
pub(crate) const COPY_BUF_SIZE: usize = 4096;

/// Anchor for [`IoEngine::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Relative to the start of the resource.
    Begin,
    /// Relative to the current position.
    Current,
    /// Relative to the end of the resource.
    End,
}

/// The common binary I/O contract.
///
/// Every engine holds exactly one resource and a current position. Reads and
/// writes start at the current position and advance it by the number of
/// bytes transferred.
///
/// Byte-level operations report failure in-band: `read` and `write` return
/// the number of bytes actually moved, and `get_byte`/`put_byte` return
/// `None`. Structural operations return a [`Result`].
pub trait IoEngine {
    /// Open the resource in the engine's default mode, which allows reading
    /// and writing.
    ///
    /// Calling `open` on an open engine flushes pending writes and resets the
    /// position to the start.
    fn open(&mut self) -> Result<()>;

    /// Release any mapping and the underlying handle. Closing a closed engine
    /// succeeds and does nothing.
    fn close(&mut self) -> Result<()>;

    /// Write `data` at the current position, growing the resource as needed.
    ///
    /// Returns the number of bytes written, 0 if nothing could be written.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Stream everything from `src`'s current position to its end into this
    /// engine.
    ///
    /// Returns the number of bytes written. If the destination stops
    /// accepting bytes midway, `src` is rewound so that its position reflects
    /// exactly what was consumed.
    fn write_from(&mut self, src: &mut dyn IoEngine) -> Result<u64>;

    /// Write one byte. Returns the byte written, or `None` on failure.
    fn put_byte(&mut self, byte: u8) -> Option<u8>;

    /// Read up to `buf.len()` bytes. Returns the number of bytes read, which
    /// is 0 at the end of the resource or on failure.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Read up to `count` bytes into a new buffer whose length is the number
    /// of bytes actually read.
    fn read_data(&mut self, count: u64) -> Result<DataBuf> {
        read_available(self, count)
    }

    /// Read one byte. Returns `None` at the end of the resource or on
    /// failure.
    fn get_byte(&mut self) -> Option<u8>;

    /// Discard this engine's content and replace it with the entire content
    /// of `src`.
    ///
    /// `src` is invalidated and must not be used afterward.
    fn transfer(&mut self, src: &mut dyn IoEngine) -> Result<()>;

    /// Move the current position. Returns the new absolute position.
    fn seek(&mut self, offset: i64, pos: Position) -> Result<u64>;

    /// Direct access to the engine's bytes.
    ///
    /// The view lives until the next `munmap`, `close`, or any other call on
    /// the engine. Changes to a writeable view reach the backing store no
    /// later than `munmap`; changes to a read-only view are discarded.
    fn mmap(&mut self, writeable: bool) -> Result<&mut [u8]>;

    /// Release the view established by [`mmap`](Self::mmap), writing back
    /// changes if it was writeable.
    fn munmap(&mut self) -> Result<()>;

    /// Returns the current position.
    fn tell(&self) -> u64;

    /// Returns the size of the resource in bytes, including writes that have
    /// not been flushed yet.
    fn size(&self) -> u64;

    /// Returns `true` if the resource is open.
    fn is_open(&self) -> bool;

    /// Returns `true` if an I/O error has occurred.
    fn error(&self) -> bool;

    /// Returns `true` if a read has hit the end of the resource.
    fn eof(&self) -> bool;

    /// Returns the path or URL of the resource.
    fn path(&self) -> String;

    /// Declare that every byte the caller cares about has been read.
    ///
    /// Engines that fetch lazily stop fetching after this call; reads of
    /// never-fetched regions return zeros.
    fn populate_fake_data(&mut self) {}

    /// Returns the file engine behind `self`, if there is one.
    fn as_file_io(&mut self) -> Option<&mut FileIo> {
        None
    }

    /// Returns the memory engine behind `self`, if there is one.
    fn as_mem_io(&mut self) -> Option<&mut MemIo> {
        None
    }
}

/// Read up to `count` bytes, allocating no more than what remains.
pub(crate) fn read_available<E: IoEngine + ?Sized>(io: &mut E, count: u64) -> Result<DataBuf> {
    let wanted = min(count, io.size().saturating_sub(io.tell()));
    let size = usize::try_from(wanted).map_err(|_| Error::MallocFailed { size: wanted })?;
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|_| Error::MallocFailed { size: wanted })?;
    data.resize(size, 0);
    let n = io.read(&mut data);
    data.truncate(n);
    Ok(DataBuf::from(data))
}

/// Stream the rest of `src` into `dst` through a fixed-size buffer.
pub(crate) fn copy_stream<E: IoEngine + ?Sized>(dst: &mut E, src: &mut dyn IoEngine) -> u64 {
    let mut buf = [0_u8; COPY_BUF_SIZE];
    let mut total = 0_u64;
    loop {
        let read = src.read(&mut buf);
        if read == 0 {
            break;
        }
        let written = dst.write(&buf[..read]);
        total += written as u64;
        if written != read {
            let shortfall = (read - written) as i64;
            debug!(shortfall, "destination stopped accepting bytes, rewinding source");
            if let Err(err) = src.seek(-shortfall, Position::Current) {
                debug!(path = %src.path(), %err, "failed to rewind source");
            }
            break;
        }
    }
    total
}

/// Closes an engine when dropped.
///
/// Useful in functions with many early returns that must not leave an engine
/// open on any of them.
pub struct IoCloser<'a, E: IoEngine + ?Sized> {
    io: &'a mut E,
}

impl<'a, E: IoEngine + ?Sized> IoCloser<'a, E> {
    /// Guard `io`, closing it when the guard goes out of scope.
    #[inline]
    pub fn new(io: &'a mut E) -> Self {
        Self { io }
    }

    /// Close the engine now if it is open.
    pub fn close(&mut self) {
        if self.io.is_open() {
            let _ = self.io.close();
        }
    }
}

impl<'a, E: IoEngine + ?Sized> Deref for IoCloser<'a, E> {
    type Target = E;

    #[inline]
    fn deref(&self) -> &E {
        self.io
    }
}

impl<'a, E: IoEngine + ?Sized> DerefMut for IoCloser<'a, E> {
    #[inline]
    fn deref_mut(&mut self) -> &mut E {
        self.io
    }
}

impl<'a, E: IoEngine + ?Sized> Drop for IoCloser<'a, E> {
    fn drop(&mut self) {
        self.close();
    }
}

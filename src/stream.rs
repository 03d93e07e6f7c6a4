use crate::{IoEngine, Position};
use std::io::{self, Read, Seek, SeekFrom, Write};
use system_interface::io::Peek;

/// A [`Read`]/[`Write`]/[`Seek`]/[`Peek`] implementation that streams through
/// an [`IoEngine`] it borrows mutably.
///
/// This lets engines take part in `std::io` plumbing such as
/// [`std::io::copy`]. The engine's own position is the stream position.
pub struct IoStream<'engine, E: ?Sized> {
    inner: &'engine mut E,
}

impl<'engine, E: IoEngine + ?Sized> IoStream<'engine, E> {
    /// Stream through `inner`, starting at its current position.
    #[inline]
    pub fn new(inner: &'engine mut E) -> Self {
        Self { inner }
    }
}

impl<'engine, E: IoEngine + ?Sized> Read for IoStream<'engine, E> {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf);
        if n == 0 && !buf.is_empty() && self.inner.error() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: read failed", self.inner.path()),
            ));
        }
        Ok(n)
    }
}

impl<'engine, E: IoEngine + ?Sized> Peek for IoStream<'engine, E> {
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = Read::read(self, buf)?;
        self.inner.seek(-(n as i64), Position::Current)?;
        Ok(n)
    }
}

impl<'engine, E: IoEngine + ?Sized> Write for IoStream<'engine, E> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf);
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("{}: write failed", self.inner.path()),
            ));
        }
        Ok(n)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'engine, E: IoEngine + ?Sized> Seek for IoStream<'engine, E> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, anchor) = match pos {
            SeekFrom::Start(offset) => (
                i64::try_from(offset)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?,
                Position::Begin,
            ),
            SeekFrom::Current(offset) => (offset, Position::Current),
            SeekFrom::End(offset) => (offset, Position::End),
        };
        Ok(self.inner.seek(offset, anchor)?)
    }
}

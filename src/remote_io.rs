//! Block-cached I/O over a remote resource.

use crate::{transport::TransportError, Error, IoEngine, Position, Result, Transport};
use std::{cmp::min, io};
use tracing::{debug, warn};

/// Block size used unless [`RemoteIo::with_block_size`] says otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Where a block's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Not fetched yet.
    Unknown,
    /// Fetched and held in memory.
    Known,
    /// Declared irrelevant; never fetched, reads as zeros.
    Fake,
}

enum Block {
    Unknown,
    Known(Box<[u8]>),
    Fake,
}

impl Block {
    fn state(&self) -> BlockState {
        match self {
            Self::Unknown => BlockState::Unknown,
            Self::Known(_) => BlockState::Known,
            Self::Fake => BlockState::Fake,
        }
    }

    /// Returns the byte at `offset`, or `None` if the block hasn't been
    /// fetched.
    #[inline]
    fn byte(&self, offset: usize) -> Option<u8> {
        match self {
            Self::Unknown => None,
            Self::Known(data) => data.get(offset).copied(),
            Self::Fake => Some(0),
        }
    }
}

/// Binary I/O over a resource reached through a [`Transport`].
///
/// The resource is split into fixed-size blocks that are fetched the first
/// time a read touches them. Writing back compares the new content with the
/// cached one and sends only the range in between the common prefix and the
/// common suffix.
///
/// Reopening an engine keeps its cache, so changes made to the resource by
/// others after the first `open` are not seen.
pub struct RemoteIo {
    transport: Box<dyn Transport>,
    block_size: usize,
    size: u64,
    blocks: Option<Vec<Block>>,
    open: bool,
    pos: u64,
    eof: bool,
    failed: bool,
}

impl RemoteIo {
    /// Create an engine reading through `transport`. No request is made
    /// until [`open`](IoEngine::open).
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            block_size: DEFAULT_BLOCK_SIZE,
            size: 0,
            blocks: None,
            open: false,
            pos: 0,
            eof: false,
            failed: false,
        }
    }

    /// Use blocks of `block_size` bytes. Only effective before the first
    /// `open`.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Returns the block size.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the number of blocks, 0 before the first `open`.
    pub fn block_count(&self) -> usize {
        self.blocks.as_ref().map_or(0, Vec::len)
    }

    /// Returns the state of block `index`, or `None` if there is no such
    /// block.
    pub fn block_state(&self, index: usize) -> Option<BlockState> {
        self.blocks.as_ref()?.get(index).map(Block::state)
    }

    fn transport_error(&self, source: TransportError) -> Error {
        Error::Transport {
            url: self.transport.url().to_owned(),
            source,
        }
    }

    /// Learn the size and set up the block table.
    fn load(&mut self) -> Result<()> {
        let bs = self.block_size as u64;
        let blocks: Vec<Block> = match self.transport.probe_size() {
            Ok(Some(size)) => {
                let count = usize::try_from(size / bs + u64::from(size % bs != 0))
                    .map_err(|_| Error::MallocFailed { size })?;
                let mut blocks = Vec::new();
                blocks
                    .try_reserve_exact(count)
                    .map_err(|_| Error::MallocFailed { size })?;
                blocks.resize_with(count, || Block::Unknown);
                self.size = size;
                blocks
            }
            Ok(None) => {
                debug!(url = self.transport.url(), "size unknown, fetching everything");
                let data = self
                    .transport
                    .fetch_all()
                    .map_err(|err| self.transport_error(err))?;
                self.size = data.len() as u64;
                data.chunks(self.block_size)
                    .map(|chunk| Block::Known(chunk.into()))
                    .collect()
            }
            Err(err) => return Err(self.transport_error(err)),
        };
        self.blocks = Some(blocks);
        Ok(())
    }

    /// Fetch block `index` if it is `Unknown`.
    fn populate_block(&mut self, index: usize) -> Result<(), TransportError> {
        let blocks = match &mut self.blocks {
            Some(blocks) => blocks,
            None => return Ok(()),
        };
        let block = match blocks.get_mut(index) {
            Some(block @ Block::Unknown) => block,
            _ => return Ok(()),
        };
        let offset = index as u64 * self.block_size as u64;
        let len = min(self.block_size as u64, self.size - offset) as usize;
        debug!(url = self.transport.url(), index, offset, len, "fetching block");
        let data = self.transport.fetch_range(offset, len)?;
        if data.len() != len {
            return Err(TransportError::InvalidResponse(format!(
                "expected {} bytes at offset {}, got {}",
                len,
                offset,
                data.len()
            )));
        }
        *block = Block::Known(data.into_boxed_slice());
        Ok(())
    }

    fn block(&self, index: usize) -> &Block {
        static MISSING: Block = Block::Fake;
        self.blocks
            .as_ref()
            .and_then(|blocks| blocks.get(index))
            .unwrap_or(&MISSING)
    }

    /// Find how many leading and trailing bytes of `src` match the cached
    /// content. The two never overlap.
    fn diff_bounds(&mut self, src: &mut dyn IoEngine) -> Result<(u64, u64)> {
        let src_size = src.size();
        let limit = min(src_size, self.size);
        let bs = self.block_size as u64;
        let mut buf = vec![0_u8; self.block_size];

        let mut left = 0_u64;
        src.seek(0, Position::Begin)?;
        while left < limit {
            let index = (left / bs) as usize;
            let len = min(bs, limit - left) as usize;
            self.populate_block(index)
                .map_err(|err| self.transport_error(err))?;
            let n = src.read(&mut buf[..len]);
            let block = self.block(index);
            let common = buf[..n]
                .iter()
                .enumerate()
                .take_while(|(i, byte)| block.byte(*i) == Some(**byte))
                .count();
            left += common as u64;
            if common < len {
                break;
            }
        }

        let mut right = 0_u64;
        let max_right = limit - left;
        while right < max_right {
            let end = self.size - right;
            let index = ((end - 1) / bs) as usize;
            let block_start = index as u64 * bs;
            let len = min(end - block_start, max_right - right) as usize;
            self.populate_block(index)
                .map_err(|err| self.transport_error(err))?;
            src.seek(to_offset(src_size - right - len as u64)?, Position::Begin)?;
            if src.read(&mut buf[..len]) != len {
                break;
            }
            let ours_end = (end - block_start) as usize;
            let block = self.block(index);
            let common = (1..=len)
                .take_while(|back| block.byte(ours_end - back) == Some(buf[len - back]))
                .count();
            right += common as u64;
            if common < len {
                break;
            }
        }
        Ok((left, right))
    }
}

fn to_offset(pos: u64) -> Result<i64> {
    i64::try_from(pos).map_err(|err| {
        Error::call(
            "RemoteIo",
            "seek",
            io::Error::new(io::ErrorKind::InvalidInput, err),
        )
    })
}

impl IoEngine for RemoteIo {
    /// Probe the size on the first call; later calls only rewind.
    fn open(&mut self) -> Result<()> {
        self.pos = 0;
        self.eof = false;
        if self.blocks.is_none() {
            self.load()?;
        }
        self.open = true;
        Ok(())
    }

    /// Rewind and mark the engine closed. Cached blocks are kept.
    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.pos = 0;
        self.eof = false;
        Ok(())
    }

    /// Direct writes aren't supported; use [`write_from`](IoEngine::write_from).
    fn write(&mut self, _data: &[u8]) -> usize {
        warn!(url = self.transport.url(), "RemoteIo only supports writing a whole engine");
        0
    }

    fn write_from(&mut self, src: &mut dyn IoEngine) -> Result<u64> {
        if !self.transport.supports_write() {
            return Err(Error::CapabilityUnsupported {
                path: self.path(),
                operation: "write",
            });
        }
        if !src.is_open() {
            return Ok(0);
        }
        if self.blocks.is_none() {
            self.load()?;
        }

        let src_size = src.size();
        let (left, right) = self.diff_bounds(src)?;
        let data_len = src_size - left - right;
        let to = self.size - right;
        if data_len == 0 && left == to {
            debug!(url = self.transport.url(), "content unchanged, nothing to push");
            return Ok(src_size);
        }

        src.seek(to_offset(left)?, Position::Begin)?;
        let data = src.read_data(data_len)?;
        if data.len() as u64 != data_len {
            return Err(Error::call(
                src.path(),
                "read",
                io::Error::new(io::ErrorKind::UnexpectedEof, "source ended early"),
            ));
        }
        debug!(url = self.transport.url(), from = left, to, len = data_len, "pushing changed range");
        self.transport
            .push_range(left..to, &data)
            .map_err(|err| self.transport_error(err))?;

        // The cache no longer matches the resource.
        self.blocks = None;
        self.pos = 0;
        self.eof = false;
        self.load()?;
        Ok(src_size)
    }

    #[inline]
    fn put_byte(&mut self, _byte: u8) -> Option<u8> {
        None
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if !self.open {
            return 0;
        }
        let avail = self.size.saturating_sub(self.pos);
        if buf.len() as u64 > avail {
            self.eof = true;
        }
        let allow = min(buf.len() as u64, avail) as usize;
        if allow == 0 {
            return 0;
        }

        let bs = self.block_size as u64;
        let first = (self.pos / bs) as usize;
        let last = ((self.pos + allow as u64 - 1) / bs) as usize;
        for index in first..=last {
            if let Err(err) = self.populate_block(index) {
                debug!(url = self.transport.url(), index, %err, "block fetch failed");
                self.failed = true;
                return 0;
            }
        }

        let mut copied = 0;
        while copied < allow {
            let pos = self.pos + copied as u64;
            let index = (pos / bs) as usize;
            let offset = (pos % bs) as usize;
            let n = min(self.block_size - offset, allow - copied);
            let dst = &mut buf[copied..copied + n];
            match self.block(index) {
                Block::Known(data) => dst.copy_from_slice(&data[offset..offset + n]),
                Block::Fake | Block::Unknown => dst.fill(0),
            }
            copied += n;
        }
        self.pos += allow as u64;
        allow
    }

    #[inline]
    fn get_byte(&mut self) -> Option<u8> {
        let mut byte = [0_u8];
        (self.read(&mut byte) == 1).then(|| byte[0])
    }

    fn transfer(&mut self, src: &mut dyn IoEngine) -> Result<()> {
        src.open().map_err(|err| Error::DataSourceOpenFailed {
            path: src.path(),
            source: Box::new(err),
        })?;
        let written = self.write_from(src);
        src.close()?;
        written.map(drop)
    }

    /// Positions past the end are clamped to the end and set `eof`.
    fn seek(&mut self, offset: i64, pos: Position) -> Result<u64> {
        let base = match pos {
            Position::Begin => 0,
            Position::Current => i128::from(self.pos),
            Position::End => i128::from(self.size),
        };
        let new_pos = base + i128::from(offset);
        if new_pos < 0 {
            return Err(Error::call(
                self.path(),
                "seek",
                io::Error::new(io::ErrorKind::InvalidInput, "negative position"),
            ));
        }
        if new_pos > i128::from(self.size) {
            self.pos = self.size;
            self.eof = true;
        } else {
            self.pos = new_pos as u64;
            self.eof = false;
        }
        Ok(self.pos)
    }

    fn mmap(&mut self, _writeable: bool) -> Result<&mut [u8]> {
        Err(Error::CapabilityUnsupported {
            path: self.path(),
            operation: "mmap",
        })
    }

    #[inline]
    fn munmap(&mut self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    fn is_open(&self) -> bool {
        self.open
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
        self.transport.url().to_owned()
    }

    fn populate_fake_data(&mut self) {
        if let Some(blocks) = &mut self.blocks {
            for block in blocks.iter_mut().filter(|block| matches!(block, Block::Unknown)) {
                *block = Block::Fake;
            }
        }
    }
}

use io_engines::{
    write_file, BlockState, Error, FileIo, IoEngine, MemIo, Position, RemoteIo, Transport,
    TransportError,
};
use std::{cell::RefCell, ops::Range, rc::Rc};
use tempfile::tempdir;

/// What a [`MemTransport`] has been asked to do.
#[derive(Default)]
struct Log {
    probes: usize,
    fetches: Vec<(u64, usize)>,
    fetch_alls: usize,
    pushes: Vec<(Range<u64>, Vec<u8>)>,
}

/// A transport over a shared byte vector.
struct MemTransport {
    data: Rc<RefCell<Vec<u8>>>,
    log: Rc<RefCell<Log>>,
    writable: bool,
    knows_size: bool,
    failing: bool,
}

impl MemTransport {
    fn new(data: &[u8]) -> Self {
        Self {
            data: Rc::new(RefCell::new(data.to_vec())),
            log: Rc::default(),
            writable: false,
            knows_size: true,
            failing: false,
        }
    }
}

impl Transport for MemTransport {
    fn url(&self) -> &str {
        "mem://test"
    }

    fn probe_size(&mut self) -> Result<Option<u64>, TransportError> {
        self.log.borrow_mut().probes += 1;
        Ok(self
            .knows_size
            .then(|| self.data.borrow().len() as u64))
    }

    fn fetch_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        if self.failing {
            return Err(TransportError::Status(503));
        }
        self.log.borrow_mut().fetches.push((offset, len));
        let data = self.data.borrow();
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn fetch_all(&mut self) -> Result<Vec<u8>, TransportError> {
        self.log.borrow_mut().fetch_alls += 1;
        Ok(self.data.borrow().clone())
    }

    fn supports_write(&self) -> bool {
        self.writable
    }

    fn push_range(&mut self, range: Range<u64>, data: &[u8]) -> Result<(), TransportError> {
        self.log.borrow_mut().pushes.push((range.clone(), data.to_vec()));
        self.data
            .borrow_mut()
            .splice(range.start as usize..range.end as usize, data.iter().copied());
        Ok(())
    }
}

/// A transport that claims a size nobody could allocate a block table for.
struct EnormousTransport;

impl Transport for EnormousTransport {
    fn url(&self) -> &str {
        "mem://enormous"
    }

    fn probe_size(&mut self) -> Result<Option<u64>, TransportError> {
        Ok(Some(u64::MAX / 2))
    }

    fn fetch_range(&mut self, _offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        Ok(vec![0; len])
    }

    fn fetch_all(&mut self) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn supports_write(&self) -> bool {
        false
    }

    fn push_range(&mut self, _range: Range<u64>, _data: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[test]
fn test_open_probes_once() -> anyhow::Result<()> {
    let transport = MemTransport::new(&sample(100));
    let log = Rc::clone(&transport.log);
    let mut io = RemoteIo::new(transport).with_block_size(16);

    assert!(!io.is_open());
    io.open()?;
    assert!(io.is_open());
    assert_eq!(io.size(), 100);
    assert_eq!(io.block_count(), 7);
    assert_eq!(io.block_state(0), Some(BlockState::Unknown));
    assert_eq!(log.borrow().probes, 1);
    assert!(log.borrow().fetches.is_empty());

    io.close()?;
    io.open()?;
    assert_eq!(log.borrow().probes, 1);
    Ok(())
}

#[test]
fn test_fetch_each_block_once() -> anyhow::Result<()> {
    let data = sample(100);
    let transport = MemTransport::new(&data);
    let log = Rc::clone(&transport.log);
    let mut io = RemoteIo::new(transport).with_block_size(16);
    io.open()?;

    assert_eq!(&*io.read_data(20)?, &data[..20]);
    assert_eq!(log.borrow().fetches, [(0, 16), (16, 16)]);
    assert_eq!(io.block_state(1), Some(BlockState::Known));
    assert_eq!(io.block_state(2), Some(BlockState::Unknown));

    io.seek(0, Position::Begin)?;
    assert_eq!(&*io.read_data(20)?, &data[..20]);
    assert_eq!(log.borrow().fetches.len(), 2);

    io.seek(90, Position::Begin)?;
    assert_eq!(&*io.read_data(50)?, &data[90..]);
    assert_eq!(log.borrow().fetches[2..], [(80, 16), (96, 4)]);
    Ok(())
}

#[test]
fn test_fake_blocks_read_as_zeros() -> anyhow::Result<()> {
    let data = sample(64);
    let transport = MemTransport::new(&data);
    let log = Rc::clone(&transport.log);
    let mut io = RemoteIo::new(transport).with_block_size(16);
    io.open()?;

    assert_eq!(&*io.read_data(16)?, &data[..16]);
    io.populate_fake_data();
    assert_eq!(io.block_state(0), Some(BlockState::Known));
    assert_eq!(io.block_state(1), Some(BlockState::Fake));

    io.seek(8, Position::Begin)?;
    let read = io.read_data(16)?;
    assert_eq!(&read[..8], &data[8..16]);
    assert_eq!(&read[8..], &[0; 8]);
    assert_eq!(log.borrow().fetches.len(), 1);
    Ok(())
}

#[test]
fn test_unknown_size_downloads_everything() -> anyhow::Result<()> {
    let data = sample(40);
    let mut transport = MemTransport::new(&data);
    transport.knows_size = false;
    let log = Rc::clone(&transport.log);
    let mut io = RemoteIo::new(transport).with_block_size(16);
    io.open()?;

    assert_eq!(io.size(), 40);
    assert_eq!(io.block_count(), 3);
    assert_eq!(io.block_state(2), Some(BlockState::Known));
    assert_eq!(&*io.read_data(40)?, &data[..]);
    assert_eq!(log.borrow().fetch_alls, 1);
    assert!(log.borrow().fetches.is_empty());
    Ok(())
}

#[test]
fn test_seek_clamps_to_size() -> anyhow::Result<()> {
    let mut io = RemoteIo::new(MemTransport::new(&sample(10)));
    io.open()?;
    assert_eq!(io.seek(25, Position::Begin)?, 10);
    assert!(io.eof());
    assert_eq!(io.seek(-4, Position::End)?, 6);
    assert!(!io.eof());
    assert!(io.seek(-7, Position::Current).is_err());
    assert_eq!(io.tell(), 6);
    Ok(())
}

#[test]
fn test_fetch_failure_sets_error() -> anyhow::Result<()> {
    let mut transport = MemTransport::new(&sample(10));
    transport.failing = true;
    let mut io = RemoteIo::new(transport);
    io.open()?;
    let mut buf = [0_u8; 4];
    assert_eq!(io.read(&mut buf), 0);
    assert!(io.error());
    Ok(())
}

#[test]
fn test_unsupported_operations() -> anyhow::Result<()> {
    let transport = MemTransport::new(b"remote");
    let log = Rc::clone(&transport.log);
    let mut io = RemoteIo::new(transport);
    io.open()?;

    assert!(matches!(
        io.mmap(false),
        Err(Error::CapabilityUnsupported { operation: "mmap", .. })
    ));
    io.munmap()?;
    assert_eq!(io.write(b"x"), 0);
    assert_eq!(io.put_byte(b'x'), None);

    let mut src = MemIo::from_static(b"changed");
    assert!(matches!(
        io.transfer(&mut src),
        Err(Error::CapabilityUnsupported { operation: "write", .. })
    ));
    assert!(log.borrow().pushes.is_empty());
    Ok(())
}

#[test]
fn test_transfer_pushes_changed_range() -> anyhow::Result<()> {
    let original = sample(100);
    let mut changed = original.clone();
    changed[40..45].copy_from_slice(b"EDIT!");

    let mut transport = MemTransport::new(&original);
    transport.writable = true;
    let log = Rc::clone(&transport.log);
    let remote_data = Rc::clone(&transport.data);
    let mut io = RemoteIo::new(transport).with_block_size(16);
    io.open()?;

    let mut src = MemIo::from_bytes(changed.clone());
    io.transfer(&mut src)?;

    assert_eq!(log.borrow().pushes, [(40..45, b"EDIT!".to_vec())]);
    assert_eq!(*remote_data.borrow(), changed);

    // The cache was dropped and the size probed again.
    assert_eq!(log.borrow().probes, 2);
    assert_eq!(io.block_state(2), Some(BlockState::Unknown));
    io.seek(32, Position::Begin)?;
    assert_eq!(&*io.read_data(16)?, &changed[32..48]);
    Ok(())
}

#[test]
fn test_write_from_handles_growth() -> anyhow::Result<()> {
    let mut transport = MemTransport::new(b"hello world");
    transport.writable = true;
    let log = Rc::clone(&transport.log);
    let remote_data = Rc::clone(&transport.data);
    let mut io = RemoteIo::new(transport).with_block_size(4);
    io.open()?;

    let mut src = MemIo::from_static(b"hello brave world");
    assert_eq!(io.write_from(&mut src)?, 17);
    assert_eq!(log.borrow().pushes, [(6..6, b"brave ".to_vec())]);
    assert_eq!(&remote_data.borrow()[..], b"hello brave world");
    assert_eq!(io.size(), 17);
    Ok(())
}

#[test]
fn test_write_from_unchanged_pushes_nothing() -> anyhow::Result<()> {
    let data = sample(50);
    let mut transport = MemTransport::new(&data);
    transport.writable = true;
    let log = Rc::clone(&transport.log);
    let mut io = RemoteIo::new(transport).with_block_size(16);
    io.open()?;

    let mut src = MemIo::from_bytes(data);
    assert_eq!(io.write_from(&mut src)?, 50);
    assert!(log.borrow().pushes.is_empty());
    Ok(())
}

#[test]
fn test_enormous_size_fails_to_open() {
    let mut io = RemoteIo::new(EnormousTransport).with_block_size(1);
    assert!(matches!(io.open(), Err(Error::MallocFailed { .. })));
    assert!(!io.is_open());
    assert_eq!(io.block_count(), 0);
}

#[test]
fn test_transfer_after_fake_data() -> anyhow::Result<()> {
    let original = sample(64);
    let mut transport = MemTransport::new(&original);
    transport.writable = true;
    let log = Rc::clone(&transport.log);
    let remote_data = Rc::clone(&transport.data);
    let mut io = RemoteIo::new(transport).with_block_size(16);
    io.open()?;

    // Only the head matters; the rest is never fetched.
    assert_eq!(&*io.read_data(16)?, &original[..16]);
    io.populate_fake_data();
    io.seek(0, Position::Begin)?;
    let mut local = io.read_data(64)?.into_vec();
    assert_eq!(&local[16..], &[0; 48][..]);

    local[3] ^= 0xff;
    let edited = local[3];
    let mut src = MemIo::from_bytes(local);
    io.transfer(&mut src)?;

    assert_eq!(log.borrow().fetches, [(0, 16)]);
    assert_eq!(log.borrow().pushes, [(3..4, vec![edited])]);
    let mut expected = original;
    expected[3] = edited;
    assert_eq!(*remote_data.borrow(), expected);
    Ok(())
}

#[test]
fn test_write_from_handles_shrink() -> anyhow::Result<()> {
    let mut transport = MemTransport::new(b"hello brave world");
    transport.writable = true;
    let log = Rc::clone(&transport.log);
    let remote_data = Rc::clone(&transport.data);
    let mut io = RemoteIo::new(transport).with_block_size(4);
    io.open()?;

    let mut src = MemIo::from_static(b"hello world");
    assert_eq!(io.write_from(&mut src)?, 11);
    assert_eq!(log.borrow().pushes, [(6..12, Vec::new())]);
    assert_eq!(&remote_data.borrow()[..], b"hello world");
    assert_eq!(io.size(), 11);
    Ok(())
}

#[test]
fn test_transfer_from_file() -> anyhow::Result<()> {
    let original = sample(100);
    let mut changed = original.clone();
    changed[70..72].copy_from_slice(b"ok");

    let dir = tempdir()?;
    let path = dir.path().join("edited.bin");
    write_file(&changed, &path)?;

    let mut transport = MemTransport::new(&original);
    transport.writable = true;
    let log = Rc::clone(&transport.log);
    let remote_data = Rc::clone(&transport.data);
    let mut io = RemoteIo::new(transport).with_block_size(32);
    io.open()?;

    let mut src = FileIo::new(&path);
    io.transfer(&mut src)?;
    assert!(!src.is_open());
    assert_eq!(log.borrow().pushes, [(70..72, b"ok".to_vec())]);
    assert_eq!(*remote_data.borrow(), changed);
    Ok(())
}

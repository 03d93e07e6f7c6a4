use io_engines::{IoEngine, IoStream, MemIo};
use std::io::{copy, Read, Seek, SeekFrom, Write};
use system_interface::io::Peek;

#[test]
fn test_streaming_read() -> anyhow::Result<()> {
    let mut io = MemIo::from_static(b"XYZHello, world!");
    let mut stream = IoStream::new(&mut io);
    stream.seek(SeekFrom::Start(3))?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    assert_eq!(&buf, b"Hello, world!");
    Ok(())
}

#[test]
fn test_streaming_write() -> anyhow::Result<()> {
    let mut io = MemIo::new();
    {
        let mut stream = IoStream::new(&mut io);
        write!(stream, "Hello, {}!", "world")?;
        stream.seek(SeekFrom::Current(-6))?;
        stream.write_all(b"there!")?;
        stream.flush()?;
    }
    assert_eq!(io.as_slice(), b"Hello, there!");
    Ok(())
}

#[test]
fn test_copy_between_engines() -> anyhow::Result<()> {
    let mut src = MemIo::from_static(b"copy me");
    let mut dst = MemIo::new();
    let copied = copy(&mut IoStream::new(&mut src), &mut IoStream::new(&mut dst))?;
    assert_eq!(copied, 7);
    assert_eq!(dst.as_slice(), b"copy me");
    assert_eq!(src.tell(), 7);
    Ok(())
}

#[test]
fn test_peek() -> anyhow::Result<()> {
    let mut io = MemIo::from_static(b"abcdef");
    let mut stream = IoStream::new(&mut io);
    let mut buf = [0_u8; 3];
    assert_eq!(stream.peek(&mut buf)?, 3);
    assert_eq!(&buf, b"abc");
    stream.read_exact(&mut buf)?;
    assert_eq!(&buf, b"abc");
    assert_eq!(stream.stream_position()?, 3);
    Ok(())
}

#[test]
fn test_seek_before_start_fails() {
    let mut io = MemIo::from_static(b"abc");
    let mut stream = IoStream::new(&mut io);
    assert!(stream.seek(SeekFrom::End(-4)).is_err());
}

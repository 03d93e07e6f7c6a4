use io_engines::{IoEngine, IoStream, MemIo, Position};
use std::io::{copy, stdout};

fn main() -> anyhow::Result<()> {
    let mut io = MemIo::from_static(b"123hello world456");

    // Start at offset 3 and read 11 bytes.
    io.seek(3, Position::Begin)?;
    let buf = io.read_data(11)?;
    // The buffer can be used directly.
    // println!("{}", std::str::from_utf8(&buf)?);

    // Or another engine can be streamed out.
    let mut hello = MemIo::from_bytes(buf.into_vec());
    copy(&mut IoStream::new(&mut hello), &mut stdout())?;
    println!();
    Ok(())
}

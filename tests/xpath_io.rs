use io_engines::{
    create_io, read_file, Error, IoEngine, MemIo, Protocol, XPathBacking, XPathIo,
    GEN_FILE_SUFFIX, TEMP_FILE_SUFFIX,
};
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_memory_backing() -> anyhow::Result<()> {
    let mut io = XPathIo::from_reader(&b"piped bytes"[..], XPathBacking::Memory)?;
    assert!(!io.is_temporary());
    assert!(io.file_path().is_none());
    assert!(io.as_mem_io().is_some());
    assert_eq!(io.size(), 11);
    assert_eq!(&*io.read_data(11)?, b"piped bytes");
    Ok(())
}

#[test]
fn test_temp_file_removed_on_drop() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path: PathBuf;
    {
        let mut io = XPathIo::from_reader(
            &b"piped bytes"[..],
            XPathBacking::TempFile {
                dir: dir.path().to_owned(),
            },
        )?;
        assert!(io.is_temporary());
        path = io.file_path().map(ToOwned::to_owned).unwrap_or_default();
        assert!(path.to_string_lossy().ends_with(TEMP_FILE_SUFFIX));
        assert!(path.exists());

        io.open()?;
        assert_eq!(&*io.read_data(5)?, b"piped");
    }
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_transfer_keeps_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut io = XPathIo::from_reader(
        &b"original"[..],
        XPathBacking::TempFile {
            dir: dir.path().to_owned(),
        },
    )?;
    let temp_path = io.file_path().map(ToOwned::to_owned).unwrap_or_default();

    let mut src = MemIo::from_static(b"rewritten");
    io.transfer(&mut src)?;
    assert!(!io.is_temporary());
    let kept = io.file_path().map(ToOwned::to_owned).unwrap_or_default();
    assert!(kept.to_string_lossy().ends_with(GEN_FILE_SUFFIX));
    drop(io);

    assert!(!temp_path.exists());
    assert_eq!(&*read_file(&kept)?, b"rewritten");
    Ok(())
}

#[test]
fn test_transfer_when_rename_fails() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut io = XPathIo::from_reader(
        &b"original"[..],
        XPathBacking::TempFile {
            dir: dir.path().to_owned(),
        },
    )?;
    let temp_path = io.file_path().map(ToOwned::to_owned).unwrap_or_default();
    let name = temp_path.to_string_lossy().into_owned();
    let blocked = PathBuf::from(format!(
        "{}{}",
        name.trim_end_matches(TEMP_FILE_SUFFIX),
        GEN_FILE_SUFFIX
    ));
    // A directory in the way makes the rename fail.
    std::fs::create_dir(&blocked)?;

    let mut src = MemIo::from_static(b"rewritten");
    io.transfer(&mut src)?;
    assert!(io.is_temporary());
    assert_eq!(io.file_path(), Some(temp_path.as_path()));
    assert_eq!(&*read_file(&temp_path)?, b"rewritten");
    drop(io);

    assert!(!temp_path.exists());
    assert!(blocked.is_dir());
    Ok(())
}

#[test]
fn test_data_uri() -> anyhow::Result<()> {
    let mut io = XPathIo::new("data:text/plain;base64,aGVsbG8gd29ybGQ=", XPathBacking::Memory)?;
    assert_eq!(&*io.read_data(64)?, b"hello world");

    let dir = tempdir()?;
    let mut io = XPathIo::from_data_uri(
        "data:text/plain;base64,aGVsbG8=",
        XPathBacking::TempFile {
            dir: dir.path().to_owned(),
        },
    )?;
    io.open()?;
    assert_eq!(&*io.read_data(5)?, b"hello");
    Ok(())
}

#[test]
fn test_bad_data_uri() {
    assert!(matches!(
        XPathIo::new("data:text/plain,hello", XPathBacking::Memory),
        Err(Error::InvalidDataUri { .. })
    ));
    assert!(matches!(
        XPathIo::new("data:text/plain;base64,@@@", XPathBacking::Memory),
        Err(Error::InvalidDataUri { .. })
    ));
    assert!(matches!(
        XPathIo::new("photo.jpg", XPathBacking::Memory),
        Err(Error::UnsupportedProtocol { .. })
    ));
}

#[test]
fn test_protocol_of() {
    assert_eq!(Protocol::of("photo.jpg"), Protocol::File);
    assert_eq!(Protocol::of("file:///tmp/photo.jpg"), Protocol::FileUri);
    assert_eq!(Protocol::of("HTTP://example.com/a.jpg"), Protocol::Http);
    assert_eq!(Protocol::of("https://example.com/a.jpg"), Protocol::Https);
    assert_eq!(Protocol::of("ftp://example.com/a.jpg"), Protocol::Ftp);
    assert_eq!(Protocol::of("ssh://host/a.jpg"), Protocol::Ssh);
    assert_eq!(Protocol::of("sftp://host/a.jpg"), Protocol::Sftp);
    assert_eq!(Protocol::of("data:image/png;base64,AA=="), Protocol::DataUri);
    assert_eq!(Protocol::of("-"), Protocol::Stdin);
    assert!(Protocol::Sftp.is_remote());
    assert!(!Protocol::DataUri.is_remote());
    assert!(!Protocol::Ftp.is_remote());
}

#[test]
fn test_create_io() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("local.bin");
    io_engines::write_file(b"local", &path)?;

    let mut io = create_io(&path.display().to_string())?;
    io.open()?;
    assert_eq!(&*io.read_data(5)?, b"local");
    assert!(io.as_file_io().is_some());

    let io = create_io("ssh://example.com/photo.jpg")?;
    assert_eq!(io.path(), "ssh://example.com/photo.jpg");
    assert!(!io.is_open());

    assert!(matches!(
        create_io("ftp://example.com/photo.jpg"),
        Err(Error::UnsupportedProtocol { .. })
    ));
    Ok(())
}

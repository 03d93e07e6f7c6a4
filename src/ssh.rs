//! SSH transport through the system `ssh` client.

use crate::{transport::remote_path, Transport, TransportError};
use std::{
    ffi::OsString,
    io::Write,
    ops::Range,
    process::{Command, Stdio},
};
use tracing::{debug, warn};
use url::Url;

/// Reads and writes a remote file by running shell commands over `ssh`.
///
/// Authentication is left to the `ssh` client (keys, agent, config).
/// `ssh://` URLs are writable; `sftp://` URLs are read-only.
#[derive(Debug, Clone)]
pub struct SshTransport {
    url: String,
    program: OsString,
    destination: String,
    port: Option<u16>,
    path: String,
    writable: bool,
}

impl SshTransport {
    /// Create a transport for an `ssh://` or `sftp://` URL.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        let writable = match parsed.scheme() {
            "ssh" => true,
            "sftp" => false,
            scheme => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme `{}`",
                    scheme
                )))
            }
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{}: missing host", url)))?;
        if parsed.password().is_some() {
            warn!(url, "passwords in URLs are ignored, ssh handles authentication");
        }
        let destination = match parsed.username() {
            "" => host.to_owned(),
            user => format!("{}@{}", user, host),
        };
        Ok(Self {
            url: url.to_owned(),
            program: OsString::from("ssh"),
            destination,
            port: parsed.port(),
            path: remote_path(&parsed)?,
            writable,
        })
    }

    /// Run `program` instead of `ssh`. It receives the same arguments.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Returns the `user@host` the commands run on.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns the path of the file on the remote host.
    pub fn remote_path(&self) -> &str {
        &self.path
    }

    fn command(&self, remote: &str) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(port) = self.port {
            command.arg("-p").arg(port.to_string());
        }
        command.arg(&self.destination).arg(remote);
        command
    }

    /// Run `remote` on the host, feeding it `input`, and collect its output.
    fn run(&self, remote: &str, input: Option<&[u8]>) -> Result<Vec<u8>, TransportError> {
        debug!(destination = %self.destination, remote, "running remote command");
        let mut command = self.command(remote);
        command
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(TransportError::Command {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output.stdout)
    }
}

/// Quote `s` for a POSIX shell.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

impl Transport for SshTransport {
    #[inline]
    fn url(&self) -> &str {
        &self.url
    }

    fn probe_size(&mut self) -> Result<Option<u64>, TransportError> {
        let output = self.run(&format!("wc -c < {}", quote(&self.path)), None)?;
        let text = String::from_utf8_lossy(&output);
        text.trim()
            .parse()
            .map(Some)
            .map_err(|_| TransportError::InvalidResponse(format!("bad size `{}`", text.trim())))
    }

    fn fetch_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        let remote = format!(
            "tail -c +{} {} | head -c {}",
            offset + 1,
            quote(&self.path),
            len
        );
        self.run(&remote, None)
    }

    fn fetch_all(&mut self) -> Result<Vec<u8>, TransportError> {
        self.run(&format!("cat {}", quote(&self.path)), None)
    }

    #[inline]
    fn supports_write(&self) -> bool {
        self.writable
    }

    /// Splice `data` into the file with `head`/`cat`/`tail` into a scratch
    /// file, then copy it back so the file keeps its inode and mode.
    fn push_range(&mut self, range: Range<u64>, data: &[u8]) -> Result<(), TransportError> {
        if !self.writable {
            return Err(TransportError::ReadOnly);
        }
        let path = quote(&self.path);
        let scratch = quote(&format!("{}.io-engines-splice", self.path));
        let remote = format!(
            "{{ head -c {from} {path}; cat; tail -c +{after} {path}; }} > {scratch} \
             && cat {scratch} > {path} && rm -f {scratch}",
            from = range.start,
            after = range.end + 1,
            path = path,
            scratch = scratch,
        );
        self.run(&remote, Some(data)).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn parses_destination_and_port() {
        let transport = SshTransport::new("ssh://alice@example.com:2222/srv/photo.jpg").unwrap();
        assert_eq!(transport.destination(), "alice@example.com");
        assert_eq!(transport.remote_path(), "/srv/photo.jpg");
        assert!(transport.supports_write());

        let args: Vec<_> = transport
            .command("true")
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-p", "2222", "alice@example.com", "true"]);
    }

    #[test]
    fn decodes_escaped_path() {
        let transport = SshTransport::new("ssh://example.com/srv/my%20photos/caf%C3%A9.jpg").unwrap();
        assert_eq!(transport.remote_path(), "/srv/my photos/café.jpg");
    }

    #[test]
    fn sftp_is_read_only() {
        let mut transport = SshTransport::new("sftp://example.com/photo.jpg").unwrap();
        assert!(!transport.supports_write());
        assert!(matches!(
            transport.push_range(0..1, b"x"),
            Err(TransportError::ReadOnly)
        ));
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(matches!(
            SshTransport::new("http://example.com/a"),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}

// Introducer DNS Adapter
//
// The cluster shares one "DNS" file holding a single line `<host>:<port>`,
// the endpoint of the current introducer. This module is the only place the
// core touches that file. `FileDns` is the default implementation (local
// file, atomic replace); `RemoteExecDns` keeps the file on a relay host and
// reaches it through a remote-exec helper program.

use crate::error::{Result, RingError};
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

/// Capability for reading and publishing the introducer endpoint.
///
/// `write_introducer` must be race-safe across concurrent writers from
/// different nodes; both implementations get that from an atomic replace on
/// the receiving side.
pub trait DnsWriter: Send + Sync {
    fn read_introducer(&self) -> Result<(String, u16)>;
    fn write_introducer(&self, host: &str, port: u16) -> Result<()>;
}

fn endpoint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_.\-]+):([0-9]{1,5})$").expect("endpoint regex"))
}

/// Parses one stored line into `(host, port)`.
///
/// Relay-hosted files come back annotated as `"<relay>:<relayport>: <line>"`;
/// everything up to the last `": "` is stripped before parsing.
fn parse_endpoint(line: &str) -> Result<(String, u16)> {
    let line = line.trim();
    let bare = match line.rfind(": ") {
        Some(idx) => &line[idx + 2..],
        None => line,
    };
    let caps = endpoint_regex()
        .captures(bare)
        .ok_or_else(|| RingError::Dns(format!("unparsable introducer line: {:?}", line)))?;
    let port: u16 = caps[2]
        .parse()
        .map_err(|_| RingError::Dns(format!("port out of range in: {:?}", line)))?;
    Ok((caps[1].to_string(), port))
}

/// Introducer file on the local filesystem.
pub struct FileDns {
    path: PathBuf,
}

impl FileDns {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DnsWriter for FileDns {
    fn read_introducer(&self) -> Result<(String, u16)> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| RingError::Dns(format!("read {}: {}", self.path.display(), e)))?;
        let line = contents
            .lines()
            .next()
            .ok_or_else(|| RingError::Dns(format!("{} is empty", self.path.display())))?;
        parse_endpoint(line)
    }

    fn write_introducer(&self, host: &str, port: u16) -> Result<()> {
        // Write-to-temp then rename, so concurrent readers and writers only
        // ever observe a complete line.
        let tmp = self
            .path
            .with_extension(format!("tmp.{}", std::process::id()));
        fs::write(&tmp, format!("{}:{}\n", host, port))
            .map_err(|e| RingError::Dns(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| RingError::Dns(format!("rename into {}: {}", self.path.display(), e)))?;
        tracing::info!(host, port, path = %self.path.display(), "published introducer endpoint");
        Ok(())
    }
}

/// Introducer file on a relay host, reached through an exec helper.
///
/// The helper is invoked as `<program> -f <relay_host> -c "<shell command>"`
/// and is expected to run the command on the relay and echo its output.
pub struct RemoteExecDns {
    program: String,
    relay_host: String,
    path: String,
}

impl RemoteExecDns {
    pub fn new(
        program: impl Into<String>,
        relay_host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            relay_host: relay_host.into(),
            path: path.into(),
        }
    }

    fn exec(&self, shell_command: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["-f", &self.relay_host, "-c", shell_command])
            .output()
            .map_err(|e| RingError::Dns(format!("exec {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(RingError::Dns(format!(
                "{} exited with {} for {:?}",
                self.program, output.status, shell_command
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DnsWriter for RemoteExecDns {
    fn read_introducer(&self) -> Result<(String, u16)> {
        let stdout = self.exec(&format!("cat {}", self.path))?;
        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| RingError::Dns(format!("{} is empty on relay", self.path)))?;
        parse_endpoint(line)
    }

    fn write_introducer(&self, host: &str, port: u16) -> Result<()> {
        self.exec(&format!("echo {}:{} > {}", host, port, self.path))?;
        tracing::info!(host, port, relay = %self.relay_host, "published introducer endpoint via relay");
        Ok(())
    }
}

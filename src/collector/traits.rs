//! Abstractions over the external data sources, to enable testing without a
//! running Ceph cluster.
//!
//! The `PerfSource` trait covers everything the collector needs from the
//! outside world: the admin-socket directory listing, the raw `perf dump`
//! text of one daemon, and the monotonic uptime clock used to timestamp
//! samples.

use std::io;
use std::path::PathBuf;
use std::process::Command;

/// Error type for acquisition failures.
#[derive(Debug)]
pub enum CollectError {
    /// Listing the admin-socket directory failed.
    Io(io::Error),
    /// The `ceph daemon` invocation could not be run or exited non-zero.
    Command { socket: String, detail: String },
    /// The uptime clock could not be read.
    Uptime(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Command { socket, detail } => {
                write!(f, "perf dump failed for {}: {}", socket, detail)
            }
            CollectError::Uptime(detail) => write!(f, "failed to read uptime: {}", detail),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectError {
    fn from(e: io::Error) -> Self {
        CollectError::Io(e)
    }
}

/// Abstraction for the external daemon and clock touch points.
pub trait PerfSource {
    /// Lists entry names in the admin-socket directory.
    fn list_sockets(&self) -> io::Result<Vec<String>>;

    /// Returns the raw JSON text of `perf dump` for one admin socket.
    fn perf_dump(&self, socket: &str) -> Result<String, CollectError>;

    /// Monotonic elapsed seconds since the host booted.
    fn uptime(&self) -> Result<f64, CollectError>;
}

/// Production source: shells out to `ceph daemon <asok> perf dump` and reads
/// `/proc/uptime`.
#[derive(Debug, Clone)]
pub struct RealSource {
    socket_dir: PathBuf,
    uptime_path: PathBuf,
}

impl RealSource {
    const UPTIME_PATH: &'static str = "/proc/uptime";

    /// Creates a source reading sockets under `socket_dir`.
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            uptime_path: PathBuf::from(Self::UPTIME_PATH),
        }
    }

    /// Overrides the uptime file path, for tests.
    #[cfg(test)]
    pub fn with_uptime_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.uptime_path = path.into();
        self
    }

    fn socket_path(&self, socket: &str) -> PathBuf {
        self.socket_dir.join(socket)
    }
}

impl PerfSource for RealSource {
    fn list_sockets(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.socket_dir)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn perf_dump(&self, socket: &str) -> Result<String, CollectError> {
        let path = self.socket_path(socket);
        let output = Command::new("ceph")
            .arg("daemon")
            .arg(&path)
            .arg("perf")
            .arg("dump")
            .output()
            .map_err(|e| CollectError::Command {
                socket: socket.to_string(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CollectError::Command {
                socket: socket.to_string(),
                detail: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn uptime(&self) -> Result<f64, CollectError> {
        let content = std::fs::read_to_string(&self.uptime_path)
            .map_err(|e| CollectError::Uptime(e.to_string()))?;
        parse_uptime(&content)
    }
}

/// Parses `/proc/uptime` content: elapsed seconds is the first field.
fn parse_uptime(content: &str) -> Result<f64, CollectError> {
    content
        .split_whitespace()
        .next()
        .and_then(|field| field.parse::<f64>().ok())
        .ok_or_else(|| CollectError::Uptime(format!("malformed content {:?}", content.trim())))
}

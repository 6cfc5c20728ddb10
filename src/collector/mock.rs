//! In-memory perf source for testing the collector without a Ceph cluster.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::io;

use crate::collector::traits::{CollectError, PerfSource};

/// Canned admin sockets and perf dumps, with a settable uptime clock.
///
/// Sockets are served in name order, like a sorted directory listing. A
/// socket registered with no dump simulates a daemon whose `perf dump`
/// invocation fails.
#[derive(Debug, Default)]
pub struct MockSource {
    dumps: BTreeMap<String, Option<String>>,
    uptime: Cell<f64>,
    uptime_tick: Cell<f64>,
}

impl MockSource {
    /// Creates an empty source with uptime 1.0.
    pub fn new() -> Self {
        Self {
            dumps: BTreeMap::new(),
            uptime: Cell::new(1.0),
            uptime_tick: Cell::new(0.0),
        }
    }

    /// Registers a socket whose `perf dump` returns `dump`.
    pub fn add_dump(&mut self, socket: impl Into<String>, dump: impl Into<String>) {
        self.dumps.insert(socket.into(), Some(dump.into()));
    }

    /// Registers a socket whose `perf dump` fails.
    pub fn add_failing_socket(&mut self, socket: impl Into<String>) {
        self.dumps.insert(socket.into(), None);
    }

    /// Advances the mock uptime clock.
    pub fn set_uptime(&self, secs: f64) {
        self.uptime.set(secs);
    }

    /// Makes the clock advance by `secs` after every [`PerfSource::uptime`]
    /// read, so repeated acquisition passes see moving timestamps.
    pub fn set_uptime_tick(&self, secs: f64) {
        self.uptime_tick.set(secs);
    }
}

impl PerfSource for MockSource {
    fn list_sockets(&self) -> io::Result<Vec<String>> {
        Ok(self.dumps.keys().cloned().collect())
    }

    fn perf_dump(&self, socket: &str) -> Result<String, CollectError> {
        match self.dumps.get(socket) {
            Some(Some(dump)) => Ok(dump.clone()),
            Some(None) => Err(CollectError::Command {
                socket: socket.to_string(),
                detail: "mock failure".to_string(),
            }),
            None => Err(CollectError::Command {
                socket: socket.to_string(),
                detail: "no such socket".to_string(),
            }),
        }
    }

    fn uptime(&self) -> Result<f64, CollectError> {
        let now = self.uptime.get();
        self.uptime.set(now + self.uptime_tick.get());
        Ok(now)
    }
}

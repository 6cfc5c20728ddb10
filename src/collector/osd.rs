//! OSD admin-socket discovery and snapshot-store construction.
//!
//! One acquisition pass walks the discovered admin sockets, pulls each
//! daemon's `perf dump`, and extracts the block-device entries into a fresh
//! [`SnapshotStore`]. Device entries are identified by the [`DEVICE_MARKER`]
//! substring in the top-level dump key; the display identity is the key
//! segment after the first `-` (key shape `<marker>-<device_id>`).
//!
//! A failed dump or an unparsable one is logged and skipped, never fatal:
//! the affected devices are simply absent from this pass's store and fall
//! back to cold-start treatment on the next successful one.

use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, warn};

use crate::collector::traits::{CollectError, PerfSource};
use crate::model::{DeviceSnapshot, SnapshotStore};

/// Substring marking a block-device entry in the perf dump.
pub const DEVICE_MARKER: &str = "NVMEDevice";

/// Acquisition configuration; replaces any process-wide path state.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Directory holding the OSD admin sockets.
    pub socket_dir: PathBuf,
    /// Optional device-name filter; OSDs serving no matching device are
    /// dropped at discovery time.
    pub device_filter: Option<String>,
}

impl CollectorConfig {
    /// Well-known runtime directory for Ceph admin sockets.
    pub const DEFAULT_SOCKET_DIR: &'static str = "/var/run/ceph";

    pub fn new(socket_dir: impl Into<PathBuf>, device_filter: Option<String>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            device_filter,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SOCKET_DIR, None)
    }
}

/// Walks OSD admin sockets and builds one snapshot store per pass.
pub struct OsdCollector<S: PerfSource> {
    source: S,
    device_filter: Option<String>,
    sockets: Vec<String>,
}

impl<S: PerfSource> OsdCollector<S> {
    pub fn new(source: S, device_filter: Option<String>) -> Self {
        Self {
            source,
            device_filter,
            sockets: Vec::new(),
        }
    }

    /// Enumerates OSD admin sockets, applying the device filter if set.
    ///
    /// A socket qualifies when its name contains both `"osd"` and `"asok"`.
    /// With a filter, only OSDs whose dump exposes a matching device id are
    /// kept; their dumps are pulled once here to decide membership.
    pub fn discover(&mut self) -> Result<&[String], CollectError> {
        let mut osds: Vec<String> = self
            .source
            .list_sockets()?
            .into_iter()
            .filter(|name| name.contains("osd") && name.contains("asok"))
            .collect();

        if let Some(filter) = self.device_filter.clone() {
            osds.retain(|socket| match self.source.perf_dump(socket) {
                Ok(dump) => dump_serves_device(&dump, &filter),
                Err(e) => {
                    warn!("skipping {} during discovery: {}", socket, e);
                    false
                }
            });
        }

        debug!("discovered {} OSD admin socket(s)", osds.len());
        self.sockets = osds;
        Ok(&self.sockets)
    }

    /// Runs one acquisition pass over the discovered sockets.
    ///
    /// Fails only when the uptime clock cannot be read (nothing could be
    /// timestamped); per-socket failures are logged and skipped.
    pub fn collect_store(&self) -> Result<SnapshotStore, CollectError> {
        let sample_timestamp = self.source.uptime()?;
        let mut store = SnapshotStore::new();

        for socket in &self.sockets {
            let dump = match self.source.perf_dump(socket) {
                Ok(dump) => dump,
                Err(e) => {
                    warn!("perf dump failed for {}: {}", socket, e);
                    continue;
                }
            };

            if !dump.contains(DEVICE_MARKER) {
                continue;
            }

            let parsed: Value = match serde_json::from_str(&dump) {
                Ok(v) => v,
                Err(e) => {
                    warn!("unparsable perf dump from {}: {}", socket, e);
                    continue;
                }
            };
            let Some(entries) = parsed.as_object() else {
                warn!("perf dump from {} is not a JSON object", socket);
                continue;
            };

            for (key, value) in entries {
                if !key.contains(DEVICE_MARKER) {
                    continue;
                }
                let Some(device_id) = key.split('-').nth(1) else {
                    warn!("device key {:?} from {} has no id segment", key, socket);
                    continue;
                };
                let Some(record) = value.as_object() else {
                    warn!("device entry {:?} from {} is not an object", key, socket);
                    continue;
                };
                let snap =
                    DeviceSnapshot::from_perf_record(device_id, record, sample_timestamp);
                store.insert(snap.device_id.clone(), snap);
            }
        }

        Ok(store)
    }

    pub fn sockets(&self) -> &[String] {
        &self.sockets
    }
}

/// Whether a perf dump exposes a device matching the filter string.
///
/// A device matches when its id is a substring of the filter, mirroring the
/// historical membership test.
fn dump_serves_device(dump: &str, filter: &str) -> bool {
    if !dump.contains(DEVICE_MARKER) {
        return false;
    }
    let Ok(parsed) = serde_json::from_str::<Value>(dump) else {
        return false;
    };
    let Some(entries) = parsed.as_object() else {
        return false;
    };
    entries.keys().any(|key| {
        key.contains(DEVICE_MARKER)
            && key
                .split('-')
                .nth(1)
                .is_some_and(|id| filter.contains(id))
    })
}

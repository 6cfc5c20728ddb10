//! Acquisition of raw per-device counters from Ceph OSD admin sockets.
//!
//! The [`PerfSource`] trait abstracts the three external touch points
//! (admin-socket discovery, `ceph daemon ... perf dump`, `/proc/uptime`) so
//! the scan logic in [`osd`] can be exercised against [`MockSource`] in tests
//! while production uses [`RealSource`].

mod mock;
pub mod osd;
pub mod traits;

pub use mock::MockSource;
pub use osd::{CollectorConfig, DEVICE_MARKER, OsdCollector};
pub use traits::{CollectError, PerfSource, RealSource};

//! Which CPU states and load averages each platform can report.
//!
//! The table is an ordinary value: build it with [`CapabilityTable::builtin`]
//! (or by hand in tests) and hand the entry for the running OS to
//! [`WatcherConfig::configure`](crate::config::WatcherConfig::configure).

use std::collections::{BTreeSet, HashMap};

use crate::metric::UtilizationType;

/// What one platform supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub os: String,
    pub utilization_types: BTreeSet<UtilizationType>,
    pub load_average: bool,
}

impl PlatformCapabilities {
    pub fn new(
        os: impl Into<String>,
        utilization_types: impl IntoIterator<Item = UtilizationType>,
        load_average: bool,
    ) -> Self {
        Self {
            os: os.into(),
            utilization_types: utilization_types.into_iter().collect(),
            load_average,
        }
    }

    /// Capabilities of a platform nothing is known about.
    pub fn none(os: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            utilization_types: BTreeSet::new(),
            load_average: false,
        }
    }

    /// Load average only, no per-state CPU times.
    pub fn load_only(os: impl Into<String>) -> Self {
        Self {
            load_average: true,
            ..Self::none(os)
        }
    }

    pub fn supports(&self, kind: UtilizationType) -> bool {
        self.utilization_types.contains(&kind)
    }
}

/// Immutable platform → capabilities lookup.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    by_os: HashMap<String, PlatformCapabilities>,
}

impl CapabilityTable {
    /// What [`HostCpuSource`](crate::host::HostCpuSource) can read on each
    /// platform, keyed by `std::env::consts::OS` names. Per-core counters
    /// come from `/proc/stat` on Linux and `kern.cp_times` on FreeBSD; other
    /// Unix platforms only expose `getloadavg(3)`.
    pub fn builtin() -> Self {
        use UtilizationType::*;

        Self::from_entries([
            PlatformCapabilities::new(
                "linux",
                [System, User, Nice, Iowait, Idle, Softirq, Irq, Steal],
                true,
            ),
            PlatformCapabilities::new("freebsd", [System, User, Nice, Idle, Irq], true),
            PlatformCapabilities::load_only("macos"),
            PlatformCapabilities::load_only("openbsd"),
            PlatformCapabilities::load_only("netbsd"),
            PlatformCapabilities::load_only("dragonfly"),
            PlatformCapabilities::load_only("solaris"),
            PlatformCapabilities::load_only("illumos"),
            PlatformCapabilities::none("windows"),
        ])
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PlatformCapabilities>) -> Self {
        Self {
            by_os: entries.into_iter().map(|c| (c.os.clone(), c)).collect(),
        }
    }

    /// Capabilities for `os`; unknown platforms support nothing.
    pub fn lookup(&self, os: &str) -> PlatformCapabilities {
        self.by_os
            .get(os)
            .cloned()
            .unwrap_or_else(|| PlatformCapabilities::none(os))
    }

    /// Capabilities of the platform this binary was built for.
    pub fn current(&self) -> PlatformCapabilities {
        self.lookup(std::env::consts::OS)
    }

    pub fn platforms(&self) -> impl Iterator<Item = &PlatformCapabilities> {
        self.by_os.values()
    }
}

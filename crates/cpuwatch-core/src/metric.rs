//! Structured metric identifiers.
//!
//! Keys stay typed all the way through the store and the watcher; they are
//! only rendered to dotted strings (`util.idle.5.total`, `load.avg.1`) when a
//! consumer asks for a flat export map.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

/// CPU state whose cumulative time is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UtilizationType {
    System,
    User,
    Nice,
    Idle,
    Iowait,
    Irq,
    Softirq,
    Steal,
}

impl UtilizationType {
    /// Every type known to the watcher, in export order.
    pub const ALL: [UtilizationType; 8] = [
        Self::System,
        Self::User,
        Self::Nice,
        Self::Idle,
        Self::Iowait,
        Self::Irq,
        Self::Softirq,
        Self::Steal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Nice => "nice",
            Self::Idle => "idle",
            Self::Iowait => "iowait",
            Self::Irq => "irq",
            Self::Softirq => "softirq",
            Self::Steal => "steal",
        }
    }
}

impl fmt::Display for UtilizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a utilization type name is not recognised at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown utilization type '{0}'")]
pub struct UnknownUtilizationType(pub String);

impl FromStr for UtilizationType {
    type Err = UnknownUtilizationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| UnknownUtilizationType(s.to_string()))
    }
}

/// Which CPU a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CpuScope {
    /// Logical core by OS index.
    Core(usize),
    /// Mean across all cores.
    Total,
}

impl fmt::Display for CpuScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(i) => write!(f, "cpu{i}"),
            Self::Total => f.write_str("total"),
        }
    }
}

/// Key of a single value inside a stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub kind: UtilizationType,
    pub scope: CpuScope,
}

impl MetricKey {
    pub fn new(kind: UtilizationType, scope: CpuScope) -> Self {
        Self { kind, scope }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.scope)
    }
}

/// A rolling window length, in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window(NonZeroU32);

impl Window {
    /// `None` for a zero-length window.
    pub fn minutes(minutes: u32) -> Option<Self> {
        NonZeroU32::new(minutes).map(Self)
    }

    pub fn as_minutes(&self) -> u32 {
        self.0.get()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.0.get()) * 60)
    }

    /// Number of sampling intervals that make up this window, rounded to the
    /// nearest whole sample.
    pub fn steps(&self, interval: Duration) -> usize {
        let interval = interval.as_secs_f64();
        if interval <= 0.0 {
            return 0;
        }
        (self.duration().as_secs_f64() / interval).round() as usize
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing an `avgN` window specification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid window '{0}': expected avgN with N a positive number of minutes")]
pub struct InvalidWindow(pub String);

impl FromStr for Window {
    type Err = InvalidWindow;

    /// Accepts `avg5`, `AVG5` or a bare `5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = match trimmed.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("avg") => &trimmed[3..],
            _ => trimmed,
        };
        digits
            .parse::<u32>()
            .ok()
            .and_then(Window::minutes)
            .ok_or_else(|| InvalidWindow(s.to_string()))
    }
}

/// OS load-average horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadWindow {
    One,
    Five,
    Fifteen,
}

impl LoadWindow {
    pub const ALL: [LoadWindow; 3] = [Self::One, Self::Five, Self::Fifteen];

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            1 => Some(Self::One),
            5 => Some(Self::Five),
            15 => Some(Self::Fifteen),
            _ => None,
        }
    }

    pub fn as_minutes(&self) -> u32 {
        match self {
            Self::One => 1,
            Self::Five => 5,
            Self::Fifteen => 15,
        }
    }
}

impl fmt::Display for LoadWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_minutes())
    }
}

/// Name of one exported measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricName {
    Utilization {
        kind: UtilizationType,
        window: Window,
        scope: CpuScope,
    },
    LoadAverage(LoadWindow),
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utilization {
                kind,
                window,
                scope,
            } => write!(f, "util.{kind}.{window}.{scope}"),
            Self::LoadAverage(w) => write!(f, "load.avg.{w}"),
        }
    }
}

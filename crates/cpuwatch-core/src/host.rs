//! Operating-system CPU counters.
//!
//! [`CpuTimesSource`] is the seam between the watcher and the host. The
//! [`HostCpuSource`] implementation reads per-core cumulative CPU time and
//! the load average without elevated privileges:
//! - Linux: `/proc/stat` `cpuN` lines, ticks divided by `_SC_CLK_TCK`.
//! - FreeBSD: `sysctl -n kern.cp_times`, ticks divided by the stat clock rate.
//! - Any Unix: `getloadavg(3)` for the load average.

#[cfg(target_os = "freebsd")]
use std::process::{Command, Stdio};
#[cfg(target_os = "freebsd")]
use std::time::{Duration, Instant};

use crate::metric::UtilizationType;

/// Cumulative seconds one logical core has spent in each state since boot.
///
/// States the platform does not report stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
}

impl CpuTimes {
    pub fn value(&self, kind: UtilizationType) -> f64 {
        match kind {
            UtilizationType::System => self.system,
            UtilizationType::User => self.user,
            UtilizationType::Nice => self.nice,
            UtilizationType::Idle => self.idle,
            UtilizationType::Iowait => self.iowait,
            UtilizationType::Irq => self.irq,
            UtilizationType::Softirq => self.softirq,
            UtilizationType::Steal => self.steal,
        }
    }
}

/// OS-smoothed run-queue averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    #[error("`{command}` {detail}")]
    Command { command: String, detail: String },
    #[error("{what} is not implemented on {os}")]
    Unsupported { what: &'static str, os: &'static str },
}

/// Source of per-core CPU counters and load averages.
pub trait CpuTimesSource: Send + Sync {
    /// One entry per logical core, ordered by core index.
    fn per_core_times(&self) -> Result<Vec<CpuTimes>, HostError>;

    /// Current 1/5/15 minute load averages.
    fn load_average(&self) -> Result<LoadAverage, HostError>;
}

/// Reads counters from the running operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCpuSource;

impl CpuTimesSource for HostCpuSource {
    fn per_core_times(&self) -> Result<Vec<CpuTimes>, HostError> {
        #[cfg(target_os = "linux")]
        {
            let raw = std::fs::read_to_string("/proc/stat").map_err(|source| HostError::Io {
                path: "/proc/stat",
                source,
            })?;
            parse_proc_stat(&raw, linux_clk_tck())
        }
        #[cfg(target_os = "freebsd")]
        {
            let raw = sysctl("kern.cp_times")?;
            let stathz = match sysctl("kern.clockrate") {
                Ok(clockrate) => parse_stathz(&clockrate).unwrap_or(DEFAULT_STATHZ),
                Err(e) => {
                    log::debug!("[CPU] {e}; assuming stathz = {DEFAULT_STATHZ}");
                    DEFAULT_STATHZ
                }
            };
            parse_kern_cp_times(&raw, stathz)
        }
        #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
        {
            Err(HostError::Unsupported {
                what: "per-core CPU times",
                os: std::env::consts::OS,
            })
        }
    }

    fn load_average(&self) -> Result<LoadAverage, HostError> {
        #[cfg(unix)]
        {
            let mut values = [0.0_f64; 3];
            // SAFETY: `getloadavg` writes up to `n` doubles to a valid buffer.
            let n = unsafe { libc::getloadavg(values.as_mut_ptr(), 3) };
            if n < 3 {
                return Err(HostError::Parse {
                    what: "getloadavg",
                    detail: format!("returned {n} of 3 samples"),
                });
            }
            Ok(LoadAverage {
                one: values[0],
                five: values[1],
                fifteen: values[2],
            })
        }
        #[cfg(not(unix))]
        {
            Err(HostError::Unsupported {
                what: "load average",
                os: std::env::consts::OS,
            })
        }
    }
}

#[cfg(target_os = "linux")]
fn linux_clk_tck() -> f64 {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as f64 } else { 100.0 }
}

/// Parse the per-core `cpuN` lines of `/proc/stat`.
///
/// Field order is `user nice system idle iowait irq softirq steal ...`;
/// kernels older than 2.6.11 omit the trailing fields, which read as zero.
/// The aggregate `cpu` line is skipped.
pub fn parse_proc_stat(raw: &str, clk_tck: f64) -> Result<Vec<CpuTimes>, HostError> {
    let mut cores: Vec<(usize, CpuTimes)> = Vec::new();

    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let Some(index) = label
            .strip_prefix("cpu")
            .and_then(|rest| rest.parse::<usize>().ok())
        else {
            continue;
        };

        let ticks: Vec<f64> = fields
            .map(|s| s.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| HostError::Parse {
                what: "/proc/stat",
                detail: format!("{label}: {e}"),
            })?;
        if ticks.len() < 4 {
            return Err(HostError::Parse {
                what: "/proc/stat",
                detail: format!("{label} has {} fields, expected at least 4", ticks.len()),
            });
        }
        let at = |i: usize| ticks.get(i).copied().unwrap_or(0.0) / clk_tck;

        cores.push((
            index,
            CpuTimes {
                user: at(0),
                nice: at(1),
                system: at(2),
                idle: at(3),
                iowait: at(4),
                irq: at(5),
                softirq: at(6),
                steal: at(7),
            },
        ));
    }

    if cores.is_empty() {
        return Err(HostError::Parse {
            what: "/proc/stat",
            detail: "no per-core cpu lines".to_string(),
        });
    }
    cores.sort_by_key(|(index, _)| *index);
    Ok(cores.into_iter().map(|(_, times)| times).collect())
}

/// Parse `kern.cp_times`: five tick counters per core in the order
/// `user nice system interrupt idle`.
pub fn parse_kern_cp_times(raw: &str, stathz: f64) -> Result<Vec<CpuTimes>, HostError> {
    let ticks: Vec<f64> = raw
        .split_whitespace()
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| HostError::Parse {
            what: "kern.cp_times",
            detail: e.to_string(),
        })?;
    if ticks.is_empty() || ticks.len() % 5 != 0 {
        return Err(HostError::Parse {
            what: "kern.cp_times",
            detail: format!("{} values is not a multiple of 5", ticks.len()),
        });
    }

    Ok(ticks
        .chunks_exact(5)
        .map(|c| CpuTimes {
            user: c[0] / stathz,
            nice: c[1] / stathz,
            system: c[2] / stathz,
            irq: c[3] / stathz,
            idle: c[4] / stathz,
            ..CpuTimes::default()
        })
        .collect())
}

/// Extract `stathz` from `kern.clockrate` output
/// (`{ hz = 100, tick = 10000, profhz = 8128, stathz = 127 }`).
pub fn parse_stathz(raw: &str) -> Option<f64> {
    raw.trim_matches(|c: char| c == '{' || c == '}' || char::is_whitespace(c))
        .split(',')
        .filter_map(|part| part.split_once('='))
        .find(|(k, _)| k.trim() == "stathz")
        .and_then(|(_, v)| v.trim().parse::<f64>().ok())
        .filter(|hz| *hz > 0.0)
}

#[cfg(target_os = "freebsd")]
const DEFAULT_STATHZ: f64 = 128.0;

/// `sysctl -n <name>`, killed if it has not exited within 400ms.
#[cfg(target_os = "freebsd")]
fn sysctl(name: &str) -> Result<String, HostError> {
    const SYSCTL_TIMEOUT: Duration = Duration::from_millis(400);

    let command = format!("sysctl -n {name}");
    let failed = |detail: String| HostError::Command {
        command: command.clone(),
        detail,
    };

    let mut child = Command::new("sysctl")
        .args(["-n", name])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| failed(format!("could not start: {e}")))?;

    let started = Instant::now();
    while child
        .try_wait()
        .map_err(|e| failed(format!("wait failed: {e}")))?
        .is_none()
    {
        if started.elapsed() >= SYSCTL_TIMEOUT {
            let _ = child.kill();
            let _ = child.wait();
            return Err(failed(format!("timed out after {SYSCTL_TIMEOUT:?}")));
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    let output = child
        .wait_with_output()
        .map_err(|e| failed(format!("reading output failed: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!("exited with {}: {}", output.status, stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

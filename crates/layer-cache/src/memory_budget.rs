//! Memory budget planning for the layer cache
//!
//! The cache never queries the operating system itself. Hosts hand it a
//! [`MemoryInfoSource`] that reports total and available system memory, and
//! this module turns those numbers into a pressure level and a byte budget.
//!
//! The signal is noisy (other processes allocate and free all the time), so
//! budget planning applies a hysteresis band and grows the budget gradually.
//! Shrinking under high pressure is always applied at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One mebibyte
pub const MB: usize = 1024 * 1024;

/// Default budget on devices with a comfortable amount of RAM (48 MB)
pub const DEFAULT_BUDGET_NORMAL: usize = 48 * MB;

/// Default budget on memory-constrained devices (16 MB)
pub const DEFAULT_BUDGET_CONSTRAINED: usize = 16 * MB;

/// Lower bound for the adaptive budget unless configured otherwise
pub const DEFAULT_MIN_BUDGET: usize = 4 * MB;

/// Upper bound for the adaptive budget unless configured otherwise
pub const DEFAULT_MAX_BUDGET: usize = 64 * MB;

/// Minimum time between two pressure checks unless configured otherwise
pub const DEFAULT_PRESSURE_CHECK_INTERVAL_MS: u64 = 5_000;

/// Available memory below this is treated as critical
pub const LOW_MEMORY_THRESHOLD: usize = 64 * MB;

/// Devices with less total memory than this use the constrained defaults
pub const CONSTRAINED_DEVICE_THRESHOLD: usize = 512 * MB;

/// Share of available system memory the cache aims to occupy
pub const HEADROOM_FRACTION: f64 = 0.15;

/// Relative budget change ignored by the adaptive planner
pub const BUDGET_HYSTERESIS: f64 = 0.10;

/// System memory pressure level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// System memory usage is low (< 50% utilization)
    Low,
    /// System memory usage is moderate (50-75% utilization)
    Moderate,
    /// System memory usage is high (75-90% utilization)
    High,
    /// System memory usage is critical (> 90% utilization, or almost nothing left)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Returns true if the cache should give memory back (High or Critical)
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

/// Snapshot of system memory as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemMemoryInfo {
    /// Total physical memory in bytes
    pub total_bytes: usize,
    /// Memory the system could hand out right now, in bytes
    pub available_bytes: usize,
}

impl SystemMemoryInfo {
    pub fn new(total_bytes: usize, available_bytes: usize) -> Self {
        Self {
            total_bytes,
            available_bytes,
        }
    }

    /// Build a snapshot from megabyte figures
    pub fn from_mb(total_mb: usize, available_mb: usize) -> Self {
        Self::new(total_mb * MB, available_mb * MB)
    }

    /// Available memory in whole megabytes
    pub fn available_mb(&self) -> usize {
        self.available_bytes / MB
    }

    /// Fraction of system memory in use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        let available = self.available_bytes.min(self.total_bytes);
        1.0 - available as f64 / self.total_bytes as f64
    }

    /// Less than [`LOW_MEMORY_THRESHOLD`] is available
    pub fn is_low_memory(&self) -> bool {
        self.available_bytes < LOW_MEMORY_THRESHOLD
    }

    /// The device has less than [`CONSTRAINED_DEVICE_THRESHOLD`] in total
    pub fn is_constrained_device(&self) -> bool {
        self.total_bytes < CONSTRAINED_DEVICE_THRESHOLD
    }

    /// Pressure level for this snapshot
    pub fn pressure(&self) -> MemoryPressure {
        if self.is_low_memory() {
            MemoryPressure::Critical
        } else {
            MemoryPressure::from_utilization(self.utilization())
        }
    }

    /// Starting budget suited to this device
    pub fn default_budget(&self) -> usize {
        if self.is_constrained_device() {
            DEFAULT_BUDGET_CONSTRAINED
        } else {
            DEFAULT_BUDGET_NORMAL
        }
    }
}

/// Source of system memory figures.
///
/// Returning `None` means the figures are unavailable right now; the cache
/// then leaves its budget alone.
pub trait MemoryInfoSource: Send + Sync {
    fn memory_info(&self) -> Option<SystemMemoryInfo>;
}

impl<T: MemoryInfoSource + ?Sized> MemoryInfoSource for Arc<T> {
    fn memory_info(&self) -> Option<SystemMemoryInfo> {
        (**self).memory_info()
    }
}

/// Source used when the host did not provide one
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemoryInfo;

impl MemoryInfoSource for NoMemoryInfo {
    fn memory_info(&self) -> Option<SystemMemoryInfo> {
        None
    }
}

/// Memory figures pushed in by the host.
///
/// Useful when the host already samples system memory on its own schedule.
/// Share it with the cache through an `Arc` and update it from anywhere.
#[derive(Debug)]
pub struct FixedMemoryInfo {
    total_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
}

impl FixedMemoryInfo {
    pub fn new(info: SystemMemoryInfo) -> Self {
        Self {
            total_bytes: AtomicUsize::new(info.total_bytes),
            available_bytes: AtomicUsize::new(info.available_bytes),
        }
    }

    /// Replace both figures
    pub fn set(&self, info: SystemMemoryInfo) {
        self.total_bytes.store(info.total_bytes, Ordering::Relaxed);
        self.available_bytes
            .store(info.available_bytes, Ordering::Relaxed);
    }

    /// Update only the available figure
    pub fn set_available(&self, bytes: usize) {
        self.available_bytes.store(bytes, Ordering::Relaxed);
    }
}

impl MemoryInfoSource for FixedMemoryInfo {
    fn memory_info(&self) -> Option<SystemMemoryInfo> {
        Some(SystemMemoryInfo::new(
            self.total_bytes.load(Ordering::Relaxed),
            self.available_bytes.load(Ordering::Relaxed),
        ))
    }
}

/// Adaptive budget configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveConfig {
    /// Whether pressure checks may change the budget
    pub enabled: bool,
    /// Minimum time between two pressure checks
    pub check_interval: Duration,
    /// Smallest budget the planner will choose
    pub min_budget: usize,
    /// Largest budget the planner will choose
    pub max_budget: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: Duration::from_millis(DEFAULT_PRESSURE_CHECK_INTERVAL_MS),
            min_budget: DEFAULT_MIN_BUDGET,
            max_budget: DEFAULT_MAX_BUDGET,
        }
    }
}

impl AdaptiveConfig {
    /// Create a configuration, normalizing the budget range.
    ///
    /// `min_budget` is raised to at least one byte and `max_budget` to at
    /// least `min_budget`.
    pub fn new(enabled: bool, check_interval_ms: u64, min_budget: usize, max_budget: usize) -> Self {
        let min_budget = min_budget.max(1);
        if max_budget < min_budget {
            log::warn!(
                "adaptive max budget {} below min budget {}, using min for both",
                max_budget,
                min_budget
            );
        }
        Self {
            enabled,
            check_interval: Duration::from_millis(check_interval_ms),
            min_budget,
            max_budget: max_budget.max(min_budget),
        }
    }

    /// Clamp a budget into `[min_budget, max_budget]`
    pub fn clamp_budget(&self, budget: usize) -> usize {
        budget.clamp(self.min_budget, self.max_budget)
    }

    /// Decide the next budget from a memory snapshot and the current budget
    pub fn plan_budget(&self, info: &SystemMemoryInfo, current_budget: usize) -> BudgetPlan {
        let pressure = info.pressure();
        let headroom = (info.available_bytes as f64 * HEADROOM_FRACTION) as usize;

        let target = self.clamp_budget(match pressure {
            MemoryPressure::Critical => self.min_budget,
            MemoryPressure::High => headroom / 2,
            MemoryPressure::Low | MemoryPressure::Moderate => headroom,
        });

        let current = self.clamp_budget(current_budget);
        let band = (current as f64 * BUDGET_HYSTERESIS) as usize;

        let budget = if target < current {
            if pressure.needs_eviction() || current - target > band {
                target
            } else {
                current
            }
        } else if target - current > band {
            // Grow halfway per check so one optimistic sample can't balloon the cache
            current + (target - current) / 2
        } else {
            current
        };

        BudgetPlan {
            pressure,
            target,
            budget,
        }
    }
}

/// Result of [`AdaptiveConfig::plan_budget`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetPlan {
    /// Pressure level of the snapshot
    pub pressure: MemoryPressure,
    /// Budget the planner is steering toward
    pub target: usize,
    /// Budget to apply now
    pub budget: usize,
}

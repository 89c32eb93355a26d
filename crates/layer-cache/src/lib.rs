//! Toolpath Layer Cache Library
//!
//! Memory-bounded LRU cache of decoded G-code toolpath layers for print
//! previews, with neighbour prefetch and an optional budget that adapts to
//! system memory pressure.

pub mod cache;
pub mod config;
pub mod loader;
pub mod memory_budget;
pub mod prefetch;
pub mod segment;

pub use cache::{CacheStats, LayerCache, LayerFetch, PressureCheck};
pub use config::{CacheConfig, ConfigError, DEFAULT_PREFETCH_RADIUS};
pub use loader::LayerLoader;
pub use memory_budget::{
    AdaptiveConfig, BudgetPlan, FixedMemoryInfo, MemoryInfoSource, MemoryPressure, NoMemoryInfo,
    SystemMemoryInfo, DEFAULT_BUDGET_CONSTRAINED, DEFAULT_BUDGET_NORMAL, DEFAULT_MAX_BUDGET,
    DEFAULT_MIN_BUDGET, DEFAULT_PRESSURE_CHECK_INTERVAL_MS, MB,
};
pub use prefetch::PrefetchWindow;
pub use segment::{
    layer_size_bytes, LayerIndex, Point3, SharedSegments, ToolpathSegment,
    SEGMENT_FOOTPRINT_BYTES,
};

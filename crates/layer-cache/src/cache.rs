//! Layer cache with LRU eviction
//!
//! Holds decoded toolpath segments per print layer under a byte budget.
//! Layers are loaded on demand through a [`LayerLoader`] and the least
//! recently used layers are evicted when the budget is exceeded. With
//! adaptive mode enabled the budget follows system memory pressure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::{CacheConfig, DEFAULT_PREFETCH_RADIUS};
use crate::loader::LayerLoader;
use crate::memory_budget::{
    AdaptiveConfig, MemoryInfoSource, MemoryPressure, NoMemoryInfo, DEFAULT_BUDGET_NORMAL, MB,
};
use crate::prefetch::PrefetchWindow;
use crate::segment::{layer_size_bytes, LayerIndex, SharedSegments, ToolpathSegment};

/// Result of [`LayerCache::get_or_load`]
#[derive(Debug, Clone)]
pub struct LayerFetch {
    /// The layer's segments, `None` only when loading failed
    pub segments: Option<SharedSegments>,

    /// The layer was already cached
    pub was_hit: bool,

    /// The loader could not produce the layer
    pub load_failed: bool,
}

impl LayerFetch {
    fn hit(segments: SharedSegments) -> Self {
        Self {
            segments: Some(segments),
            was_hit: true,
            load_failed: false,
        }
    }

    fn loaded(segments: SharedSegments) -> Self {
        Self {
            segments: Some(segments),
            was_hit: false,
            load_failed: false,
        }
    }

    fn failed() -> Self {
        Self {
            segments: None,
            was_hit: false,
            load_failed: true,
        }
    }

    /// Number of segments returned (0 on failure)
    pub fn segment_count(&self) -> usize {
        self.segments.as_ref().map_or(0, |s| s.len())
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of layers currently in cache
    pub layer_count: usize,

    /// Bytes charged for cached layers
    pub memory_used: usize,

    /// Current byte budget
    pub memory_budget: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of layers evicted (LRU, budget changes and pressure)
    pub evictions: u64,

    /// Number of misses where the loader produced nothing
    pub load_failures: u64,

    /// Number of loaded layers returned without caching because they exceed the budget
    pub uncached_loads: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate budget utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_budget == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_budget as f64
        }
    }
}

/// Result of [`LayerCache::check_memory_pressure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureCheck {
    /// Adaptive mode is off
    Disabled,

    /// The check interval has not elapsed yet
    Skipped { remaining: Duration },

    /// The memory source had no figures
    Unavailable,

    /// The budget was re-planned
    Checked {
        pressure: MemoryPressure,
        old_budget: usize,
        new_budget: usize,
        evicted: usize,
    },
}

/// One cached layer
struct CacheEntry {
    segments: SharedSegments,
    size_bytes: usize,
    /// Key of this entry in `CacheState::recency`
    recency: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    load_failures: u64,
    uncached_loads: u64,
}

/// Internal cache state
struct CacheState {
    /// Map from layer index to cached entry
    layers: HashMap<LayerIndex, CacheEntry>,

    /// Recency tick -> layer index, oldest first
    recency: BTreeMap<u64, LayerIndex>,

    /// Next recency tick to hand out
    next_tick: u64,

    /// Sum of `size_bytes` over `layers`
    memory_used: usize,

    /// Maximum bytes allowed
    memory_budget: usize,

    counters: Counters,

    adaptive: AdaptiveConfig,

    /// Last pressure check that was not skipped
    last_pressure_check: Instant,
}

impl CacheState {
    fn new(memory_budget: usize) -> Self {
        Self {
            layers: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            memory_used: 0,
            memory_budget,
            counters: Counters::default(),
            adaptive: AdaptiveConfig::default(),
            last_pressure_check: Instant::now(),
        }
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Mark a layer as most recently used
    fn touch(&mut self, index: LayerIndex) {
        let tick = self.bump_tick();
        if let Some(entry) = self.layers.get_mut(&index) {
            self.recency.remove(&entry.recency);
            entry.recency = tick;
            self.recency.insert(tick, index);
        }
    }

    /// Look up a layer, counting a hit and bumping recency when present
    fn hit(&mut self, index: LayerIndex) -> Option<SharedSegments> {
        let segments = self.layers.get(&index)?.segments.clone();
        self.touch(index);
        self.counters.hits += 1;
        Some(segments)
    }

    fn remove(&mut self, index: LayerIndex) -> Option<CacheEntry> {
        let entry = self.layers.remove(&index)?;
        self.recency.remove(&entry.recency);
        self.memory_used -= entry.size_bytes;
        Some(entry)
    }

    /// Evict the least recently used layer
    fn evict_lru(&mut self) -> Option<LayerIndex> {
        let (_, index) = self.recency.pop_first()?;
        if let Some(entry) = self.layers.remove(&index) {
            self.memory_used -= entry.size_bytes;
            self.counters.evictions += 1;
            log::trace!("evicted layer {} ({} bytes)", index, entry.size_bytes);
        }
        Some(index)
    }

    /// Evict layers until `required` more bytes fit under `limit`
    fn evict_until(&mut self, limit: usize, required: usize) -> usize {
        let mut evicted = 0;
        while self.memory_used.saturating_add(required) > limit && !self.layers.is_empty() {
            if self.evict_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    /// Evict layers until `required` more bytes fit under the budget
    fn evict_to_fit(&mut self, required: usize) -> usize {
        self.evict_until(self.memory_budget, required)
    }

    /// Store a layer as most recently used. Caller checks `size <= budget`.
    fn admit(&mut self, index: LayerIndex, segments: SharedSegments, size_bytes: usize) {
        self.evict_to_fit(size_bytes);

        let tick = self.bump_tick();
        self.recency.insert(tick, index);
        self.layers.insert(
            index,
            CacheEntry {
                segments,
                size_bytes,
                recency: tick,
            },
        );
        self.memory_used += size_bytes;
    }

    fn apply_budget(&mut self, budget: usize) -> usize {
        self.memory_budget = budget;
        self.evict_to_fit(0)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            layer_count: self.layers.len(),
            memory_used: self.memory_used,
            memory_budget: self.memory_budget,
            hits: self.counters.hits,
            misses: self.counters.misses,
            evictions: self.counters.evictions,
            load_failures: self.counters.load_failures,
            uncached_loads: self.counters.uncached_loads,
        }
    }
}

/// Toolpath layer cache with LRU eviction
///
/// Thread-safe store of decoded layers. Readers get a shared handle to the
/// segments, so evicting a layer never invalidates data another thread is
/// still drawing. One cache is created per loaded G-code file and owned by
/// whatever renders or streams it; share it across threads with an `Arc`.
///
/// # Example
///
/// ```
/// use toolpath_layer_cache::{LayerCache, Point3, ToolpathSegment};
///
/// let cache = LayerCache::with_mb_budget(16);
///
/// let mut decode = |layer: usize| {
///     let z = 0.2 * (layer as f32 + 1.0);
///     Some(vec![ToolpathSegment::extrusion(
///         Point3::new(0.0, 0.0, z),
///         Point3::new(10.0, 0.0, z),
///     )])
/// };
///
/// let first = cache.get_or_load(3, &mut decode);
/// assert!(!first.was_hit);
///
/// let again = cache.get_or_load(3, &mut decode);
/// assert!(again.was_hit);
/// assert_eq!(cache.hit_stats(), (1, 1));
/// ```
pub struct LayerCache {
    state: RwLock<CacheState>,
    memory_source: Box<dyn MemoryInfoSource>,
    /// Layers warmed on each side by [`prefetch_around`](Self::prefetch_around)
    prefetch_radius: usize,
}

impl LayerCache {
    /// Create a cache with the given byte budget.
    ///
    /// A zero budget is raised to one byte. Adaptive mode starts disabled.
    pub fn new(memory_budget: usize) -> Self {
        if memory_budget == 0 {
            log::warn!("layer cache created with a zero budget, using 1 byte");
        }
        Self {
            state: RwLock::new(CacheState::new(memory_budget.max(1))),
            memory_source: Box::new(NoMemoryInfo),
            prefetch_radius: DEFAULT_PREFETCH_RADIUS,
        }
    }

    /// Create a cache with a budget in megabytes (saturating)
    pub fn with_mb_budget(megabytes: usize) -> Self {
        Self::new(megabytes.saturating_mul(MB))
    }

    /// Create a cache from a configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        let cache = Self::new(config.memory_budget).with_prefetch_radius(config.prefetch_radius);
        cache.set_adaptive_config(config.adaptive());
        cache
    }

    /// Set how many layers [`prefetch_around`](Self::prefetch_around) warms on each side
    pub fn with_prefetch_radius(mut self, radius: usize) -> Self {
        self.prefetch_radius = radius;
        self
    }

    pub fn prefetch_radius(&self) -> usize {
        self.prefetch_radius
    }

    /// Use `source` for system memory figures in pressure checks
    pub fn with_memory_source(mut self, source: impl MemoryInfoSource + 'static) -> Self {
        self.memory_source = Box::new(source);
        self
    }

    /// Return the layer's segments, loading them on a miss.
    ///
    /// A hit bumps the layer to most recently used and never calls the
    /// loader. On a miss the loader runs while the cache is locked. Its
    /// result is cached if it fits the budget (evicting older layers as
    /// needed); a layer larger than the whole budget is returned uncached.
    pub fn get_or_load<L>(&self, index: LayerIndex, loader: &mut L) -> LayerFetch
    where
        L: LayerLoader + ?Sized,
    {
        let mut state = self.state.write();

        if let Some(segments) = state.hit(index) {
            return LayerFetch::hit(segments);
        }

        state.counters.misses += 1;

        let segments: SharedSegments = match loader.load_layer(index) {
            Some(segments) if !segments.is_empty() => Arc::from(segments),
            _ => {
                state.counters.load_failures += 1;
                log::warn!("layer {} could not be loaded", index);
                return LayerFetch::failed();
            }
        };

        let size = layer_size_bytes(segments.len());
        if size > state.memory_budget {
            state.counters.uncached_loads += 1;
            log::debug!(
                "layer {} ({} bytes) exceeds budget {}, returning uncached",
                index,
                size,
                state.memory_budget
            );
        } else {
            state.admit(index, segments.clone(), size);
            log::debug!("cached layer {} ({} bytes)", index, size);
        }

        LayerFetch::loaded(segments)
    }

    /// Store a layer without going through a loader.
    ///
    /// Returns `false` and changes nothing if the layer alone exceeds the
    /// budget. Otherwise any previous entry for `index` is replaced.
    pub fn insert(&self, index: LayerIndex, segments: Vec<ToolpathSegment>) -> bool {
        let size = layer_size_bytes(segments.len());
        let mut state = self.state.write();

        if size > state.memory_budget {
            log::debug!(
                "rejected layer {} ({} bytes) over budget {}",
                index,
                size,
                state.memory_budget
            );
            return false;
        }

        state.remove(index);
        state.admit(index, Arc::from(segments), size);
        true
    }

    /// Remove a layer. Returns whether it was cached.
    pub fn evict(&self, index: LayerIndex) -> bool {
        let mut state = self.state.write();
        state.remove(index).is_some()
    }

    /// Remove all layers. Statistics are kept.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.layers.clear();
        state.recency.clear();
        state.memory_used = 0;
    }

    /// Check if a layer is cached without updating recency
    pub fn is_cached(&self, index: LayerIndex) -> bool {
        self.state.read().layers.contains_key(&index)
    }

    /// Number of layers currently cached
    pub fn cached_layer_count(&self) -> usize {
        self.state.read().layers.len()
    }

    /// Bytes charged for cached layers
    pub fn memory_usage_bytes(&self) -> usize {
        self.state.read().memory_used
    }

    /// Current byte budget
    pub fn memory_budget(&self) -> usize {
        self.state.read().memory_budget
    }

    /// Change the byte budget, evicting LRU layers if usage is now above it.
    ///
    /// Returns the number of layers evicted. A zero budget is raised to one
    /// byte. With adaptive mode on, the next pressure check may move the
    /// budget again.
    pub fn set_memory_budget(&self, new_budget: usize) -> usize {
        if new_budget == 0 {
            log::warn!("layer cache budget set to zero, using 1 byte");
        }
        let new_budget = new_budget.max(1);
        let mut state = self.state.write();
        let evicted = state.apply_budget(new_budget);
        log::debug!(
            "budget set to {} bytes, evicted {} layers",
            new_budget,
            evicted
        );
        evicted
    }

    /// Hits and misses since construction or the last [`reset_stats`](Self::reset_stats)
    pub fn hit_stats(&self) -> (u64, u64) {
        let state = self.state.read();
        (state.counters.hits, state.counters.misses)
    }

    /// hits / (hits + misses), 0.0 before any access
    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }

    /// Zero the statistics counters without touching cached layers
    pub fn reset_stats(&self) {
        self.state.write().counters = Counters::default();
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.state.read().stats()
    }

    /// Warm the layers around `center`.
    ///
    /// Every layer in `[center - radius, center + radius]`, clipped to
    /// `[0, max_layer]`, goes through [`get_or_load`](Self::get_or_load):
    /// cached layers are bumped, missing ones are loaded. Returns how many
    /// layers were freshly loaded.
    pub fn prefetch<L>(
        &self,
        center: LayerIndex,
        radius: usize,
        loader: &mut L,
        max_layer: LayerIndex,
    ) -> usize
    where
        L: LayerLoader + ?Sized,
    {
        let window = PrefetchWindow::new(center, radius, max_layer);
        let mut loaded = 0;

        for index in window.layers() {
            let fetch = self.get_or_load(index, loader);
            if !fetch.was_hit && !fetch.load_failed {
                loaded += 1;
            }
        }

        log::debug!(
            "prefetched layers {}..={} around {}, {} loaded",
            window.first(),
            window.last(),
            center,
            loaded
        );
        loaded
    }

    /// [`prefetch`](Self::prefetch) with the cache's configured radius
    pub fn prefetch_around<L>(
        &self,
        center: LayerIndex,
        loader: &mut L,
        max_layer: LayerIndex,
    ) -> usize
    where
        L: LayerLoader + ?Sized,
    {
        self.prefetch(center, self.prefetch_radius, loader, max_layer)
    }

    /// Turn adaptive mode on or off with default interval and budget range
    pub fn set_adaptive_mode(&self, enabled: bool) {
        self.set_adaptive_config(AdaptiveConfig {
            enabled,
            ..AdaptiveConfig::default()
        });
    }

    /// Replace the adaptive configuration. Never evicts by itself.
    pub fn set_adaptive_config(&self, config: AdaptiveConfig) {
        let mut state = self.state.write();
        if state.adaptive.enabled != config.enabled {
            log::info!(
                "adaptive layer cache budget {} (range {}..={} bytes, every {:?})",
                if config.enabled { "enabled" } else { "disabled" },
                config.min_budget,
                config.max_budget,
                config.check_interval
            );
        }
        state.adaptive = config;
    }

    /// Current adaptive configuration
    pub fn adaptive_config(&self) -> AdaptiveConfig {
        self.state.read().adaptive
    }

    pub fn is_adaptive_mode(&self) -> bool {
        self.state.read().adaptive.enabled
    }

    /// Re-plan the budget from system memory, at most once per check interval.
    ///
    /// Does nothing while adaptive mode is off. A call inside the interval
    /// is skipped and leaves the last-check time alone. Otherwise the
    /// last-check time is reset, the memory source is consulted, and the
    /// budget moves within the configured range, evicting LRU layers if it
    /// drops below current usage.
    pub fn check_memory_pressure(&self) -> PressureCheck {
        let mut state = self.state.write();

        if !state.adaptive.enabled {
            return PressureCheck::Disabled;
        }

        let elapsed = state.last_pressure_check.elapsed();
        if elapsed < state.adaptive.check_interval {
            return PressureCheck::Skipped {
                remaining: state.adaptive.check_interval - elapsed,
            };
        }
        state.last_pressure_check = Instant::now();

        let Some(info) = self.memory_source.memory_info() else {
            log::debug!("system memory figures unavailable, budget unchanged");
            return PressureCheck::Unavailable;
        };

        let old_budget = state.memory_budget;
        let plan = state.adaptive.plan_budget(&info, old_budget);
        let evicted = state.apply_budget(plan.budget);

        if plan.budget != old_budget {
            log::debug!(
                "{:?} memory pressure ({} MB available): budget {} -> {} bytes, evicted {} layers",
                plan.pressure,
                info.available_mb(),
                old_budget,
                plan.budget,
                evicted
            );
        }

        PressureCheck::Checked {
            pressure: plan.pressure,
            old_budget,
            new_budget: plan.budget,
            evicted,
        }
    }

    /// Milliseconds since the last pressure check that was not skipped, or
    /// since construction
    pub fn ms_since_last_pressure_check(&self) -> u64 {
        let elapsed = self.state.read().last_pressure_check.elapsed();
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// Emergency shrink, ignoring the check interval.
    ///
    /// Evicts LRU layers until usage is at most `fraction` of the current
    /// budget. The budget itself is left unchanged, so the cache refills as
    /// layers are requested again. `fraction` is clamped to `[0, 1]`; a
    /// non-finite value is ignored. Returns the number of layers evicted.
    pub fn respond_to_pressure(&self, fraction: f64) -> usize {
        if !fraction.is_finite() {
            log::warn!("ignoring memory pressure response with fraction {}", fraction);
            return 0;
        }

        let mut state = self.state.write();
        let target = (state.memory_budget as f64 * fraction.clamp(0.0, 1.0)) as usize;
        let evicted = state.evict_until(target, 0);

        log::warn!(
            "memory pressure response: evicted {} layers, {} bytes left (target {})",
            evicted,
            state.memory_used,
            target
        );
        evicted
    }
}

impl Default for LayerCache {
    /// Create a cache with the normal-device default budget
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_NORMAL)
    }
}

//! Toolpath geometry held by the layer cache
//!
//! Segments are produced by an external decoder and handed to the cache as
//! plain values. The cache wraps each layer's segments in a shared slice so
//! readers keep their data alive even after the layer is evicted.

use std::sync::Arc;

/// Index of a print layer (0 = first layer on the bed)
pub type LayerIndex = usize;

/// Shared, read-only view of one layer's segments in draw order
pub type SharedSegments = Arc<[ToolpathSegment]>;

/// Bytes charged per segment when accounting a layer against the budget.
///
/// Covers the segment geometry plus the container overhead the decoder
/// carries alongside it. Hosts may rely on this value to reason about
/// headroom: a layer of `n` segments always costs `n * SEGMENT_FOOTPRINT_BYTES`.
pub const SEGMENT_FOOTPRINT_BYTES: usize = 64;

/// Byte size charged for a layer with `segment_count` segments
pub fn layer_size_bytes(segment_count: usize) -> usize {
    segment_count.saturating_mul(SEGMENT_FOOTPRINT_BYTES)
}

/// A point in printer coordinates (millimetres)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// One straight-line move within a layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolpathSegment {
    /// Where the move starts
    pub start: Point3,

    /// Where the move ends
    pub end: Point3,

    /// True when material is extruded, false for a travel move
    pub is_extrusion: bool,
}

impl ToolpathSegment {
    /// Create an extrusion segment
    pub fn extrusion(start: Point3, end: Point3) -> Self {
        Self {
            start,
            end,
            is_extrusion: true,
        }
    }

    /// Create a travel (non-extruding) segment
    pub fn travel(start: Point3, end: Point3) -> Self {
        Self {
            start,
            end,
            is_extrusion: false,
        }
    }

    /// Euclidean length of the move
    pub fn length(&self) -> f32 {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        let dz = self.end.z - self.start.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

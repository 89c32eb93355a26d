//! Prefetch window around the layer being viewed

use std::ops::RangeInclusive;

use crate::segment::LayerIndex;

/// Inclusive range of layers to warm around a center layer.
///
/// The window is `[center - radius, center + radius]` clipped to
/// `[0, max_layer]`. A center beyond `max_layer` can produce an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchWindow {
    pub center: LayerIndex,
    pub radius: usize,
    pub max_layer: LayerIndex,
}

impl PrefetchWindow {
    pub fn new(center: LayerIndex, radius: usize, max_layer: LayerIndex) -> Self {
        Self {
            center,
            radius,
            max_layer,
        }
    }

    /// First layer in the window
    pub fn first(&self) -> LayerIndex {
        self.center.saturating_sub(self.radius)
    }

    /// Last layer in the window
    pub fn last(&self) -> LayerIndex {
        self.center.saturating_add(self.radius).min(self.max_layer)
    }

    /// Layers covered by the window, lowest first
    pub fn layers(&self) -> RangeInclusive<LayerIndex> {
        self.first()..=self.last()
    }

    /// Number of layers in the window
    pub fn len(&self) -> usize {
        if self.first() > self.last() {
            0
        } else {
            self.last() - self.first() + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Loader capability used to fill the cache on a miss

use crate::segment::{LayerIndex, ToolpathSegment};

/// Produces the segments of a layer on demand.
///
/// Returning `None` or an empty vector signals that the layer could not be
/// decoded; the cache records a load failure and stores nothing. The loader
/// may be called while the cache holds its exclusive lock, so it must not
/// call back into the same cache.
pub trait LayerLoader {
    fn load_layer(&mut self, index: LayerIndex) -> Option<Vec<ToolpathSegment>>;
}

impl<F> LayerLoader for F
where
    F: FnMut(LayerIndex) -> Option<Vec<ToolpathSegment>>,
{
    fn load_layer(&mut self, index: LayerIndex) -> Option<Vec<ToolpathSegment>> {
        self(index)
    }
}

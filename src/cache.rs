//! Memoization of expensive per-waveform analysis queries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Key identifying one edge query: waveform identity, waveform revision
/// and the threshold voltage (bit pattern, so NaN never enters the map).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    waveform: u64,
    revision: u64,
    threshold: u32,
}

/// Shared cache for edge and zero-crossing queries.
///
/// The mutex guards only the map lookups and inserts; the edge search itself
/// always runs outside the critical section. Stale entries for old revisions
/// are left in place until [`AnalysisCache::clear`] is called.
#[derive(Default)]
pub struct AnalysisCache {
    crossings: Mutex<HashMap<CacheKey, Arc<Vec<i64>>>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, identity: (u64, u64), threshold: f32) -> Option<Arc<Vec<i64>>> {
        let key = CacheKey {
            waveform: identity.0,
            revision: identity.1,
            threshold: threshold.to_bits(),
        };
        self.crossings.lock().unwrap().get(&key).cloned()
    }

    pub fn insert(&self, identity: (u64, u64), threshold: f32, edges: Vec<i64>) -> Arc<Vec<i64>> {
        let key = CacheKey {
            waveform: identity.0,
            revision: identity.1,
            threshold: threshold.to_bits(),
        };
        let edges = Arc::new(edges);
        self.crossings.lock().unwrap().insert(key, edges.clone());
        edges
    }

    /// Drop every cached result.
    pub fn clear(&self) {
        self.crossings.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.crossings.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

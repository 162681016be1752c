//! LRU cache for decoded tile payloads. Entries outlive grid prunes so
//! re-entering a recently visited region does not refetch.

use crate::layers::grid::types::TileCoord;
use crate::prelude::Arc;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 1024;

/// Shared, interior-mutable LRU over tile payloads, keyed by the wrapped
/// coordinate.
#[derive(Debug)]
pub struct TileDataCache {
    cache: Mutex<LruCache<TileCoord, Arc<Vec<u8>>>>,
}

impl TileDataCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).expect("nonzero default"));
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, coords: &TileCoord) -> Option<Arc<Vec<u8>>> {
        self.lock().get(coords).cloned()
    }

    pub fn put(&self, coords: TileCoord, data: Arc<Vec<u8>>) {
        self.lock().put(coords, data);
    }

    pub fn contains(&self, coords: &TileCoord) -> bool {
        self.lock().contains(coords)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<TileCoord, Arc<Vec<u8>>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for TileDataCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let cache = TileDataCache::new(2);
        let a = TileCoord::new(1, 2, 3);

        assert!(cache.is_empty());
        cache.put(a, Arc::new(vec![1, 2, 3]));
        assert!(cache.contains(&a));
        assert_eq!(*cache.get(&a).unwrap(), vec![1, 2, 3]);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = TileDataCache::new(2);
        let (a, b, c) = (
            TileCoord::new(1, 1, 1),
            TileCoord::new(2, 2, 2),
            TileCoord::new(3, 3, 3),
        );

        cache.put(a, Arc::new(vec![1]));
        cache.put(b, Arc::new(vec![2]));
        cache.put(c, Arc::new(vec![3]));

        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.len(), 2);
    }
}

//! Async tile loading with bounded concurrency.
//!
//! Requests are tagged with a generation counter. Completions look up the
//! *latest* generation registered for their coordinate, so a tile that was
//! evicted and re-requested while a fetch was in flight resolves against the
//! live cache entry, and a stale completion identifies itself to the grid.

use crate::layers::grid::source::TileSource;
use crate::layers::grid::types::TileCoord;
use crate::prelude::{Arc, Duration, HashMap};
use crate::MapError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Tile loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Maximum concurrent fetches.
    pub max_concurrent: usize,
    /// Retry attempts per tile after the first failure.
    pub max_retries: u32,
    /// Delay between retry attempts.
    pub retry_delay: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl LoaderConfig {
    pub fn for_testing() -> Self {
        Self {
            max_concurrent: 4,
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
        }
    }
}

/// One completed load.
#[derive(Debug)]
pub struct TileLoadResult {
    pub coords: TileCoord,
    /// Latest generation registered for the coordinate at completion time.
    pub generation: u64,
    pub data: std::result::Result<Arc<Vec<u8>>, MapError>,
}

struct TileTask {
    coords: TileCoord,
    source: Arc<dyn TileSource>,
}

type PendingMap = Arc<Mutex<HashMap<String, u64>>>;

/// Issues fetches through a [`TileSource`] and delivers completions over a
/// channel drained by [`crate::layers::grid::TileGrid::process_results`].
pub struct TileLoader {
    task_tx: Sender<TileTask>,
    result_rx: Receiver<TileLoadResult>,
    pending: PendingMap,
    config: LoaderConfig,
}

impl TileLoader {
    pub fn new(config: LoaderConfig) -> Self {
        let (task_tx, task_rx) = unbounded::<TileTask>();
        let (result_tx, result_rx) = unbounded();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::default()));

        let worker_pending = pending.clone();
        let worker_config = config.clone();
        crate::runtime::spawn(async move {
            run_worker(task_rx, result_tx, worker_pending, worker_config).await;
        });

        Self {
            task_tx,
            result_rx,
            pending,
            config,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Registers a request. When a fetch for the same coordinate is already
    /// in flight, only the generation is refreshed and no new fetch starts;
    /// the in-flight completion will deliver under the new generation.
    /// Returns whether a fetch was actually issued.
    pub fn request(&self, source: Arc<dyn TileSource>, coords: TileCoord, generation: u64) -> bool {
        let key = coords.key();
        {
            let mut pending = lock_pending(&self.pending);
            if pending.insert(key, generation).is_some() {
                return false;
            }
        }

        if self.task_tx.send(TileTask { coords, source }).is_err() {
            log::warn!("tile loader worker gone; dropping request {}", coords.key());
            lock_pending(&self.pending).remove(&coords.key());
            return false;
        }
        true
    }

    /// Drains completed loads without blocking.
    pub fn try_recv(&self) -> Vec<TileLoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            results.push(result);
        }
        results
    }

    /// Number of requests not yet completed.
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

fn lock_pending(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_worker(
    task_rx: Receiver<TileTask>,
    result_tx: Sender<TileLoadResult>,
    pending: PendingMap,
    config: LoaderConfig,
) {
    log::debug!(
        "tile loader worker starting, max_concurrent={}",
        config.max_concurrent
    );
    let in_flight = Arc::new(AtomicUsize::new(0));

    loop {
        match task_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => {
                while in_flight.load(Ordering::Acquire) >= config.max_concurrent {
                    crate::runtime::sleep(Duration::from_millis(5)).await;
                }
                in_flight.fetch_add(1, Ordering::AcqRel);

                let result_tx = result_tx.clone();
                let pending = pending.clone();
                let in_flight = in_flight.clone();
                let config = config.clone();
                crate::runtime::spawn(async move {
                    let data = fetch_with_retries(&task, &config).await;
                    let key = task.coords.key();
                    let generation = lock_pending(&pending).remove(&key).unwrap_or(0);
                    let _ = result_tx.send(TileLoadResult {
                        coords: task.coords,
                        generation,
                        data,
                    });
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                });
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("tile loader worker exiting");
                break;
            }
        }
    }
}

async fn fetch_with_retries(
    task: &TileTask,
    config: &LoaderConfig,
) -> std::result::Result<Arc<Vec<u8>>, MapError> {
    let mut attempt = 0;
    loop {
        match task.source.load(task.coords).await {
            Ok(data) => return Ok(Arc::new(data)),
            Err(error) => {
                if attempt >= config.max_retries {
                    return Err(error);
                }
                attempt += 1;
                log::debug!(
                    "retrying tile {} (attempt {}): {}",
                    task.coords.key(),
                    attempt,
                    error
                );
                crate::runtime::sleep(config.retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::grid::source::FixedTileSource;
    use crate::prelude::Instant;

    fn drain(loader: &TileLoader, expect: usize, timeout: Duration) -> Vec<TileLoadResult> {
        let deadline = Instant::now() + timeout;
        let mut results = Vec::new();
        while results.len() < expect && Instant::now() < deadline {
            results.extend(loader.try_recv());
            std::thread::sleep(Duration::from_millis(5));
        }
        results
    }

    #[test]
    fn test_load_delivers_payload() {
        let loader = TileLoader::new(LoaderConfig::for_testing());
        let source: Arc<dyn TileSource> = Arc::new(FixedTileSource::new());
        let coords = TileCoord::new(1, 2, 3);

        assert!(loader.request(source, coords, 7));
        let results = drain(&loader, 1, Duration::from_secs(5));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].coords, coords);
        assert_eq!(results[0].generation, 7);
        assert_eq!(*results[0].data.as_ref().unwrap().clone(), b"1:2:3".to_vec());
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_request_refreshes_generation() {
        let loader = TileLoader::new(LoaderConfig::for_testing());
        let source: Arc<dyn TileSource> =
            Arc::new(FixedTileSource::new().with_delay(Duration::from_millis(50)));
        let coords = TileCoord::new(0, 0, 4);

        assert!(loader.request(source.clone(), coords, 1));
        assert!(!loader.request(source, coords, 2));

        let results = drain(&loader, 1, Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        // The single fetch resolves under the refreshed generation.
        assert_eq!(results[0].generation, 2);

        // No second completion arrives.
        std::thread::sleep(Duration::from_millis(100));
        assert!(loader.try_recv().is_empty());
    }

    #[test]
    fn test_failed_tile_reports_error() {
        let loader = TileLoader::new(LoaderConfig::for_testing());
        let coords = TileCoord::new(9, 9, 9);
        let source: Arc<dyn TileSource> = Arc::new(FixedTileSource::new().failing_on(coords));

        loader.request(source, coords, 1);
        let results = drain(&loader, 1, Duration::from_secs(5));

        assert_eq!(results.len(), 1);
        assert!(results[0].data.is_err());
    }
}

//! Map lifecycle events and the publish/subscribe bus they travel on.
//!
//! Every stateful entity owns a bus (composition, not inheritance);
//! propagation to parent objects is an explicit list of weak references.

use crate::core::geo::{LatLng, Point};
use crate::layers::grid::TileCoord;
use crate::prelude::HashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Monotonic id source with explicit reset for tests. Held process-wide for
/// bus/listener stamping; engines that need isolated sequences own their own
/// instance.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Resets the sequence. Only meaningful in tests.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }

    pub fn global() -> &'static IdAllocator {
        static GLOBAL: Lazy<IdAllocator> = Lazy::new(IdAllocator::new);
        &GLOBAL
    }
}

/// Reason a location request failed without throwing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationErrorCode {
    /// No locator capability installed in this host.
    NotSupported,
    /// The capability exists but produced no position.
    PositionUnavailable,
}

/// Events fired by the map controller and the tile grid.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// Zoom is about to change (fired once per zooming sequence).
    ZoomStart { zoom: f64 },
    /// The view is about to move (fired once per move sequence).
    MoveStart { center: LatLng },
    /// Zoom changed this frame (repeatedly during animation).
    Zoom { center: LatLng, zoom: f64 },
    /// Center changed this frame (repeatedly during animation).
    Move { center: LatLng, zoom: f64 },
    /// Zooming sequence finished.
    ZoomEnd { zoom: f64 },
    /// Move sequence finished (always the terminal event).
    MoveEnd { center: LatLng, zoom: f64 },
    /// Per-frame zoom animation state, consumed by pyramid-level transforms.
    ZoomAnim { center: LatLng, zoom: f64 },
    /// A non-incremental view change is about to be applied.
    ViewPreReset,
    /// A non-incremental view change was applied; re-project everything.
    ViewReset { center: LatLng, zoom: f64 },
    /// The view became initialized for the first time.
    Load,
    /// The viewport size changed.
    Resize { old_size: Point, new_size: Point },
    /// A tile load request was issued.
    TileLoadStart { coords: TileCoord },
    /// A tile finished loading.
    TileLoad { coords: TileCoord },
    /// A tile failed to load; the batch continues.
    TileError { coords: TileCoord, message: String },
    /// A tile left the cache.
    TileUnload { coords: TileCoord },
    /// The grid started loading a new batch.
    GridLoading,
    /// Every current tile in the grid finished loading.
    GridLoad,
    LocationFound { lat_lng: LatLng, accuracy: f64 },
    LocationError {
        code: LocationErrorCode,
        message: String,
    },
}

impl MapEvent {
    /// The name listeners register under.
    pub fn name(&self) -> &'static str {
        match self {
            MapEvent::ZoomStart { .. } => "zoomstart",
            MapEvent::MoveStart { .. } => "movestart",
            MapEvent::Zoom { .. } => "zoom",
            MapEvent::Move { .. } => "move",
            MapEvent::ZoomEnd { .. } => "zoomend",
            MapEvent::MoveEnd { .. } => "moveend",
            MapEvent::ZoomAnim { .. } => "zoomanim",
            MapEvent::ViewPreReset => "viewprereset",
            MapEvent::ViewReset { .. } => "viewreset",
            MapEvent::Load => "load",
            MapEvent::Resize { .. } => "resize",
            MapEvent::TileLoadStart { .. } => "tileloadstart",
            MapEvent::TileLoad { .. } => "tileload",
            MapEvent::TileError { .. } => "tileerror",
            MapEvent::TileUnload { .. } => "tileunload",
            MapEvent::GridLoading => "gridloading",
            MapEvent::GridLoad => "gridload",
            MapEvent::LocationFound { .. } => "locationfound",
            MapEvent::LocationError { .. } => "locationerror",
        }
    }
}

/// What a listener receives: the event plus, when the event reached this bus
/// by propagation, the id of the bus it originated on.
#[derive(Debug)]
pub struct EventEnvelope<'a> {
    pub event: &'a MapEvent,
    pub propagated_from: Option<u64>,
}

pub type ListenerId = u64;
type Callback = Arc<dyn Fn(&EventEnvelope<'_>) + Send + Sync>;

/// Synchronous publish/subscribe. Listeners fire in registration order,
/// before `fire` returns; a listener must not assume it is the only
/// subscriber of an event.
pub struct EventBus {
    id: u64,
    listeners: Mutex<HashMap<&'static str, Vec<(ListenerId, Callback)>>>,
    parents: Mutex<Vec<(u64, Weak<EventBus>)>>,
    ids: IdAllocator,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: IdAllocator::global().next_id(),
            listeners: Mutex::new(HashMap::default()),
            parents: Mutex::new(Vec::new()),
            ids: IdAllocator::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registers a listener; returns the id used to unsubscribe.
    pub fn on<F>(&self, name: &'static str, callback: F) -> ListenerId
    where
        F: Fn(&EventEnvelope<'_>) + Send + Sync + 'static,
    {
        let id = self.ids.next_id();
        self.lock_listeners()
            .entry(name)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes a listener; returns whether it was registered.
    pub fn off(&self, name: &'static str, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        if let Some(list) = listeners.get_mut(name) {
            let before = list.len();
            list.retain(|(lid, _)| *lid != id);
            return list.len() != before;
        }
        false
    }

    pub fn listener_count(&self, name: &'static str) -> usize {
        self.lock_listeners().get(name).map_or(0, |l| l.len())
    }

    /// Fires an event to local listeners and, when requested, to parents.
    pub fn fire(&self, event: &MapEvent, propagate: bool) {
        self.dispatch(event, None);
        if propagate {
            self.propagate(event, self.id);
        }
    }

    /// Attaches a parent bus; events fired with `propagate` re-fire there
    /// with `propagated_from` set.
    pub fn add_parent(&self, parent: &Arc<EventBus>) {
        self.lock_parents().push((parent.id, Arc::downgrade(parent)));
    }

    pub fn remove_parent(&self, parent_id: u64) {
        self.lock_parents().retain(|(id, _)| *id != parent_id);
    }

    fn dispatch(&self, event: &MapEvent, propagated_from: Option<u64>) {
        // Snapshot under the lock, invoke outside it, so a listener may
        // subscribe/unsubscribe or fire again without deadlocking.
        let callbacks: Vec<Callback> = self
            .lock_listeners()
            .get(event.name())
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        let envelope = EventEnvelope {
            event,
            propagated_from,
        };
        for callback in callbacks {
            callback(&envelope);
        }
    }

    fn propagate(&self, event: &MapEvent, source: u64) {
        let parents: Vec<Weak<EventBus>> = self
            .lock_parents()
            .iter()
            .map(|(_, weak)| weak.clone())
            .collect();
        for weak in parents {
            if let Some(parent) = weak.upgrade() {
                parent.dispatch(event, Some(source));
                parent.propagate(event, source);
            }
        }
    }

    fn lock_listeners(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<&'static str, Vec<(ListenerId, Callback)>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_parents(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Weak<EventBus>)>> {
        self.parents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("id", &self.id).finish()
    }
}

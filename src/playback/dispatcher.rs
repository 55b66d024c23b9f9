// =============================================================================
// CALLBACK DISPATCHER
// =============================================================================
//
// Outward notifications of the engine:
// - per-instance listener registries, each subscription removable on its own
// - per-tick notifications (frame data, time updates, caption renderer seeks)
//   coalesced into one batch, latest value wins
// - lifecycle events delivered immediately to listeners and to a broadcast bus
// - frame payloads drawn from a bounded pool
//
// A panicking listener is logged and skipped; it never takes the loop down.
//
// =============================================================================

use serde::Serialize;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Instant;
use tokio::sync::broadcast;

use crate::core::{CaptionRenderer, DispatchConfig, MediaError, VirtualSegment, VirtualTimeline};

/// Payload handed to frame observers once per processed tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualFrameData {
    pub virtual_time: f64,
    pub media_time: f64,
    /// Virtual time rounded to the millisecond
    pub display_time: f64,
    pub active_segments: Vec<Rc<VirtualSegment>>,
}

impl VirtualFrameData {
    fn clear(&mut self) {
        self.virtual_time = 0.0;
        self.media_time = 0.0;
        self.display_time = 0.0;
        self.active_segments.clear();
    }
}

/// Lifecycle events mirrored onto the broadcast bus.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Play { virtual_time: f64 },
    Pause { virtual_time: f64 },
    Stop,
    Seek { virtual_time: f64 },
    Ended { virtual_time: f64 },
    TimelineChanged { version: u64, duration: f64 },
    GapEntered { virtual_time: f64 },
    GapLeft { segment_id: String },
    PlayRejected(MediaError),
    MediaError(MediaError),
}

// =============================================================================
// LISTENER REGISTRY
// =============================================================================

type Callback<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Registry<T: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

pub struct Listeners<T: ?Sized> {
    inner: Rc<RefCell<Registry<T>>>,
}

impl<T: ?Sized + 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        let mut registry = self.inner.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        let callback: Callback<T> = Rc::new(RefCell::new(callback));
        registry.entries.push((id, callback));

        let weak: Weak<RefCell<Registry<T>>> = Rc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.borrow_mut().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener with `value`. Returns the number of listeners that panicked.
    pub fn emit(&self, value: &T, label: &str) -> u32 {
        let mut panics = 0;
        let mut index = 0;
        loop {
            // Registry borrow is released before the call so listeners may (un)subscribe
            let callback = match self.inner.borrow().entries.get(index) {
                Some((_, callback)) => Rc::clone(callback),
                None => break,
            };
            index += 1;

            let Ok(mut callback) = callback.try_borrow_mut() else {
                log::warn!("Skipping re-entrant {} listener", label);
                continue;
            };
            if panic::catch_unwind(AssertUnwindSafe(|| (*callback)(value))).is_err() {
                log::error!("A {} listener panicked; continuing", label);
                panics += 1;
            }
        }
        panics
    }
}

/// Returned by every `on_*` registration. Dropping it keeps the listener
/// registered; call `unsubscribe` to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

// =============================================================================
// FRAME POOL
// =============================================================================

/// Bounded free-list of frame payloads.
pub struct FramePool {
    free: Vec<VirtualFrameData>,
    capacity: usize,
    allocations: u64,
    reuses: u64,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity)
            .map(|_| VirtualFrameData {
                active_segments: Vec::with_capacity(2),
                ..VirtualFrameData::default()
            })
            .collect();
        Self {
            free,
            capacity,
            allocations: 0,
            reuses: 0,
        }
    }

    pub fn acquire(&mut self) -> VirtualFrameData {
        match self.free.pop() {
            Some(frame) => {
                self.reuses += 1;
                frame
            }
            None => {
                self.allocations += 1;
                log::trace!("Frame pool exhausted, allocating ({} so far)", self.allocations);
                VirtualFrameData::default()
            }
        }
    }

    pub fn release(&mut self, mut frame: VirtualFrameData) {
        if self.free.len() < self.capacity {
            frame.clear();
            self.free.push(frame);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn reuses(&self) -> u64 {
        self.reuses
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub batches_flushed: u64,
    pub notifications_coalesced: u64,
    pub listener_panics: u64,
    pub renderer_seeks: u64,
    pub pool_allocations: u64,
    pub pool_reuses: u64,
}

#[derive(Default)]
struct PendingBatch {
    frame: Option<VirtualFrameData>,
    time_update: Option<f64>,
    renderer_seek: Option<f64>,
}

impl PendingBatch {
    fn is_empty(&self) -> bool {
        self.frame.is_none() && self.time_update.is_none() && self.renderer_seek.is_none()
    }
}

pub struct CallbackDispatcher {
    pub(crate) frame: Listeners<VirtualFrameData>,
    pub(crate) time_update: Listeners<f64>,
    pub(crate) play: Listeners<f64>,
    pub(crate) pause: Listeners<f64>,
    pub(crate) stop: Listeners<()>,
    pub(crate) seek: Listeners<f64>,
    pub(crate) ended: Listeners<f64>,
    pub(crate) timeline_change: Listeners<VirtualTimeline>,
    renderer: Option<Box<dyn CaptionRenderer>>,
    pool: FramePool,
    batch: PendingBatch,
    last_flush: Option<Instant>,
    events: broadcast::Sender<PlaybackEvent>,
    config: DispatchConfig,
    stats: DispatchStats,
}

impl CallbackDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            frame: Listeners::new(),
            time_update: Listeners::new(),
            play: Listeners::new(),
            pause: Listeners::new(),
            stop: Listeners::new(),
            seek: Listeners::new(),
            ended: Listeners::new(),
            timeline_change: Listeners::new(),
            renderer: None,
            pool: FramePool::new(config.frame_pool_capacity),
            batch: PendingBatch::default(),
            last_flush: None,
            events,
            config,
            stats: DispatchStats::default(),
        }
    }

    pub fn set_renderer(&mut self, renderer: Option<Box<dyn CaptionRenderer>>) {
        self.renderer = renderer;
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn queue_frame(
        &mut self,
        virtual_time: f64,
        media_time: f64,
        segment: Option<&Rc<VirtualSegment>>,
    ) {
        let mut frame = self.pool.acquire();
        frame.virtual_time = virtual_time;
        frame.media_time = media_time;
        frame.display_time = (virtual_time * 1000.0).round() / 1000.0;
        frame.active_segments.extend(segment.cloned());

        if let Some(previous) = self.batch.frame.replace(frame) {
            self.stats.notifications_coalesced += 1;
            self.pool.release(previous);
        }
    }

    pub fn queue_time_update(&mut self, virtual_time: f64) {
        if self.batch.time_update.replace(virtual_time).is_some() {
            self.stats.notifications_coalesced += 1;
        }
    }

    pub fn queue_renderer_seek(&mut self, virtual_time: f64) {
        if self.batch.renderer_seek.replace(virtual_time).is_some() {
            self.stats.notifications_coalesced += 1;
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.batch.is_empty()
    }

    /// Drops a queued frame that a reposition made stale.
    pub fn discard_pending_frame(&mut self) {
        if let Some(frame) = self.batch.frame.take() {
            self.pool.release(frame);
        }
    }

    /// Delivers the pending batch. Unless forced, a batch queued within the
    /// coalescing window of the previous flush is held for the next one.
    pub fn flush(&mut self, now: Instant, force: bool) {
        if self.batch.is_empty() {
            return;
        }
        if !force {
            if let Some(last) = self.last_flush {
                let since_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
                if since_ms < self.config.coalesce_window_ms {
                    return;
                }
            }
        }

        let batch = std::mem::take(&mut self.batch);
        self.last_flush = Some(now);
        self.stats.batches_flushed += 1;

        if let Some(virtual_time) = batch.renderer_seek {
            if let Some(renderer) = self.renderer.as_mut() {
                self.stats.renderer_seeks += 1;
                if panic::catch_unwind(AssertUnwindSafe(|| renderer.seek(virtual_time))).is_err() {
                    log::error!("Caption renderer panicked while seeking to {:.3}s", virtual_time);
                    self.stats.listener_panics += 1;
                }
            }
        }

        if let Some(frame) = batch.frame {
            self.stats.listener_panics += u64::from(self.frame.emit(&frame, "frame"));
            self.pool.release(frame);
        }

        if let Some(virtual_time) = batch.time_update {
            self.stats.listener_panics += u64::from(self.time_update.emit(&virtual_time, "time update"));
        }
    }

    /// Drops anything queued but not yet delivered.
    pub fn discard_pending(&mut self) {
        if let Some(frame) = self.batch.frame.take() {
            self.pool.release(frame);
        }
        self.batch = PendingBatch::default();
    }

    /// Lifecycle events bypass batching: each one is delivered exactly once, now.
    pub fn emit_event(&mut self, event: PlaybackEvent) {
        let panics = match &event {
            PlaybackEvent::Play { virtual_time } => self.play.emit(virtual_time, "play"),
            PlaybackEvent::Pause { virtual_time } => self.pause.emit(virtual_time, "pause"),
            PlaybackEvent::Stop => self.stop.emit(&(), "stop"),
            PlaybackEvent::Seek { virtual_time } => self.seek.emit(virtual_time, "seek"),
            PlaybackEvent::Ended { virtual_time } => self.ended.emit(virtual_time, "ended"),
            _ => 0,
        };
        self.stats.listener_panics += u64::from(panics);
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub fn emit_timeline_change(&mut self, timeline: &VirtualTimeline) {
        let panics = self.timeline_change.emit(timeline, "timeline change");
        self.stats.listener_panics += u64::from(panics);
        let _ = self.events.send(PlaybackEvent::TimelineChanged {
            version: timeline.version,
            duration: timeline.duration,
        });
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            pool_allocations: self.pool.allocations(),
            pool_reuses: self.pool.reuses(),
            ..self.stats
        }
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let listeners: Listeners<f64> = Listeners::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let subscription = listeners.subscribe(move |t| sink.borrow_mut().push(*t));
        listeners.emit(&1.0, "test");

        subscription.unsubscribe();
        listeners.emit(&2.0, "test");

        assert_eq!(*seen.borrow(), vec![1.0]);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let listeners: Listeners<f64> = Listeners::new();
        let calls = Rc::new(Cell::new(0));

        let _bad = listeners.subscribe(|_| panic!("listener failure"));
        let counter = Rc::clone(&calls);
        let _good = listeners.subscribe(move |_| counter.set(counter.get() + 1));

        assert_eq!(listeners.emit(&1.0, "test"), 1);
        assert_eq!(listeners.emit(&2.0, "test"), 1);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let listeners: Rc<Listeners<f64>> = Rc::new(Listeners::new());
        let registry = Rc::clone(&listeners);

        let _outer = listeners.subscribe(move |_| {
            let _inner = registry.subscribe(|_| {});
        });
        listeners.emit(&0.0, "test");

        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_pool_reuses_payloads() {
        let mut pool = FramePool::new(2);

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        assert_eq!(pool.allocations(), 1);

        pool.release(a);
        pool.release(b);
        pool.release(c);
        // Capped at capacity
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_released_payloads_are_cleared() {
        let mut pool = FramePool::new(1);
        let mut frame = pool.acquire();
        frame.virtual_time = 3.0;
        frame.active_segments.push(Rc::new(VirtualSegment::with_id("a", 0.0, 1.0, 0.0, 1.0)));
        pool.release(frame);

        let frame = pool.acquire();
        assert_eq!(frame.virtual_time, 0.0);
        assert!(frame.active_segments.is_empty());
    }

    #[test]
    fn test_notifications_within_window_are_coalesced() {
        let mut dispatcher = CallbackDispatcher::new(DispatchConfig::default());
        let times = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&times);
        let _sub = dispatcher.time_update.subscribe(move |t| sink.borrow_mut().push(*t));
        let t0 = Instant::now();

        dispatcher.queue_time_update(1.0);
        dispatcher.flush(t0, false);

        // Queued 2ms after the last flush: held, then merged with the next value
        dispatcher.queue_time_update(1.1);
        dispatcher.flush(t0 + Duration::from_millis(2), false);
        dispatcher.queue_time_update(1.2);
        dispatcher.flush(t0 + Duration::from_millis(8), false);

        assert_eq!(*times.borrow(), vec![1.0, 1.2]);
        assert_eq!(dispatcher.stats().notifications_coalesced, 1);
    }

    #[test]
    fn test_forced_flush_ignores_window() {
        let mut dispatcher = CallbackDispatcher::new(DispatchConfig::default());
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let _sub = dispatcher.time_update.subscribe(move |_| counter.set(counter.get() + 1));
        let t0 = Instant::now();

        dispatcher.queue_time_update(1.0);
        dispatcher.flush(t0, false);
        dispatcher.queue_time_update(2.0);
        dispatcher.flush(t0, true);

        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_discarded_frame_is_never_delivered() {
        let mut dispatcher = CallbackDispatcher::new(DispatchConfig::default());
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let _sub = dispatcher.frame.subscribe(move |_| counter.set(counter.get() + 1));
        let available = dispatcher.pool().available();
        let t0 = Instant::now();

        dispatcher.flush(t0, true);
        dispatcher.queue_frame(1.003, 6.003, None);
        dispatcher.flush(t0 + Duration::from_millis(3), false);
        assert!(dispatcher.has_pending());

        dispatcher.discard_pending_frame();
        assert!(!dispatcher.has_pending());
        assert_eq!(dispatcher.pool().available(), available);

        dispatcher.flush(t0 + Duration::from_millis(4), true);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_renderer_receives_latest_seek() {
        let mut dispatcher = CallbackDispatcher::new(DispatchConfig::default());
        let seeks = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seeks);
        dispatcher.set_renderer(Some(Box::new(move |t: f64| sink.borrow_mut().push(t))));

        dispatcher.queue_renderer_seek(0.5);
        dispatcher.queue_renderer_seek(0.6);
        dispatcher.flush(Instant::now(), false);

        assert_eq!(*seeks.borrow(), vec![0.6]);
    }

    #[test]
    fn test_frame_payload_returns_to_pool() {
        let mut dispatcher = CallbackDispatcher::new(DispatchConfig::default());
        let segment = Rc::new(VirtualSegment::with_id("a", 0.0, 2.0, 5.0, 7.0));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = dispatcher.frame.subscribe(move |frame: &VirtualFrameData| {
            sink.borrow_mut().push((frame.display_time, frame.active_segments[0].id.clone()));
        });
        let available = dispatcher.pool().available();
        let t0 = Instant::now();

        for i in 0..50u64 {
            dispatcher.queue_frame(1.0004, 6.0, Some(&segment));
            dispatcher.flush(t0 + Duration::from_millis(20 * i), false);
        }

        assert_eq!(seen.borrow().len(), 50);
        assert_eq!(seen.borrow()[0], (1.0, "a".to_string()));
        assert_eq!(dispatcher.pool().available(), available);
        assert_eq!(dispatcher.stats().pool_allocations, 0);
    }

    #[test]
    fn test_events_reach_listeners_and_bus() {
        let mut dispatcher = CallbackDispatcher::new(DispatchConfig::default());
        let mut receiver = dispatcher.subscribe_events();
        let stops = Rc::new(Cell::new(0));
        let counter = Rc::clone(&stops);
        let _sub = dispatcher.stop.subscribe(move |_| counter.set(counter.get() + 1));

        dispatcher.emit_event(PlaybackEvent::Stop);

        assert_eq!(stops.get(), 1);
        assert_eq!(receiver.try_recv().unwrap(), PlaybackEvent::Stop);
    }
}

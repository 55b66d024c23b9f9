use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::time::Instant;

use crate::core::{ResolverConfig, VirtualSegment, VirtualTimeline};

/// Indices into the sorted array around the last resolved segment.
#[derive(Debug, Clone, Copy, Default)]
struct NeighborWindow {
    prev: Option<usize>,
    current: Option<usize>,
    next: Option<usize>,
}

impl NeighborWindow {
    fn around(index: usize, len: usize) -> Self {
        Self {
            prev: index.checked_sub(1),
            current: Some(index),
            next: (index + 1 < len).then_some(index + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub neighbor_hits: u64,
    pub cache_hits: u64,
    pub searches: u64,
    pub rebuilds: u64,
    pub invalidations: u64,
}

/// Finds the enabled segment containing a virtual time.
///
/// Lookups try, in order: the neighbor window around the previous result,
/// the recent-result cache, then a binary search over the enabled segments
/// sorted by virtual start.
pub struct SegmentResolver {
    timeline: VirtualTimeline,
    sorted: Vec<Rc<VirtualSegment>>,
    sorted_version: Option<u64>,
    last_rebuild: Option<Instant>,
    neighbors: NeighborWindow,
    /// Exact virtual time (bit pattern) -> index into `sorted`, `None` for a gap
    recent: LruCache<u64, Option<usize>>,
    config: ResolverConfig,
    stats: ResolverStats,
}

impl SegmentResolver {
    pub fn new(timeline: VirtualTimeline, config: ResolverConfig) -> Self {
        let capacity = NonZeroUsize::new(config.recent_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            timeline,
            sorted: Vec::new(),
            sorted_version: None,
            last_rebuild: None,
            neighbors: NeighborWindow::default(),
            recent: LruCache::new(capacity),
            config,
            stats: ResolverStats::default(),
        }
    }

    pub fn timeline(&self) -> &VirtualTimeline {
        &self.timeline
    }

    /// Swaps in a new timeline and drops every derived cache.
    pub fn set_timeline(&mut self, timeline: VirtualTimeline) {
        log::debug!(
            "Resolver: timeline v{} -> v{} ({} segments)",
            self.timeline.version,
            timeline.version,
            timeline.segments.len()
        );
        self.timeline = timeline;
        self.sorted_version = None;
        self.invalidate();
    }

    /// Clears the neighbor window and the recent-result cache.
    pub fn invalidate(&mut self) {
        self.neighbors = NeighborWindow::default();
        self.recent.clear();
        self.stats.invalidations += 1;
    }

    pub fn active_segment(&mut self, virtual_time: f64, now: Instant) -> Option<Rc<VirtualSegment>> {
        if !virtual_time.is_finite() {
            return None;
        }

        if self.sorted_version == Some(self.timeline.version) {
            if let Some(index) = self.neighbor_lookup(virtual_time) {
                self.stats.neighbor_hits += 1;
                return Some(self.focus(index, virtual_time));
            }

            if let Some(&cached) = self.recent.get(&virtual_time.to_bits()) {
                let valid = match cached {
                    Some(index) => self
                        .sorted
                        .get(index)
                        .is_some_and(|s| s.contains_virtual(virtual_time)),
                    None => true,
                };
                if valid {
                    self.stats.cache_hits += 1;
                    return cached.map(|index| self.focus(index, virtual_time));
                }
            }
        }

        self.ensure_sorted(now);
        self.stats.searches += 1;

        match self.binary_search(virtual_time) {
            Some(index) => Some(self.focus(index, virtual_time)),
            None => {
                self.recent.put(virtual_time.to_bits(), None);
                None
            }
        }
    }

    pub fn sorted_segments(&mut self, now: Instant) -> &[Rc<VirtualSegment>] {
        self.ensure_sorted(now);
        &self.sorted
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    fn neighbor_lookup(&self, virtual_time: f64) -> Option<usize> {
        let window = self.neighbors;
        [window.current, window.next, window.prev]
            .into_iter()
            .flatten()
            .find(|&index| {
                self.sorted
                    .get(index)
                    .is_some_and(|s| s.contains_virtual(virtual_time))
            })
    }

    fn focus(&mut self, index: usize, virtual_time: f64) -> Rc<VirtualSegment> {
        self.neighbors = NeighborWindow::around(index, self.sorted.len());
        self.recent.put(virtual_time.to_bits(), Some(index));
        Rc::clone(&self.sorted[index])
    }

    fn ensure_sorted(&mut self, now: Instant) {
        let version_changed = self.sorted_version != Some(self.timeline.version);
        let expired = self
            .last_rebuild
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.rebuild_interval());

        if version_changed || expired {
            self.rebuild(now);
        }
    }

    fn rebuild(&mut self, now: Instant) {
        let mut sorted: Vec<Rc<VirtualSegment>> = self
            .timeline
            .enabled_segments()
            .filter(|s| s.virtual_end_time > s.virtual_start_time)
            .cloned()
            .map(Rc::new)
            .collect();
        sorted.sort_by(|a, b| a.virtual_start_time.total_cmp(&b.virtual_start_time));

        log::trace!("Resolver: rebuilt sorted index with {} segments", sorted.len());
        self.sorted = sorted;
        self.sorted_version = Some(self.timeline.version);
        self.last_rebuild = Some(now);
        self.neighbors = NeighborWindow::default();
        self.recent.clear();
        self.stats.rebuilds += 1;
    }

    fn binary_search(&self, virtual_time: f64) -> Option<usize> {
        let upper = self
            .sorted
            .partition_point(|s| s.virtual_start_time <= virtual_time);
        let index = upper.checked_sub(1)?;
        self.sorted[index].contains_virtual(virtual_time).then_some(index)
    }
}

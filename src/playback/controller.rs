use serde::Serialize;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::oneshot::error::TryRecvError;

use crate::core::{
    CaptionRenderer, EngineConfig, MediaError, PlaybackError, SegmentTimeMapper, TimeMapper,
    TimelineProvider, VirtualSegment, VirtualTimeline,
};
use crate::playback::clock::{SystemTimeSource, TimeSource, VirtualClock};
use crate::playback::dispatcher::{
    CallbackDispatcher, DispatchStats, PlaybackEvent, Subscription, VirtualFrameData,
};
use crate::playback::resolver::{ResolverStats, SegmentResolver};
use crate::playback::scheduler::{DriverKind, FrameDecision, FrameScheduler};
use crate::playback::state::PlaybackState;
use crate::playback::synchronizer::{PositionSynchronizer, SeekReason, SyncAction, SyncInput};
use crate::video::{AttachmentId, FrameMetadata, MediaElement, MediaEvent, PlayRequest};

/// Own seeks remembered to recognize their `Seeked` echoes
const MAX_INTERNAL_SEEKS: usize = 8;
const SEEK_ECHO_EPSILON: f64 = 1e-3;

/// What `handle_frame` did with a frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No element attached or the loop is stopped
    Inactive,
    /// Inside the adaptive debounce window
    Throttled,
    Processed,
}

/// Diagnostics snapshot. Counters only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub ticks_received: u64,
    pub ticks_accepted: u64,
    pub ticks_throttled: u64,
    pub ticks_inactive: u64,
    pub transition_seeks: u64,
    pub large_drift_seeks: u64,
    pub drift_seeks: u64,
    pub explicit_seeks: u64,
    pub gap_pauses: u64,
    pub gap_resumes: u64,
    pub play_rejections: u64,
    pub external_seeks: u64,
    pub media_errors: u64,
    pub ignored_events: u64,
    pub debounce_ms: f64,
    pub driver: Option<DriverKind>,
    pub resolver: ResolverStats,
    pub dispatch: DispatchStats,
}

// =============================================================================
// PLAYBACK CONTROLLER
// =============================================================================
//
// Owns the virtual clock, the segment resolver, the position synchronizer,
// the frame scheduler and the callback dispatcher, and exposes the public
// play/pause/stop/seek surface. The host drives it from one thread:
// - `handle_frame` on every frame callback
// - `handle_media_event` for element events (seeked, error, recovered)
// - `handle_timeline_update` after every timeline edit
//
// =============================================================================

pub struct PlaybackController {
    config: EngineConfig,
    clock: VirtualClock,
    resolver: SegmentResolver,
    synchronizer: PositionSynchronizer,
    scheduler: Option<FrameScheduler>,
    dispatcher: CallbackDispatcher,
    mapper: Box<dyn TimeMapper>,
    time_source: Box<dyn TimeSource>,

    // Attached element
    element: Option<Box<dyn MediaElement>>,
    attachment: Option<AttachmentId>,
    next_attachment: u64,
    element_trusted: bool,
    pending_play: Option<PlayRequest>,
    internal_seeks: VecDeque<f64>,

    // Playback state
    state: PlaybackState,
    is_playing: bool,
    current_segment: Option<Rc<VirtualSegment>>,
    last_tick_at: Option<Instant>,
    frame_interval: Duration,

    stats: SyncStats,
}

impl PlaybackController {
    pub fn new(timeline: VirtualTimeline, config: EngineConfig) -> Self {
        let timeline = timeline.normalized();
        log::info!(
            "PlaybackController: {} segments, duration {:.2}s (v{})",
            timeline.segments.len(),
            timeline.duration,
            timeline.version
        );

        let frame_interval = Duration::try_from_secs_f64(config.throttle.base_interval_ms / 1000.0)
            .unwrap_or(Duration::from_millis(20));
        Self {
            clock: VirtualClock::new(timeline.duration),
            resolver: SegmentResolver::new(timeline, config.resolver.clone()),
            synchronizer: PositionSynchronizer::new(config.sync.clone()),
            scheduler: None,
            dispatcher: CallbackDispatcher::new(config.dispatch.clone()),
            mapper: Box::new(SegmentTimeMapper),
            time_source: Box::new(SystemTimeSource),
            element: None,
            attachment: None,
            next_attachment: 1,
            element_trusted: true,
            pending_play: None,
            internal_seeks: VecDeque::with_capacity(MAX_INTERNAL_SEEKS),
            state: PlaybackState::Stopped,
            is_playing: false,
            current_segment: None,
            last_tick_at: None,
            frame_interval,
            stats: SyncStats::default(),
            config,
        }
    }

    pub fn from_provider(provider: &dyn TimelineProvider, config: EngineConfig) -> Self {
        Self::new(provider.timeline(), config)
    }

    pub fn with_time_source(mut self, time_source: impl TimeSource + 'static) -> Self {
        self.time_source = Box::new(time_source);
        self
    }

    pub fn set_time_mapper(&mut self, mapper: impl TimeMapper + 'static) {
        self.mapper = Box::new(mapper);
    }

    pub fn set_caption_renderer(&mut self, renderer: impl CaptionRenderer + 'static) {
        self.dispatcher.set_renderer(Some(Box::new(renderer)));
    }

    pub fn clear_caption_renderer(&mut self) {
        self.dispatcher.set_renderer(None);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Element lifecycle
    // =========================================================================

    /// Attaches `element`, fully detaching the previous one first.
    pub fn attach_video(&mut self, mut element: Box<dyn MediaElement>) -> AttachmentId {
        self.detach_video();

        let id = AttachmentId(self.next_attachment);
        self.next_attachment += 1;

        element.set_playback_rate(self.clock.playback_rate());
        let scheduler = FrameScheduler::for_element(element.as_ref(), self.config.throttle.clone());
        log::info!(
            "PlaybackController: Attached element #{} ({:?} driver)",
            id.0,
            scheduler.kind()
        );

        self.element_trusted = element.error().is_none();
        self.element = Some(element);
        self.scheduler = Some(scheduler);
        self.attachment = Some(id);
        self.resolver.invalidate();
        self.synchronizer.reset();

        let now = self.time_source.now();
        let virtual_time = self.clock.advance(now);
        self.sync_element_exact(virtual_time, now);
        if self.state.is_playing() {
            self.start_loop();
        }
        id
    }

    /// Detaches the current element and hands it back to the host.
    pub fn detach_video(&mut self) -> Option<Box<dyn MediaElement>> {
        let mut element = self.element.take()?;
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop(element.as_mut());
        }
        if let Some(id) = self.attachment.take() {
            log::info!("PlaybackController: Detached element #{}", id.0);
        }

        self.pending_play = None;
        self.internal_seeks.clear();
        self.current_segment = None;
        self.element_trusted = true;
        self.resolver.invalidate();
        self.synchronizer.reset();
        Some(element)
    }

    pub fn has_video(&self) -> bool {
        self.element.is_some()
    }

    // =========================================================================
    // Playback control
    // =========================================================================

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.element.is_none() {
            return Err(PlaybackError::NoVideoAttached);
        }
        if !self.state.can_play() {
            return Ok(());
        }

        let now = self.time_source.now();
        let from = if self.state.restarts_on_play() {
            0.0
        } else {
            self.clock.advance(now)
        };
        log::info!("PlaybackController: Play from {:.2}s ({})", from, self.state.display_text());

        self.clock.start(from, now);
        self.state = PlaybackState::Playing;
        self.is_playing = true;
        self.resolver.invalidate();
        self.sync_element_exact(from, now);
        self.start_loop();

        self.dispatcher.emit_event(PlaybackEvent::Play { virtual_time: from });
        // Elements that refuse synchronously are resolved already
        self.observe_play_request(now);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        if self.element.is_none() {
            return Err(PlaybackError::NoVideoAttached);
        }
        if !self.state.can_pause() {
            return Ok(());
        }

        let now = self.time_source.now();
        self.enter_paused(now);
        Ok(())
    }

    /// Returns to the beginning of the timeline from any state.
    pub fn stop(&mut self) {
        let now = self.time_source.now();
        log::info!("PlaybackController: Stop ({})", self.state.display_text());

        self.stop_loop();
        if let Some(element) = self.element.as_deref_mut() {
            element.pause();
        }

        self.clock.pause(now);
        self.clock.seek(0.0, now);
        self.state = PlaybackState::Stopped;
        self.is_playing = false;
        self.pending_play = None;
        self.current_segment = None;
        self.resolver.invalidate();
        self.synchronizer.reset();
        self.dispatcher.discard_pending();
        self.dispatcher.emit_event(PlaybackEvent::Stop);
    }

    /// Moves the virtual playhead to `virtual_time` (clamped to the timeline).
    /// The clock and the element are repositioned before this returns.
    pub fn seek(&mut self, virtual_time: f64) -> Result<(), PlaybackError> {
        if !virtual_time.is_finite() {
            return Err(PlaybackError::InvalidTime(virtual_time));
        }

        let now = self.time_source.now();
        let target = virtual_time.clamp(0.0, self.duration());
        log::debug!("PlaybackController: Seek to {:.3}s", target);

        self.clock.seek(target, now);
        self.leave_ended(target);
        self.resolver.invalidate();
        self.sync_element_exact(target, now);

        self.dispatcher.discard_pending_frame();
        self.dispatcher.queue_renderer_seek(target);
        self.dispatcher.queue_time_update(target);
        self.dispatcher.flush(now, true);
        self.dispatcher.emit_event(PlaybackEvent::Seek { virtual_time: target });
        Ok(())
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), PlaybackError> {
        let now = self.time_source.now();
        self.clock.set_playback_rate(rate, now)?;
        if let Some(element) = self.element.as_deref_mut() {
            element.set_playback_rate(rate);
        }
        log::info!("PlaybackController: Playback rate {:.2}x", rate);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn current_time(&self) -> f64 {
        self.clock.advance(self.time_source.now())
    }

    pub fn duration(&self) -> f64 {
        self.resolver.timeline().duration
    }

    pub fn playback_rate(&self) -> f64 {
        self.clock.playback_rate()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Whether playback is running. After a rejected play request this is
    /// re-derived from the element's paused flag.
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn active_segment(&self) -> Option<&VirtualSegment> {
        self.current_segment.as_deref()
    }

    pub fn timeline(&self) -> &VirtualTimeline {
        self.resolver.timeline()
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            debounce_ms: self
                .scheduler
                .as_ref()
                .map_or(self.config.throttle.base_interval_ms, |s| s.throttle().debounce_ms()),
            driver: self.scheduler.as_ref().map(FrameScheduler::kind),
            resolver: self.resolver.stats(),
            dispatch: self.dispatcher.stats(),
            ..self.stats.clone()
        }
    }

    /// Lifecycle events for observers living elsewhere (other threads, async tasks).
    pub fn events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.dispatcher.subscribe_events()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn on_frame(&self, callback: impl FnMut(&VirtualFrameData) + 'static) -> Subscription {
        self.dispatcher.frame.subscribe(callback)
    }

    pub fn on_time_update(&self, mut callback: impl FnMut(f64) + 'static) -> Subscription {
        self.dispatcher.time_update.subscribe(move |t: &f64| callback(*t))
    }

    pub fn on_play(&self, mut callback: impl FnMut(f64) + 'static) -> Subscription {
        self.dispatcher.play.subscribe(move |t: &f64| callback(*t))
    }

    pub fn on_pause(&self, mut callback: impl FnMut(f64) + 'static) -> Subscription {
        self.dispatcher.pause.subscribe(move |t: &f64| callback(*t))
    }

    pub fn on_stop(&self, mut callback: impl FnMut() + 'static) -> Subscription {
        self.dispatcher.stop.subscribe(move |_: &()| callback())
    }

    pub fn on_seek(&self, mut callback: impl FnMut(f64) + 'static) -> Subscription {
        self.dispatcher.seek.subscribe(move |t: &f64| callback(*t))
    }

    pub fn on_ended(&self, mut callback: impl FnMut(f64) + 'static) -> Subscription {
        self.dispatcher.ended.subscribe(move |t: &f64| callback(*t))
    }

    pub fn on_timeline_change(&self, callback: impl FnMut(&VirtualTimeline) + 'static) -> Subscription {
        self.dispatcher.timeline_change.subscribe(callback)
    }

    // =========================================================================
    // Host entry points
    // =========================================================================

    /// Replaces the timeline after an edit. The playhead is clamped into the
    /// new duration and the element is re-synced to the new mapping.
    pub fn handle_timeline_update(&mut self, timeline: VirtualTimeline) -> Result<(), PlaybackError> {
        timeline.validate()?;
        let timeline = timeline.normalized();

        let now = self.time_source.now();
        let current = self.clock.advance(now);

        self.resolver.set_timeline(timeline);
        let duration = self.duration();
        self.clock.set_duration(duration);
        let clamped = current.clamp(0.0, duration);
        self.clock.seek(clamped, now);
        self.leave_ended(clamped);
        self.synchronizer.reset();

        log::info!(
            "PlaybackController: Timeline v{} ({} segments, {:.2}s), playhead {:.2}s",
            self.resolver.timeline().version,
            self.resolver.timeline().segments.len(),
            duration,
            clamped
        );

        if self.element.is_some() {
            self.sync_element_exact(clamped, now);
        } else {
            self.current_segment = self.resolver.active_segment(clamped, now);
        }

        self.dispatcher.emit_timeline_change(self.resolver.timeline());
        self.dispatcher.queue_time_update(clamped);
        self.dispatcher.flush(now, true);
        Ok(())
    }

    /// Runs one tick of the synchronization loop. Call from the element's
    /// frame callback (passing its metadata) or from a display-frame timer.
    pub fn handle_frame(&mut self, now: Instant, native: Option<FrameMetadata>) -> TickOutcome {
        self.stats.ticks_received += 1;
        self.observe_play_request(now);

        let decision = match (self.scheduler.as_mut(), self.element.as_deref()) {
            (Some(scheduler), Some(element)) => scheduler.begin_frame(now, element, native),
            _ => FrameDecision::Inactive,
        };

        let metadata = match decision {
            FrameDecision::Inactive => {
                self.stats.ticks_inactive += 1;
                return TickOutcome::Inactive;
            }
            FrameDecision::Throttled => {
                self.stats.ticks_throttled += 1;
                self.reschedule();
                return TickOutcome::Throttled;
            }
            FrameDecision::Accepted(metadata) => metadata,
        };

        self.stats.ticks_accepted += 1;
        if let Some(previous) = self.last_tick_at.replace(now) {
            self.frame_interval = now.saturating_duration_since(previous);
        }

        self.process_tick(now, &metadata);
        self.reschedule();
        TickOutcome::Processed
    }

    /// Applies an event reported by the element. Events tagged with an
    /// attachment other than the current one are dropped.
    pub fn handle_media_event(&mut self, attachment: AttachmentId, event: MediaEvent) {
        if self.attachment != Some(attachment) {
            log::debug!(
                "PlaybackController: Ignoring {:?} from stale element #{}",
                event,
                attachment.0
            );
            self.stats.ignored_events += 1;
            return;
        }

        match event {
            MediaEvent::Seeked { real_time } => self.reconcile_external_seek(real_time),
            MediaEvent::Error(error) => {
                log::warn!("PlaybackController: Element error: {}", error);
                self.stats.media_errors += 1;
                self.element_trusted = false;
                self.dispatcher.emit_event(PlaybackEvent::MediaError(error));
            }
            MediaEvent::Recovered => {
                log::info!("PlaybackController: Element recovered");
                self.element_trusted = true;
            }
        }
    }

    // =========================================================================
    // Tick pipeline
    // =========================================================================

    fn process_tick(&mut self, now: Instant, metadata: &FrameMetadata) {
        let virtual_time = self.clock.advance(now);
        if virtual_time >= self.clock.duration() {
            self.complete(now);
            return;
        }

        let segment = self.resolver.active_segment(virtual_time, now);
        let was_in_gap = self.synchronizer.in_gap();

        let input = match self.element.as_deref() {
            Some(element) => SyncInput {
                virtual_time,
                segment: segment.as_deref(),
                element_time: element.current_time(),
                element_paused: element.is_paused(),
                is_playing: self.state.is_playing(),
                playback_rate: self.clock.playback_rate(),
                frame_interval: self.frame_interval,
                element_trusted: self.element_trusted,
                now,
            },
            None => return,
        };
        let action = self.synchronizer.evaluate(&input);
        log::trace!(
            "PlaybackController: tick v={:.3}s media={:.3}s -> {:?}",
            virtual_time,
            metadata.media_time,
            action
        );
        self.apply_action(action);
        self.note_gap_transition(was_in_gap, virtual_time, segment.as_deref());

        self.current_segment = segment;
        self.dispatcher
            .queue_frame(virtual_time, metadata.media_time, self.current_segment.as_ref());
        self.dispatcher.queue_renderer_seek(virtual_time);
        self.dispatcher.queue_time_update(virtual_time);
        self.dispatcher.flush(now, false);
    }

    fn apply_action(&mut self, action: SyncAction) {
        match action {
            SyncAction::None => {}
            SyncAction::Seek { target, reason } => {
                log::debug!("PlaybackController: {:?} seek to {:.3}s", reason, target);
                match reason {
                    SeekReason::Transition => self.stats.transition_seeks += 1,
                    SeekReason::LargeDrift => self.stats.large_drift_seeks += 1,
                    SeekReason::Drift => self.stats.drift_seeks += 1,
                    SeekReason::Explicit => self.stats.explicit_seeks += 1,
                }
                self.seek_element(target);
            }
            SyncAction::PauseForGap => {
                log::debug!("PlaybackController: Gap reached, pausing element");
                self.stats.gap_pauses += 1;
                if let Some(element) = self.element.as_deref_mut() {
                    element.pause();
                }
            }
            SyncAction::Resume { target } => {
                log::debug!("PlaybackController: Leaving gap, resuming at {:.3}s", target);
                self.stats.gap_resumes += 1;
                self.seek_element(target);
                self.request_native_play();
            }
        }
    }

    fn complete(&mut self, now: Instant) {
        if !self.state.is_playing() {
            return;
        }

        let duration = self.clock.duration();
        log::info!("PlaybackController: Reached end of timeline ({:.2}s)", duration);

        self.clock.pause(now);
        self.state = PlaybackState::Ended;
        self.is_playing = false;
        self.pending_play = None;
        self.stop_loop();
        if let Some(element) = self.element.as_deref_mut() {
            element.pause();
        }

        self.dispatcher.queue_time_update(duration);
        self.dispatcher.flush(now, true);
        self.dispatcher.emit_event(PlaybackEvent::Pause { virtual_time: duration });
        self.dispatcher.emit_event(PlaybackEvent::Ended { virtual_time: duration });
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Maps `virtual_time` exactly onto the element, pausing it in a gap and
    /// resuming it when playback should continue.
    fn sync_element_exact(&mut self, virtual_time: f64, now: Instant) {
        let was_in_gap = self.synchronizer.in_gap();
        let segment = self.resolver.active_segment(virtual_time, now);
        self.synchronizer.note_explicit_seek(segment.as_deref(), now);

        match segment.as_deref() {
            Some(seg) => {
                self.stats.explicit_seeks += 1;
                self.seek_element(seg.map_to_real(virtual_time));
                let paused = self.element.as_deref().map_or(false, |e| e.is_paused());
                if self.state.is_playing() && paused {
                    self.request_native_play();
                }
            }
            None => {
                if let Some(element) = self.element.as_deref_mut() {
                    if !element.is_paused() {
                        element.pause();
                    }
                }
            }
        }

        self.note_gap_transition(was_in_gap, virtual_time, segment.as_deref());
        self.current_segment = segment;
    }

    fn seek_element(&mut self, real_time: f64) {
        let Some(element) = self.element.as_deref_mut() else {
            return;
        };
        element.set_current_time(real_time);
        if self.internal_seeks.len() == MAX_INTERNAL_SEEKS {
            self.internal_seeks.pop_front();
        }
        self.internal_seeks.push_back(real_time);
    }

    fn request_native_play(&mut self) {
        if let Some(element) = self.element.as_deref_mut() {
            self.pending_play = Some(element.play());
        }
    }

    /// Polls the outstanding play request without blocking.
    fn observe_play_request(&mut self, now: Instant) {
        let Some(request) = self.pending_play.as_mut() else {
            return;
        };
        match request.try_recv() {
            Ok(Ok(())) => self.pending_play = None,
            Ok(Err(error)) => {
                self.pending_play = None;
                self.handle_play_rejection(error, now);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => {
                log::debug!("PlaybackController: Play request dropped by the element");
                self.pending_play = None;
            }
        }
    }

    fn handle_play_rejection(&mut self, error: MediaError, now: Instant) {
        log::warn!("PlaybackController: Play request rejected: {}", error);
        self.stats.play_rejections += 1;

        let element_paused = self.element.as_deref().map_or(true, |e| e.is_paused());
        self.is_playing = !element_paused;
        if element_paused && self.state.is_playing() {
            self.enter_paused(now);
        }
        self.dispatcher.emit_event(PlaybackEvent::PlayRejected(error));
    }

    fn enter_paused(&mut self, now: Instant) {
        let virtual_time = self.clock.advance(now);
        log::info!("PlaybackController: Pause at {:.2}s", virtual_time);

        self.clock.pause(now);
        self.state = PlaybackState::Paused;
        self.is_playing = false;
        self.pending_play = None;
        self.stop_loop();
        if let Some(element) = self.element.as_deref_mut() {
            element.pause();
        }
        // A batch held by the coalescing window belongs to the playing turn
        self.dispatcher.flush(now, true);
        self.dispatcher.emit_event(PlaybackEvent::Pause { virtual_time });
    }

    /// An explicit reposition away from the end turns `Ended` into `Paused`.
    fn leave_ended(&mut self, virtual_time: f64) {
        if self.state == PlaybackState::Ended && virtual_time < self.duration() {
            self.state = PlaybackState::Paused;
        }
    }

    fn note_gap_transition(&mut self, was_in_gap: bool, virtual_time: f64, segment: Option<&VirtualSegment>) {
        match (was_in_gap, segment) {
            (false, None) => self
                .dispatcher
                .emit_event(PlaybackEvent::GapEntered { virtual_time }),
            (true, Some(segment)) => self.dispatcher.emit_event(PlaybackEvent::GapLeft {
                segment_id: segment.id.clone(),
            }),
            _ => {}
        }
    }

    fn reconcile_external_seek(&mut self, real_time: f64) {
        if let Some(index) = self
            .internal_seeks
            .iter()
            .position(|t| (t - real_time).abs() < SEEK_ECHO_EPSILON)
        {
            self.internal_seeks.drain(..=index);
            return;
        }

        let now = self.time_source.now();
        let mapped = self.mapper.to_virtual(self.resolver.timeline(), real_time);
        if !mapped.is_valid {
            // Landed in a cut region: put the element back where the timeline is
            log::debug!("PlaybackController: External seek to cut region {:.3}s, snapping back", real_time);
            let virtual_time = self.clock.advance(now);
            self.sync_element_exact(virtual_time, now);
            return;
        }

        let virtual_time = mapped.virtual_time.clamp(0.0, self.duration());
        log::debug!(
            "PlaybackController: External seek r={:.3}s -> v={:.3}s",
            real_time,
            virtual_time
        );
        self.stats.external_seeks += 1;

        let was_in_gap = self.synchronizer.in_gap();
        self.clock.seek(virtual_time, now);
        self.leave_ended(virtual_time);
        self.resolver.invalidate();
        let segment = self.resolver.active_segment(virtual_time, now);
        self.synchronizer.note_explicit_seek(segment.as_deref(), now);
        self.note_gap_transition(was_in_gap, virtual_time, segment.as_deref());
        let paused = self.element.as_deref().map_or(false, |e| e.is_paused());
        if segment.is_some() && self.state.is_playing() && paused {
            // Scrubbed out of a gap while playing
            self.stats.gap_resumes += 1;
            self.request_native_play();
        }
        self.current_segment = segment;

        self.dispatcher.discard_pending_frame();
        self.dispatcher.queue_renderer_seek(virtual_time);
        self.dispatcher.queue_time_update(virtual_time);
        self.dispatcher.flush(now, true);
        self.dispatcher.emit_event(PlaybackEvent::Seek { virtual_time });
    }

    fn start_loop(&mut self) {
        self.last_tick_at = None;
        if let (Some(scheduler), Some(element)) = (self.scheduler.as_mut(), self.element.as_deref_mut()) {
            scheduler.start(element);
        }
    }

    fn stop_loop(&mut self) {
        if let (Some(scheduler), Some(element)) = (self.scheduler.as_mut(), self.element.as_deref_mut()) {
            scheduler.stop(element);
        }
    }

    fn reschedule(&mut self) {
        if let (Some(scheduler), Some(element)) = (self.scheduler.as_mut(), self.element.as_deref_mut()) {
            scheduler.end_frame(element);
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        log::debug!("PlaybackController dropping");
        self.detach_video();
    }
}

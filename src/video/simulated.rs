// =============================================================================
// SIMULATED MEDIA ELEMENT
// =============================================================================
//
// A software stand-in for a real video element. It advances its own position
// when told how much wall-clock time passed, records every seek/play/pause the
// engine issues, and can be configured to reject play requests or to expose a
// native per-frame callback.
//
// Used by the headless demo binary and by the controller tests.
//
// =============================================================================

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::core::MediaError;
use crate::video::element::{
    resolved_play_request, CallbackHandle, FrameMetadata, MediaElement, PlayRequest,
};

#[derive(Debug)]
pub struct SimulatedState {
    pub current_time: f64,
    pub duration: f64,
    pub paused: bool,
    pub playback_rate: f64,
    pub width: u32,
    pub height: u32,
    pub supports_frame_callbacks: bool,
    pub error: Option<MediaError>,
    /// When set, every play request is rejected with this error
    pub reject_play: Option<MediaError>,
    /// When set, play requests stay unresolved until `resolve_play` is called
    pub defer_play: bool,
    pub seek_log: Vec<f64>,
    pub play_calls: u32,
    pub pause_calls: u32,
    pub presented_frames: u64,
    pub callback_requests: u32,
    pub callback_cancels: u32,
    pending_callback: Option<CallbackHandle>,
    next_callback: u64,
    deferred_play: Option<oneshot::Sender<Result<(), MediaError>>>,
}

/// The element half, handed to the controller.
pub struct SimulatedElement {
    state: Rc<RefCell<SimulatedState>>,
}

/// The host half, kept by whoever drives the simulation.
#[derive(Clone)]
pub struct SimulatedHandle {
    state: Rc<RefCell<SimulatedState>>,
}

impl SimulatedElement {
    pub fn new(duration: f64) -> (Self, SimulatedHandle) {
        let state = Rc::new(RefCell::new(SimulatedState {
            current_time: 0.0,
            duration,
            paused: true,
            playback_rate: 1.0,
            width: 1280,
            height: 720,
            supports_frame_callbacks: false,
            error: None,
            reject_play: None,
            defer_play: false,
            seek_log: Vec::new(),
            play_calls: 0,
            pause_calls: 0,
            presented_frames: 0,
            callback_requests: 0,
            callback_cancels: 0,
            pending_callback: None,
            next_callback: 1,
            deferred_play: None,
        }));

        (
            Self { state: Rc::clone(&state) },
            SimulatedHandle { state },
        )
    }

    pub fn with_frame_callbacks(duration: f64) -> (Self, SimulatedHandle) {
        let (element, handle) = Self::new(duration);
        handle.state.borrow_mut().supports_frame_callbacks = true;
        (element, handle)
    }
}

impl MediaElement for SimulatedElement {
    fn current_time(&self) -> f64 {
        self.state.borrow().current_time
    }

    fn set_current_time(&mut self, real_time: f64) {
        let mut state = self.state.borrow_mut();
        state.current_time = real_time.clamp(0.0, state.duration);
        state.seek_log.push(real_time);
    }

    fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    fn play(&mut self) -> PlayRequest {
        let mut state = self.state.borrow_mut();
        state.play_calls += 1;

        if let Some(error) = state.reject_play.clone() {
            return resolved_play_request(Err(error));
        }

        state.paused = false;
        if state.defer_play {
            let (tx, rx) = oneshot::channel();
            state.deferred_play = Some(tx);
            return rx;
        }
        resolved_play_request(Ok(()))
    }

    fn pause(&mut self) {
        let mut state = self.state.borrow_mut();
        state.pause_calls += 1;
        state.paused = true;
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.state.borrow_mut().playback_rate = rate;
    }

    fn video_size(&self) -> (u32, u32) {
        let state = self.state.borrow();
        (state.width, state.height)
    }

    fn error(&self) -> Option<MediaError> {
        self.state.borrow().error.clone()
    }

    fn supports_frame_callbacks(&self) -> bool {
        self.state.borrow().supports_frame_callbacks
    }

    fn request_video_frame_callback(&mut self) -> Option<CallbackHandle> {
        let mut state = self.state.borrow_mut();
        if !state.supports_frame_callbacks {
            return None;
        }
        state.callback_requests += 1;
        let handle = CallbackHandle(state.next_callback);
        state.next_callback += 1;
        state.pending_callback = Some(handle);
        Some(handle)
    }

    fn cancel_video_frame_callback(&mut self, handle: CallbackHandle) {
        let mut state = self.state.borrow_mut();
        if state.pending_callback == Some(handle) {
            state.pending_callback = None;
            state.callback_cancels += 1;
        }
    }
}

impl SimulatedHandle {
    /// Moves the playhead as native playback would over `elapsed`.
    pub fn advance(&self, elapsed: Duration) {
        let mut state = self.state.borrow_mut();
        if state.paused {
            return;
        }
        let next = state.current_time + elapsed.as_secs_f64() * state.playback_rate;
        state.current_time = next.min(state.duration);
        state.presented_frames += 1;
        if state.current_time >= state.duration {
            state.paused = true;
        }
    }

    /// Fires the registered native frame callback, if any.
    pub fn take_frame_callback(&self, now: Instant) -> Option<FrameMetadata> {
        let mut state = self.state.borrow_mut();
        state.pending_callback.take()?;
        Some(FrameMetadata {
            expected_display_time: now,
            width: state.width,
            height: state.height,
            media_time: state.current_time,
            presented_frames: state.presented_frames,
        })
    }

    /// Resolves a deferred play request.
    pub fn resolve_play(&self, result: Result<(), MediaError>) {
        let mut state = self.state.borrow_mut();
        if result.is_err() {
            state.paused = true;
        }
        if let Some(tx) = state.deferred_play.take() {
            let _ = tx.send(result);
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut SimulatedState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn current_time(&self) -> f64 {
        self.state.borrow().current_time
    }

    /// Moves the playhead without recording an engine seek.
    pub fn set_position(&self, real_time: f64) {
        self.state.borrow_mut().current_time = real_time;
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    pub fn seek_count(&self) -> usize {
        self.state.borrow().seek_log.len()
    }

    pub fn last_seek(&self) -> Option<f64> {
        self.state.borrow().seek_log.last().copied()
    }

    pub fn has_pending_callback(&self) -> bool {
        self.state.borrow().pending_callback.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_only_while_playing() {
        let (mut element, handle) = SimulatedElement::new(10.0);

        handle.advance(Duration::from_secs(1));
        assert_eq!(handle.current_time(), 0.0);

        let _ = element.play();
        handle.advance(Duration::from_millis(500));
        assert!((handle.current_time() - 0.5).abs() < 1e-9);

        element.pause();
        handle.advance(Duration::from_secs(1));
        assert!((handle.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_play_keeps_element_paused() {
        let (mut element, handle) = SimulatedElement::new(10.0);
        handle.with_state(|s| s.reject_play = Some(MediaError::NotAllowed("autoplay".into())));

        let mut request = element.play();

        assert!(element.is_paused());
        assert!(matches!(request.try_recv(), Ok(Err(MediaError::NotAllowed(_)))));
    }

    #[test]
    fn test_frame_callback_is_one_shot() {
        let (mut element, handle) = SimulatedElement::with_frame_callbacks(10.0);
        let now = Instant::now();

        assert!(handle.take_frame_callback(now).is_none());
        let registered = element.request_video_frame_callback();
        assert!(registered.is_some());

        assert!(handle.take_frame_callback(now).is_some());
        assert!(handle.take_frame_callback(now).is_none());
    }

    #[test]
    fn test_seeks_are_recorded_and_clamped() {
        let (mut element, handle) = SimulatedElement::new(10.0);

        element.set_current_time(4.0);
        element.set_current_time(25.0);

        assert_eq!(handle.seek_count(), 2);
        assert_eq!(handle.current_time(), 10.0);
    }
}

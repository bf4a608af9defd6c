//! Playback graph manager: owns the single loaded session, its element and
//! resource handle, the volume envelope and A-B loop enforcement.

mod looping;

pub use looping::{LoopSpec, LOOP_EPSILON};

use std::fmt;

use tracing::{debug, info, warn};

use crate::{
    config::AudioConfig,
    graph::{AudioGraph, ContextState, SILENCE},
    tap::SpectralTap,
    ElementEvent, ElementId, MediaFile, MediaHost, MediaKind, ResourceHandle, Result,
};

/// Lifecycle of the loaded session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
}

type ReadyCallback = Box<dyn FnOnce(f64)>;

struct PlaybackSession {
    element: ElementId,
    kind: MediaKind,
    name: String,
    state: SessionState,
    playing: bool,
    on_ready: Option<ReadyCallback>,
}

pub struct PlaybackManager<H: MediaHost> {
    host: H,
    graph: AudioGraph,
    config: AudioConfig,
    audio_element: Option<ElementId>,
    video_element: Option<ElementId>,
    session: Option<PlaybackSession>,
    handle: Option<ResourceHandle>,
    volume: f32,
    rate: f64,
    loop_spec: LoopSpec,
    pending_pause: Option<f64>,
    on_ended: Option<Box<dyn FnMut()>>,
}

impl<H: MediaHost> PlaybackManager<H> {
    pub fn new(host: H, graph: AudioGraph, config: AudioConfig) -> Self {
        Self {
            host,
            graph,
            volume: config.volume.clamp(0.0, 1.0),
            rate: sanitize_rate(config.playback_rate as f64),
            config,
            audio_element: None,
            video_element: None,
            session: None,
            handle: None,
            loop_spec: LoopSpec::default(),
            pending_pause: None,
            on_ended: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// Registers the externally owned video surface. A session playing on
    /// the previous surface is torn down, but that surface keeps its source
    /// node: the host still owns it and may hand it back later.
    pub fn set_video_element(&mut self, element: Option<ElementId>) {
        if self.video_element == element {
            return;
        }
        if let Some(old) = self.video_element.take() {
            if self.current_element() == Some(old) {
                self.teardown();
            }
            self.host.set_active(old, false);
        }
        if let Some(new) = element {
            self.host.set_muted(new, false);
        }
        self.video_element = element;
    }

    /// Forgets an element the host has destroyed. The host must never reuse
    /// its id, since a fresh source node will be created if it reappears.
    pub fn element_destroyed(&mut self, element: ElementId) {
        if self.current_element() == Some(element) {
            self.teardown();
        }
        if self.video_element == Some(element) {
            self.video_element = None;
        }
        if self.audio_element == Some(element) {
            self.audio_element = None;
        }
        self.graph.evict(element);
    }

    /// Replaces the current session with `file`. `on_ready` receives the
    /// duration once the host has loaded the metadata.
    pub fn load_file(
        &mut self,
        file: MediaFile,
        on_ready: impl FnOnce(f64) + 'static,
    ) -> Result<()> {
        self.teardown();

        let kind = file.kind();
        let element = match (kind, self.video_element) {
            (MediaKind::Video, Some(video)) => video,
            _ => self.ensure_audio_element()?,
        };

        let handle = self.host.create_resource_handle(&file)?;
        self.handle = Some(handle.clone());

        if Some(element) == self.video_element {
            self.host.set_active(element, true);
        }
        self.host.pause(element);
        self.host.set_source(element, Some(&handle));
        self.host.set_looping(element, false);
        self.host.set_current_time(element, 0.0);
        self.host.set_playback_rate(element, self.rate);
        self.host.set_element_volume(element, 1.0);
        self.host.set_muted(element, false);

        if let Err(err) = self.graph.route(element) {
            warn!(%err, ?element, "could not route media into the graph");
            self.abandon_load(element);
            return Err(err);
        }
        self.host.load(element);

        info!(name = %file.name, ?kind, ?element, "loading media");
        self.session = Some(PlaybackSession {
            element,
            kind,
            name: file.name,
            state: SessionState::Loading,
            playing: false,
            on_ready: Some(Box::new(on_ready)),
        });
        Ok(())
    }

    /// Drains host events: fires the deferred pause, enforces the loop window,
    /// reports readiness and natural ends. Call once per frame.
    pub fn poll(&mut self) {
        let Some(element) = self.current_element() else {
            return;
        };

        if let Some(deadline) = self.pending_pause {
            let now = self.graph.current_time().unwrap_or(f64::INFINITY);
            if now >= deadline {
                self.finish_pause(element);
            }
        }

        let mut ended = false;
        for event in self.host.take_events(element) {
            match event {
                ElementEvent::LoadedMetadata => self.on_metadata(element),
                ElementEvent::TimeUpdate => {}
                ElementEvent::Ended => ended = true,
            }
        }

        if ended {
            self.on_end_of_media(element);
        } else {
            self.enforce_loop(element);
        }
    }

    /// Fades in and starts playback. A host refusal is logged and returned;
    /// the session stays not playing and the call may be retried.
    pub fn play(&mut self) -> Result<()> {
        let Some(element) = self.current_element() else {
            return Ok(());
        };
        self.pending_pause = None;

        if let Err(err) = self.graph.resume_if_suspended() {
            warn!(%err, "could not resume audio context");
        }
        self.graph.ramp_gain(self.volume, self.config.fade_in);

        match self.host.play(element) {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.playing = true;
                    session.state = SessionState::Playing;
                }
                debug!(?element, "playback started");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "playback request rejected");
                self.graph.ramp_gain(SILENCE, 0.0);
                if let Some(session) = self.session.as_mut() {
                    session.playing = false;
                }
                Err(err)
            }
        }
    }

    /// Fades out, then pauses once the fade window has elapsed.
    pub fn pause(&mut self) {
        let Some(element) = self.current_element() else {
            return;
        };
        if self.pending_pause.is_some() {
            return;
        }

        let running = self
            .graph
            .context()
            .is_some_and(|context| context.state() == ContextState::Running);
        if !running || self.config.fade_out <= 0.0 || self.host.is_paused(element) {
            self.graph.ramp_gain(SILENCE, 0.0);
            self.finish_pause(element);
            return;
        }

        self.pending_pause = self.graph.ramp_gain(SILENCE, self.config.fade_out);
        debug!(deadline = ?self.pending_pause, "pause scheduled after fade");
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        if self.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Playing flag set, element running, and no fade-out pending.
    pub fn is_playing(&self) -> bool {
        match &self.session {
            Some(session) => {
                session.playing
                    && self.pending_pause.is_none()
                    && !self.host.is_paused(session.element)
                    && !self.host.is_ended(session.element)
            }
            None => false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Empty, |session| session.state)
    }

    pub fn kind(&self) -> Option<MediaKind> {
        self.session.as_ref().map(|session| session.kind)
    }

    pub fn title(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.name.as_str())
    }

    pub fn current_element(&self) -> Option<ElementId> {
        self.session.as_ref().map(|session| session.element)
    }

    /// Context time at which a scheduled pause takes effect.
    pub fn pending_pause(&self) -> Option<f64> {
        self.pending_pause
    }

    /// Seeks to `ratio` of the duration, clamped into an active loop.
    pub fn seek_to(&mut self, ratio: f64) {
        let Some(element) = self.current_element() else {
            return;
        };
        let duration = self.duration();
        if duration <= 0.0 || !ratio.is_finite() {
            return;
        }
        let target = duration * ratio.clamp(0.0, 1.0);
        self.seek_element(element, self.loop_spec.clamp_seek(target));
    }

    pub fn seek_relative(&mut self, delta: f64) {
        let Some(element) = self.current_element() else {
            return;
        };
        let duration = self.duration();
        if duration <= 0.0 || !delta.is_finite() {
            return;
        }
        let current = finite_or_zero(self.host.current_time(element));
        let target = (current + delta).clamp(0.0, duration);
        self.seek_element(element, self.loop_spec.clamp_seek(target));
    }

    /// Position in seconds; 0 when nothing is loaded. Snaps back into an
    /// active loop window first.
    pub fn current_time(&mut self) -> f64 {
        let Some(element) = self.current_element() else {
            return 0.0;
        };
        let time = finite_or_zero(self.host.current_time(element));
        if self.is_running(element) {
            if let Some(target) = self.loop_spec.enforce(time) {
                self.host.set_current_time(element, target);
                return target;
            }
        }
        time
    }

    pub fn duration(&self) -> f64 {
        self.current_element()
            .map_or(0.0, |element| finite_or_zero(self.host.duration(element)))
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets the target volume; audible sessions ramp to it.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        if self.is_playing() {
            self.graph.ramp_gain(self.volume, self.config.volume_ramp);
        }
    }

    pub fn playback_rate(&self) -> f64 {
        self.rate
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        self.rate = sanitize_rate(rate);
        if let Some(element) = self.current_element() {
            self.host.set_playback_rate(element, self.rate);
        }
    }

    pub fn set_loop_points(&mut self, a: Option<f64>, b: Option<f64>) {
        if self.loop_spec.set_points(a, b) {
            warn!(?a, ?b, "loop end must come after loop start; end cleared");
        }
    }

    /// Sets the loop start, dropping an end that no longer follows it.
    pub fn set_loop_a(&mut self, a: f64) {
        if self.loop_spec.set_a(a) {
            warn!(a, "loop start moved past loop end; end cleared");
        }
    }

    /// Sets the loop end unless it would not follow the start.
    pub fn set_loop_b(&mut self, b: f64) {
        if self.loop_spec.set_b(b) {
            warn!(b, "loop end before loop start ignored");
        }
    }

    pub fn set_ab_loop_enabled(&mut self, enabled: bool) {
        self.loop_spec.enabled = enabled;
    }

    pub fn clear_loop(&mut self) {
        self.loop_spec.clear();
    }

    pub fn loop_state(&self) -> LoopSpec {
        self.loop_spec
    }

    /// Spectral tap of the shared graph; `None` before any context exists.
    pub fn analyser(&mut self) -> Option<SpectralTap<'_>> {
        self.graph.tap()
    }

    pub fn set_on_ended(&mut self, callback: impl FnMut() + 'static) {
        self.on_ended = Some(Box::new(callback));
    }

    fn ensure_audio_element(&mut self) -> Result<ElementId> {
        if let Some(element) = self.audio_element {
            return Ok(element);
        }
        let element = self.host.create_audio_element()?;
        self.host.set_muted(element, false);
        debug!(?element, "created audio element");
        self.audio_element = Some(element);
        Ok(element)
    }

    /// Pauses, detaches and silences the current session and releases its
    /// resource handle.
    fn teardown(&mut self) {
        self.pending_pause = None;
        if let Some(session) = self.session.take() {
            let element = session.element;
            self.host.pause(element);
            self.host.set_source(element, None);
            self.host.load(element);
            self.host.take_events(element);
            if Some(element) == self.video_element {
                self.host.set_active(element, false);
            }
            self.graph.detach();
            self.graph.ramp_gain(SILENCE, 0.0);
            debug!(name = %session.name, "session torn down");
        }
        if let Some(handle) = self.handle.take() {
            self.host.release_resource_handle(&handle);
            debug!(handle = %handle.0, "released resource handle");
        }
        self.loop_spec = LoopSpec::default();
    }

    fn finish_pause(&mut self, element: ElementId) {
        self.pending_pause = None;
        self.host.pause(element);
        if let Some(session) = self.session.as_mut() {
            session.playing = false;
            if matches!(session.state, SessionState::Playing | SessionState::Ready) {
                session.state = SessionState::Paused;
            }
        }
        debug!(?element, "playback paused");
    }

    fn on_metadata(&mut self, element: ElementId) {
        let duration = finite_or_zero(self.host.duration(element));
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state == SessionState::Loading {
            session.state = SessionState::Ready;
        }
        info!(name = %session.name, duration, "media ready");
        if let Some(on_ready) = session.on_ready.take() {
            on_ready(duration);
        }
    }

    /// The element ran out of media. An active loop restarts it instead of
    /// ending the playthrough.
    fn on_end_of_media(&mut self, element: ElementId) {
        let playing = self.session.as_ref().is_some_and(|session| session.playing);
        let Some(target) = self.loop_spec.restart().filter(|_| playing) else {
            self.on_natural_end();
            return;
        };

        self.host.set_current_time(element, target);
        if self.pending_pause.is_some() {
            self.finish_pause(element);
            return;
        }
        match self.host.play(element) {
            Ok(()) => debug!(?element, target, "loop restarted at end of media"),
            Err(err) => {
                warn!(%err, "could not restart the loop");
                self.on_natural_end();
            }
        }
    }

    /// Undoes the element setup of a load that failed after binding.
    fn abandon_load(&mut self, element: ElementId) {
        self.host.set_source(element, None);
        self.host.load(element);
        self.host.take_events(element);
        if Some(element) == self.video_element {
            self.host.set_active(element, false);
        }
        if let Some(handle) = self.handle.take() {
            self.host.release_resource_handle(&handle);
            debug!(handle = %handle.0, "released resource handle of failed load");
        }
    }

    fn on_natural_end(&mut self) {
        self.pending_pause = None;
        if let Some(session) = self.session.as_mut() {
            session.playing = false;
            session.state = SessionState::Ended;
            info!(name = %session.name, "playback ended");
        }
        if let Some(on_ended) = self.on_ended.as_mut() {
            on_ended();
        }
    }

    fn enforce_loop(&mut self, element: ElementId) {
        if !self.is_running(element) {
            return;
        }
        let time = finite_or_zero(self.host.current_time(element));
        if let Some(target) = self.loop_spec.enforce(time) {
            self.host.set_current_time(element, target);
        }
    }

    fn seek_element(&mut self, element: ElementId, target: f64) {
        self.host.set_current_time(element, target);
        if let Some(session) = self.session.as_mut() {
            if session.state == SessionState::Ended {
                session.state = SessionState::Ready;
            }
        }
    }

    fn is_running(&self, element: ElementId) -> bool {
        let playing = self.session.as_ref().is_some_and(|session| session.playing);
        playing && !self.host.is_paused(element)
    }
}

impl<H: MediaHost> Drop for PlaybackManager<H> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<H: MediaHost> fmt::Debug for PlaybackManager<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackManager")
            .field("state", &self.state())
            .field("element", &self.current_element())
            .field("volume", &self.volume)
            .field("rate", &self.rate)
            .field("loop", &self.loop_spec)
            .field("pending_pause", &self.pending_pause)
            .field("graph", &self.graph)
            .finish()
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

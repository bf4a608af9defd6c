//! Simulated platform: a virtual-clock media host and processing context that
//! share one world. Drives the CLI and the transport tests.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
    f64::consts::TAU,
    rc::Rc,
};

use tracing::debug;

use crate::{
    graph::{automation::ParamTimeline, AudioContext, ContextFactory, ContextState, NodeId},
    tap::ByteAnalyser,
    AuroraError, ElementEvent, ElementId, MediaFile, MediaHost, ResourceHandle, Result,
};

pub const SAMPLE_RATE: f64 = 48_000.0;
const TIME_UPDATE_INTERVAL: f64 = 0.25;

/// Synthetic programme material: a kick on every beat, an off-beat hat and a
/// sustained chord.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTrack {
    pub duration: f64,
    pub bpm: f64,
}

impl Default for SimTrack {
    fn default() -> Self {
        Self {
            duration: 30.0,
            bpm: 120.0,
        }
    }
}

impl SimTrack {
    pub fn new(duration: f64, bpm: f64) -> Self {
        Self { duration, bpm }
    }

    pub fn sample(&self, t: f64) -> f32 {
        if !(0.0..self.duration).contains(&t) {
            return 0.0;
        }
        let beat = 60.0 / self.bpm.max(1.0);

        let since_kick = t % beat;
        let kick_env = (-since_kick * 18.0).exp();
        let kick = (TAU * (50.0 + 90.0 * kick_env) * since_kick).sin() * kick_env;

        let since_hat = (t + beat * 0.5) % beat;
        let hat_env = (-since_hat * 60.0).exp();
        let hat = (TAU * 7_000.0 * t).sin() * (TAU * 9_100.0 * t).sin() * hat_env;

        let pad = (TAU * 220.0 * t).sin()
            + 0.6 * (TAU * 277.18 * t).sin()
            + 0.5 * (TAU * 329.63 * t).sin();

        ((0.8 * kick + 0.3 * hat + 0.12 * pad) * 0.6) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementRole {
    Audio,
    VideoSurface,
}

#[derive(Debug)]
struct SimElement {
    role: ElementRole,
    source: Option<ResourceHandle>,
    track: Option<SimTrack>,
    metadata_pending: bool,
    paused: bool,
    ended: bool,
    time: f64,
    rate: f64,
    volume: f64,
    muted: bool,
    looping: bool,
    active: bool,
    since_update: f64,
    events: Vec<ElementEvent>,
}

impl SimElement {
    fn new(role: ElementRole) -> Self {
        Self {
            role,
            source: None,
            track: None,
            metadata_pending: false,
            paused: true,
            ended: false,
            time: 0.0,
            rate: 1.0,
            volume: 1.0,
            muted: false,
            looping: false,
            active: false,
            since_update: 0.0,
            events: Vec::new(),
        }
    }

    fn loaded_track(&self) -> Option<SimTrack> {
        if self.metadata_pending {
            None
        } else {
            self.track
        }
    }

    fn is_sounding(&self) -> bool {
        !self.paused && !self.muted && self.loaded_track().is_some()
    }

    fn advance(&mut self, dt: f64) {
        if self.metadata_pending && self.track.is_some() {
            self.metadata_pending = false;
            self.events.push(ElementEvent::LoadedMetadata);
        }
        let Some(track) = self.loaded_track() else {
            return;
        };
        if self.paused {
            return;
        }

        self.time += dt * self.rate;
        self.since_update += dt;
        if self.time >= track.duration {
            if self.looping && track.duration > 0.0 {
                self.time %= track.duration;
            } else {
                self.time = track.duration;
                self.paused = true;
                self.ended = true;
                self.events.push(ElementEvent::TimeUpdate);
                self.events.push(ElementEvent::Ended);
                return;
            }
        }
        if self.since_update >= TIME_UPDATE_INTERVAL {
            self.since_update = 0.0;
            self.events.push(ElementEvent::TimeUpdate);
        }
    }
}

#[derive(Debug)]
enum SimNode {
    Source(ElementId),
    Gain(ParamTimeline),
    Analyser(Box<ByteAnalyser>),
}

#[derive(Debug)]
struct SimWorld {
    clock: f64,
    next_id: u64,
    elements: BTreeMap<ElementId, SimElement>,
    tracks: HashMap<String, SimTrack>,
    handles: HashMap<String, String>,
    handles_created: usize,
    require_gesture: bool,
    gesture_granted: bool,
    contexts_created: usize,
    context_state: ContextState,
    context_time: f64,
    nodes: BTreeMap<NodeId, SimNode>,
    edges: HashSet<(NodeId, NodeId)>,
    destination: HashSet<NodeId>,
    sources_by_element: HashMap<ElementId, NodeId>,
    duplicate_source_attempts: usize,
}

impl SimWorld {
    fn new() -> Self {
        Self {
            clock: 0.0,
            next_id: 1,
            elements: BTreeMap::new(),
            tracks: HashMap::new(),
            handles: HashMap::new(),
            handles_created: 0,
            require_gesture: false,
            gesture_granted: false,
            contexts_created: 0,
            context_state: ContextState::Suspended,
            context_time: 0.0,
            nodes: BTreeMap::new(),
            edges: HashSet::new(),
            destination: HashSet::new(),
            sources_by_element: HashMap::new(),
            duplicate_source_attempts: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn add_element(&mut self, role: ElementRole) -> ElementId {
        let id = ElementId(self.next_id());
        self.elements.insert(id, SimElement::new(role));
        id
    }

    fn add_node(&mut self, node: SimNode) -> NodeId {
        let id = NodeId(self.next_id());
        self.nodes.insert(id, node);
        id
    }

    fn advance(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        self.clock += dt;
        if self.context_state == ContextState::Running {
            self.context_time += dt;
        }
        for element in self.elements.values_mut() {
            element.advance(dt);
        }
    }

    fn gain_at_now(&self, gain: NodeId) -> f32 {
        match self.nodes.get(&gain) {
            Some(SimNode::Gain(timeline)) => timeline.value_at(self.context_time),
            _ => 0.0,
        }
    }

    /// The last `len` samples reaching `analyser` through its gain stages.
    fn signal_into(&self, analyser: NodeId, len: usize) -> Vec<f32> {
        let mut block = vec![0.0f32; len];
        let gains = self
            .edges
            .iter()
            .filter(|(from, to)| {
                *to == analyser && matches!(self.nodes.get(from), Some(SimNode::Gain(_)))
            })
            .map(|(from, _)| *from);

        for gain in gains {
            let level = self.gain_at_now(gain);
            let sources = self.edges.iter().filter(|(_, to)| *to == gain);
            for (source, _) in sources {
                let Some(SimNode::Source(element_id)) = self.nodes.get(source) else {
                    continue;
                };
                let Some(element) = self.elements.get(element_id) else {
                    continue;
                };
                let Some(track) = element.loaded_track() else {
                    continue;
                };
                if !element.is_sounding() {
                    continue;
                }
                let scale = level * element.volume as f32;
                for (i, sample) in block.iter_mut().enumerate() {
                    let offset = (len - 1 - i) as f64 / SAMPLE_RATE;
                    *sample += track.sample(element.time - offset) * scale;
                }
            }
        }
        block
    }

    fn with_gain(&mut self, gain: NodeId, apply: impl FnOnce(&mut ParamTimeline)) {
        if let Some(SimNode::Gain(timeline)) = self.nodes.get_mut(&gain) {
            apply(timeline);
        }
    }

    fn analyser_mut(&mut self, node: NodeId) -> Option<&mut ByteAnalyser> {
        match self.nodes.get_mut(&node) {
            Some(SimNode::Analyser(analyser)) => Some(analyser.as_mut()),
            _ => None,
        }
    }
}

/// Cheaply clonable handle on the simulated platform.
#[derive(Clone)]
pub struct SimHost {
    world: Rc<RefCell<SimWorld>>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    pub fn new() -> Self {
        Self {
            world: Rc::new(RefCell::new(SimWorld::new())),
        }
    }

    /// Associates a locator with the programme it should play.
    pub fn register_track(&self, locator: impl Into<String>, track: SimTrack) {
        self.world.borrow_mut().tracks.insert(locator.into(), track);
    }

    /// When set, `play` is refused until [`SimHost::grant_user_gesture`].
    pub fn require_user_gesture(&self, required: bool) {
        self.world.borrow_mut().require_gesture = required;
    }

    pub fn grant_user_gesture(&self) {
        self.world.borrow_mut().gesture_granted = true;
    }

    /// Creates an externally owned video surface.
    pub fn add_video_surface(&self) -> ElementId {
        self.world.borrow_mut().add_element(ElementRole::VideoSurface)
    }

    /// Advances the virtual clock by `dt` seconds.
    pub fn advance(&self, dt: f64) {
        self.world.borrow_mut().advance(dt);
    }

    pub fn now(&self) -> f64 {
        self.world.borrow().clock
    }

    pub fn context_factory(&self) -> ContextFactory {
        let world = Rc::clone(&self.world);
        Box::new(move || {
            {
                let mut state = world.borrow_mut();
                state.contexts_created += 1;
                state.context_state = ContextState::Suspended;
            }
            debug!("simulated audio context opened");
            Ok(Box::new(SimContext {
                world: Rc::clone(&world),
            }) as Box<dyn AudioContext>)
        })
    }

    pub fn contexts_created(&self) -> usize {
        self.world.borrow().contexts_created
    }

    pub fn context_state(&self) -> ContextState {
        self.world.borrow().context_state
    }

    pub fn source_nodes_created(&self) -> usize {
        self.world.borrow().sources_by_element.len()
    }

    pub fn duplicate_source_attempts(&self) -> usize {
        self.world.borrow().duplicate_source_attempts
    }

    /// How many source nodes are currently connected to a gain stage.
    pub fn sources_feeding_gain(&self) -> usize {
        let world = self.world.borrow();
        let feeding = world
            .edges
            .iter()
            .filter(|(from, to)| {
                matches!(world.nodes.get(from), Some(SimNode::Source(_)))
                    && matches!(world.nodes.get(to), Some(SimNode::Gain(_)))
            })
            .count();
        feeding
    }

    pub fn live_handles(&self) -> usize {
        self.world.borrow().handles.len()
    }

    pub fn handles_created(&self) -> usize {
        self.world.borrow().handles_created
    }

    pub fn element_count(&self) -> usize {
        self.world.borrow().elements.len()
    }

    pub fn is_active(&self, element: ElementId) -> bool {
        self.read(element, |el| el.active).unwrap_or(false)
    }

    pub fn element_source(&self, element: ElementId) -> Option<ResourceHandle> {
        self.read(element, |el| el.source.clone()).flatten()
    }

    pub fn element_rate(&self, element: ElementId) -> f64 {
        self.read(element, |el| el.rate).unwrap_or(1.0)
    }

    pub fn is_audio_element(&self, element: ElementId) -> bool {
        self.read(element, |el| el.role == ElementRole::Audio)
            .unwrap_or(false)
    }

    fn read<T>(&self, element: ElementId, f: impl FnOnce(&SimElement) -> T) -> Option<T> {
        self.world.borrow().elements.get(&element).map(f)
    }

    fn write(&mut self, element: ElementId, f: impl FnOnce(&mut SimElement)) {
        if let Some(el) = self.world.borrow_mut().elements.get_mut(&element) {
            f(el);
        }
    }
}

impl MediaHost for SimHost {
    fn create_audio_element(&mut self) -> Result<ElementId> {
        Ok(self.world.borrow_mut().add_element(ElementRole::Audio))
    }

    fn create_resource_handle(&mut self, file: &MediaFile) -> Result<ResourceHandle> {
        if file.locator.trim().is_empty() {
            return Err(AuroraError::InvalidInput("resource has no locator"));
        }
        let mut world = self.world.borrow_mut();
        let handle = format!("blob:sim/{}", world.next_id());
        world.handles.insert(handle.clone(), file.locator.clone());
        world.handles_created += 1;
        Ok(ResourceHandle(handle))
    }

    fn release_resource_handle(&mut self, handle: &ResourceHandle) {
        self.world.borrow_mut().handles.remove(&handle.0);
    }

    fn set_source(&mut self, element: ElementId, handle: Option<&ResourceHandle>) {
        self.write(element, |el| {
            el.source = handle.cloned();
            el.track = None;
            el.metadata_pending = false;
            el.paused = true;
            el.ended = false;
            el.time = 0.0;
        });
    }

    fn load(&mut self, element: ElementId) {
        let mut world = self.world.borrow_mut();
        let track = world
            .elements
            .get(&element)
            .and_then(|el| el.source.as_ref())
            .and_then(|handle| world.handles.get(&handle.0))
            .map(|locator| world.tracks.get(locator).copied().unwrap_or_default());

        if let Some(el) = world.elements.get_mut(&element) {
            el.metadata_pending = track.is_some();
            el.track = track;
            el.paused = true;
            el.ended = false;
            el.time = 0.0;
            el.since_update = 0.0;
        }
    }

    fn play(&mut self, element: ElementId) -> Result<()> {
        let mut world = self.world.borrow_mut();
        if world.require_gesture && !world.gesture_granted {
            return Err(AuroraError::PlaybackRejected(
                "play() is not allowed before a user gesture".to_string(),
            ));
        }
        let Some(el) = world.elements.get_mut(&element) else {
            return Err(AuroraError::PlaybackRejected("unknown element".to_string()));
        };
        if el.track.is_none() {
            return Err(AuroraError::PlaybackRejected(
                "no supported source".to_string(),
            ));
        }
        if el.ended {
            el.time = 0.0;
        }
        el.paused = false;
        el.ended = false;
        Ok(())
    }

    fn pause(&mut self, element: ElementId) {
        self.write(element, |el| el.paused = true);
    }

    fn is_paused(&self, element: ElementId) -> bool {
        self.read(element, |el| el.paused).unwrap_or(true)
    }

    fn is_ended(&self, element: ElementId) -> bool {
        self.read(element, |el| el.ended).unwrap_or(false)
    }

    fn current_time(&self, element: ElementId) -> f64 {
        self.read(element, |el| el.time).unwrap_or(0.0)
    }

    fn set_current_time(&mut self, element: ElementId, seconds: f64) {
        self.write(element, |el| {
            let limit = el.loaded_track().map_or(0.0, |track| track.duration);
            el.time = seconds.clamp(0.0, limit);
            if el.time < limit {
                el.ended = false;
            }
        });
    }

    fn duration(&self, element: ElementId) -> f64 {
        self.read(element, |el| el.loaded_track().map_or(f64::NAN, |t| t.duration))
            .unwrap_or(f64::NAN)
    }

    fn set_playback_rate(&mut self, element: ElementId, rate: f64) {
        self.write(element, |el| el.rate = rate);
    }

    fn set_element_volume(&mut self, element: ElementId, volume: f64) {
        self.write(element, |el| el.volume = volume.clamp(0.0, 1.0));
    }

    fn set_muted(&mut self, element: ElementId, muted: bool) {
        self.write(element, |el| el.muted = muted);
    }

    fn set_looping(&mut self, element: ElementId, looping: bool) {
        self.write(element, |el| el.looping = looping);
    }

    fn set_active(&mut self, element: ElementId, active: bool) {
        self.write(element, |el| el.active = active);
    }

    fn take_events(&mut self, element: ElementId) -> Vec<ElementEvent> {
        self.world
            .borrow_mut()
            .elements
            .get_mut(&element)
            .map(|el| std::mem::take(&mut el.events))
            .unwrap_or_default()
    }
}

/// Processing-context face of the simulated world.
struct SimContext {
    world: Rc<RefCell<SimWorld>>,
}

impl AudioContext for SimContext {
    fn state(&self) -> ContextState {
        self.world.borrow().context_state
    }

    fn resume(&mut self) -> Result<()> {
        let mut world = self.world.borrow_mut();
        if world.context_state == ContextState::Closed {
            return Err(AuroraError::Context("context is closed".to_string()));
        }
        world.context_state = ContextState::Running;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.world.borrow().context_time
    }

    fn create_media_source(&mut self, element: ElementId) -> Result<NodeId> {
        let mut world = self.world.borrow_mut();
        if world.sources_by_element.contains_key(&element) {
            world.duplicate_source_attempts += 1;
            return Err(AuroraError::Context(
                "element is already connected to a source node".to_string(),
            ));
        }
        let node = world.add_node(SimNode::Source(element));
        world.sources_by_element.insert(element, node);
        Ok(node)
    }

    fn create_gain(&mut self) -> Result<NodeId> {
        Ok(self
            .world
            .borrow_mut()
            .add_node(SimNode::Gain(ParamTimeline::new(1.0))))
    }

    fn create_analyser(&mut self, fft_size: usize) -> Result<NodeId> {
        let analyser = ByteAnalyser::new(fft_size)?;
        Ok(self
            .world
            .borrow_mut()
            .add_node(SimNode::Analyser(Box::new(analyser))))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) {
        self.world.borrow_mut().edges.insert((from, to));
    }

    fn connect_to_destination(&mut self, from: NodeId) {
        self.world.borrow_mut().destination.insert(from);
    }

    fn disconnect(&mut self, from: NodeId, to: NodeId) {
        self.world.borrow_mut().edges.remove(&(from, to));
    }

    fn gain_value(&self, gain: NodeId) -> f32 {
        self.world.borrow().gain_at_now(gain)
    }

    fn cancel_scheduled_values(&mut self, gain: NodeId, from: f64) {
        self.world
            .borrow_mut()
            .with_gain(gain, |timeline| timeline.cancel_from(from));
    }

    fn set_value_at_time(&mut self, gain: NodeId, value: f32, at: f64) {
        self.world
            .borrow_mut()
            .with_gain(gain, |timeline| timeline.set_value_at(value, at));
    }

    fn linear_ramp_to_value_at_time(&mut self, gain: NodeId, value: f32, end: f64) {
        self.world
            .borrow_mut()
            .with_gain(gain, |timeline| timeline.linear_ramp_to(value, end));
    }

    fn frequency_bin_count(&self, analyser: NodeId) -> usize {
        match self.world.borrow().nodes.get(&analyser) {
            Some(SimNode::Analyser(analyser)) => analyser.frequency_bin_count(),
            _ => 0,
        }
    }

    fn byte_frequency_data(&mut self, analyser: NodeId, out: &mut [u8]) {
        let mut world = self.world.borrow_mut();
        let Some(fft_size) = world.analyser_mut(analyser).map(|a| a.fft_size()) else {
            return;
        };
        let block = world.signal_into(analyser, fft_size);
        if let Some(node) = world.analyser_mut(analyser) {
            if let Err(err) = node.process(&block) {
                debug!(%err, "simulated analyser skipped a block");
                return;
            }
            node.byte_frequency_data(out);
        }
    }

    fn byte_time_domain_data(&mut self, analyser: NodeId, out: &mut [u8]) {
        let mut world = self.world.borrow_mut();
        let Some(fft_size) = world.analyser_mut(analyser).map(|a| a.fft_size()) else {
            return;
        };
        let block = world.signal_into(analyser, fft_size);
        if let Some(node) = world.analyser_mut(analyser) {
            node.capture(&block);
            node.byte_time_domain_data(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(host: &mut SimHost, track: SimTrack) -> ElementId {
        host.register_track("song.mp3", track);
        let element = host.create_audio_element().unwrap();
        let handle = host
            .create_resource_handle(&MediaFile::new("song.mp3", "audio/mpeg", "song.mp3"))
            .unwrap();
        host.set_source(element, Some(&handle));
        host.load(element);
        host.advance(0.01);
        element
    }

    #[test]
    fn metadata_arrives_after_load() {
        let mut host = SimHost::new();
        let element = loaded(&mut host, SimTrack::new(10.0, 120.0));

        assert_eq!(host.take_events(element), vec![ElementEvent::LoadedMetadata]);
        assert_eq!(host.duration(element), 10.0);
    }

    #[test]
    fn playback_ends_once() {
        let mut host = SimHost::new();
        let element = loaded(&mut host, SimTrack::new(2.0, 120.0));
        host.take_events(element);
        host.play(element).unwrap();

        host.advance(5.0);
        host.advance(1.0);
        let ended = host
            .take_events(element)
            .into_iter()
            .filter(|event| *event == ElementEvent::Ended)
            .count();
        assert_eq!(ended, 1);
        assert!(host.is_paused(element));
        assert!(host.is_ended(element));
        assert_eq!(host.current_time(element), 2.0);
    }

    #[test]
    fn gesture_gate_rejects_play() {
        let mut host = SimHost::new();
        let element = loaded(&mut host, SimTrack::default());
        host.require_user_gesture(true);

        let err = host.play(element).unwrap_err();
        assert!(err.is_recoverable());

        host.grant_user_gesture();
        assert!(host.play(element).is_ok());
    }

    #[test]
    fn duplicate_sources_are_refused() {
        let mut host = SimHost::new();
        let element = host.create_audio_element().unwrap();
        let mut factory = host.context_factory();
        let mut context = factory().unwrap();

        context.create_media_source(element).unwrap();
        assert!(context.create_media_source(element).is_err());
        assert_eq!(host.duplicate_source_attempts(), 1);
    }

    #[test]
    fn synthetic_track_has_energy_on_the_beat() {
        let track = SimTrack::new(10.0, 120.0);
        let on_beat: f32 = (0..480).map(|i| track.sample(i as f64 / SAMPLE_RATE).abs()).sum();
        let off_beat: f32 = (0..480)
            .map(|i| track.sample(0.2 + i as f64 / SAMPLE_RATE).abs())
            .sum();
        assert!(on_beat > off_beat * 2.0);
        assert_eq!(track.sample(-1.0), 0.0);
        assert_eq!(track.sample(10.0), 0.0);
    }
}

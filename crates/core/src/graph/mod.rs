//! Shared audio processing graph: one context, one gain stage, one spectral
//! tap, and a memoized source node per playable element.

pub mod automation;

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::{tap::SpectralTap, ElementId, Result};

/// Level used instead of true zero for fades.
pub const SILENCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Processing context provided by the platform.
///
/// Creating a second media source for the same element is an unrecoverable
/// platform error; [`AudioGraph`] guarantees it never asks for one.
pub trait AudioContext {
    fn state(&self) -> ContextState;
    fn resume(&mut self) -> Result<()>;
    /// Context clock in seconds. Parameter automation is scheduled against it.
    fn current_time(&self) -> f64;

    fn create_media_source(&mut self, element: ElementId) -> Result<NodeId>;
    fn create_gain(&mut self) -> Result<NodeId>;
    fn create_analyser(&mut self, fft_size: usize) -> Result<NodeId>;

    fn connect(&mut self, from: NodeId, to: NodeId);
    fn connect_to_destination(&mut self, from: NodeId);
    fn disconnect(&mut self, from: NodeId, to: NodeId);

    /// Gain value at the current context time.
    fn gain_value(&self, gain: NodeId) -> f32;
    fn cancel_scheduled_values(&mut self, gain: NodeId, from: f64);
    fn set_value_at_time(&mut self, gain: NodeId, value: f32, at: f64);
    fn linear_ramp_to_value_at_time(&mut self, gain: NodeId, value: f32, end: f64);

    fn frequency_bin_count(&self, analyser: NodeId) -> usize;
    fn byte_frequency_data(&mut self, analyser: NodeId, out: &mut [u8]);
    fn byte_time_domain_data(&mut self, analyser: NodeId, out: &mut [u8]);
}

/// Builds the processing context the first time audio needs routing.
pub type ContextFactory = Box<dyn FnMut() -> Result<Box<dyn AudioContext>>>;

struct GraphNodes {
    context: Box<dyn AudioContext>,
    gain: NodeId,
    analyser: NodeId,
}

/// Explicitly owned graph state, constructed once and handed to the
/// playback manager.
pub struct AudioGraph {
    factory: ContextFactory,
    fft_size: usize,
    nodes: Option<GraphNodes>,
    sources: HashMap<ElementId, NodeId>,
    active_source: Option<ElementId>,
}

impl AudioGraph {
    pub fn new(factory: ContextFactory, fft_size: usize) -> Self {
        Self {
            factory,
            fft_size,
            nodes: None,
            sources: HashMap::new(),
            active_source: None,
        }
    }

    pub fn has_context(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of source nodes ever created and still cached.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source_for(&self, element: ElementId) -> Option<NodeId> {
        self.sources.get(&element).copied()
    }

    pub fn active_source(&self) -> Option<ElementId> {
        self.active_source
    }

    pub fn context(&self) -> Option<&dyn AudioContext> {
        self.nodes.as_ref().map(|nodes| nodes.context.as_ref())
    }

    pub fn context_mut(&mut self) -> Option<&mut dyn AudioContext> {
        match self.nodes.as_mut() {
            Some(nodes) => Some(nodes.context.as_mut()),
            None => None,
        }
    }

    /// Creates the context, gain stage and tap on first use and wires
    /// `gain -> analyser -> destination`.
    pub fn ensure_context(&mut self) -> Result<()> {
        if self.nodes.is_some() {
            return Ok(());
        }

        let mut context = (self.factory)()?;
        let gain = context.create_gain()?;
        let analyser = context.create_analyser(self.fft_size)?;
        let now = context.current_time();
        context.set_value_at_time(gain, 0.0, now);
        context.connect(gain, analyser);
        context.connect_to_destination(analyser);
        debug!(?gain, ?analyser, fft_size = self.fft_size, "audio graph created");

        self.nodes = Some(GraphNodes {
            context,
            gain,
            analyser,
        });
        Ok(())
    }

    /// Makes `element` the one source feeding the gain stage. The source node
    /// is created only if this element never had one.
    pub fn route(&mut self, element: ElementId) -> Result<()> {
        self.ensure_context()?;
        let Some(nodes) = self.nodes.as_mut() else {
            return Ok(());
        };

        let source = match self.sources.get(&element) {
            Some(node) => *node,
            None => {
                let node = nodes.context.create_media_source(element)?;
                debug!(?element, ?node, "created media source node");
                self.sources.insert(element, node);
                node
            }
        };

        if self.active_source == Some(element) {
            return Ok(());
        }
        if let Some(previous) = self.active_source.and_then(|el| self.sources.get(&el)) {
            nodes.context.disconnect(*previous, nodes.gain);
        }
        nodes.context.connect(source, nodes.gain);
        self.active_source = Some(element);
        Ok(())
    }

    /// Disconnects the active source from the gain stage, keeping its node.
    pub fn detach(&mut self) {
        let Some(element) = self.active_source.take() else {
            return;
        };
        if let (Some(nodes), Some(source)) = (self.nodes.as_mut(), self.sources.get(&element)) {
            nodes.context.disconnect(*source, nodes.gain);
            debug!(?element, "detached media source");
        }
    }

    /// Forgets the cached source node of a discarded element.
    pub fn evict(&mut self, element: ElementId) {
        if self.active_source == Some(element) {
            self.detach();
        }
        if self.sources.remove(&element).is_some() {
            debug!(?element, "evicted media source");
        }
    }

    pub fn resume_if_suspended(&mut self) -> Result<()> {
        match self.nodes.as_mut() {
            Some(nodes) if nodes.context.state() == ContextState::Suspended => {
                nodes.context.resume()
            }
            _ => Ok(()),
        }
    }

    pub fn current_time(&self) -> Option<f64> {
        self.nodes.as_ref().map(|nodes| nodes.context.current_time())
    }

    pub fn gain(&self) -> Option<f32> {
        self.nodes
            .as_ref()
            .map(|nodes| nodes.context.gain_value(nodes.gain))
    }

    /// Cancels pending automation and ramps from the current gain to `target`.
    /// Returns the context time at which the ramp completes.
    pub fn ramp_gain(&mut self, target: f32, duration: f64) -> Option<f64> {
        let nodes = self.nodes.as_mut()?;
        let context = nodes.context.as_mut();
        let now = context.current_time();
        let current = context.gain_value(nodes.gain);
        context.cancel_scheduled_values(nodes.gain, now);
        context.set_value_at_time(nodes.gain, current, now);

        let end = now + duration.max(0.0);
        if duration > 0.0 {
            context.linear_ramp_to_value_at_time(nodes.gain, target, end);
        } else {
            context.set_value_at_time(nodes.gain, target, now);
        }
        Some(end)
    }

    /// Borrowed view of the spectral tap, if the context exists.
    pub fn tap(&mut self) -> Option<SpectralTap<'_>> {
        let nodes = self.nodes.as_mut()?;
        Some(SpectralTap::new(nodes.context.as_mut(), nodes.analyser))
    }
}

impl fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGraph")
            .field("fft_size", &self.fft_size)
            .field("has_context", &self.has_context())
            .field("sources", &self.sources.len())
            .field("active_source", &self.active_source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimHost;
    use crate::MediaHost;

    fn graph(host: &SimHost) -> AudioGraph {
        AudioGraph::new(host.context_factory(), 256)
    }

    #[test]
    fn context_is_created_lazily_once() {
        let host = SimHost::new();
        let mut graph = graph(&host);
        assert!(!graph.has_context());
        assert!(graph.tap().is_none());

        graph.ensure_context().unwrap();
        graph.ensure_context().unwrap();
        assert_eq!(host.contexts_created(), 1);
        assert_eq!(graph.tap().unwrap().frequency_bin_count(), 128);
    }

    #[test]
    fn reuses_source_nodes_per_element() {
        let mut host = SimHost::new();
        let mut graph = graph(&host);
        let audio = host.create_audio_element().unwrap();
        let video = host.add_video_surface();

        graph.route(audio).unwrap();
        let first = graph.source_for(audio).unwrap();
        graph.route(video).unwrap();
        graph.route(audio).unwrap();

        assert_eq!(graph.source_for(audio), Some(first));
        assert_eq!(graph.source_count(), 2);
        assert_eq!(host.source_nodes_created(), 2);
        assert_eq!(host.duplicate_source_attempts(), 0);
        assert_eq!(host.sources_feeding_gain(), 1);
    }

    #[test]
    fn detach_keeps_the_cached_node() {
        let mut host = SimHost::new();
        let mut graph = graph(&host);
        let audio = host.create_audio_element().unwrap();

        graph.route(audio).unwrap();
        graph.detach();
        assert_eq!(graph.active_source(), None);
        assert_eq!(host.sources_feeding_gain(), 0);

        graph.route(audio).unwrap();
        assert_eq!(host.source_nodes_created(), 1);
        assert_eq!(host.sources_feeding_gain(), 1);
    }

    #[test]
    fn ramps_start_from_the_current_value() {
        let host = SimHost::new();
        let mut graph = graph(&host);
        graph.ensure_context().unwrap();
        graph.resume_if_suspended().unwrap();

        let end = graph.ramp_gain(1.0, 0.5).unwrap();
        host.advance(0.25);
        let halfway = graph.gain().unwrap();
        assert!((halfway - 0.5).abs() < 1e-3, "{halfway}");

        graph.ramp_gain(0.0, 0.0);
        assert_eq!(graph.gain().unwrap(), 0.0);
        assert!(end > 0.0);
    }
}

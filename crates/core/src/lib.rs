//! Core library for the Aurora media visualiser.
//!
//! Playback is modelled against two host traits: [`MediaHost`] for media
//! elements and [`graph::AudioContext`] for the processing graph. The
//! [`PlaybackManager`] owns one session at a time and feeds a shared gain
//! stage whose spectral tap drives the [`RenderPipeline`]. The [`sim`] module
//! provides a virtual-clock host for headless runs and tests.

pub mod analysis;
pub mod config;
pub mod error;
pub mod graph;
pub mod media;
pub mod playback;
pub mod render;
pub mod sim;
pub mod tap;
pub mod timeline;

pub use analysis::{BandEnergies, BeatDetector, EnergyState};
pub use config::{AppConfig, AudioConfig, Theme, VisualConfig, VisualMode};
pub use error::{AuroraError, Result};
pub use graph::{AudioContext, AudioGraph, ContextFactory, ContextState, NodeId};
pub use media::{ElementEvent, ElementId, MediaFile, MediaHost, MediaKind, ResourceHandle};
pub use playback::{LoopSpec, PlaybackManager, SessionState};
pub use render::{Canvas, FrameReport, GlowStyle, PixelCanvas, RenderPipeline};
pub use tap::{ByteAnalyser, SpectralTap};
pub use timeline::{AnimationLoop, FixedRateFrames, FrameClock, FrameSource, LoopHandle};

//! Frame pipeline: clock, analysis, background, beat rings and the active
//! visual mode, drawn onto any [`Canvas`].

pub mod canvas;
mod raster;
mod scenes;

pub use canvas::{Blend, Canvas, ColorStop, Paint, Point, Rect, Rgba};
pub use raster::PixelCanvas;
pub use scenes::{glow_style, shake_offset, FrameInputs, GlowStyle, RING_ENERGY_GATE};

use tracing::debug;

use crate::{
    analysis::{BeatDetector, EnergyState},
    config::{Theme, VisualConfig, VisualMode},
    tap::SpectralTap,
    timeline::FrameClock,
};

/// Beats weaker than this are not reported to the beat callback.
pub const BEAT_CALLBACK_FLOOR: f32 = 0.1;
const FREQUENCY_SMOOTHING: f32 = 0.75;

/// Layout size of the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSize {
    pub css_width: f32,
    pub css_height: f32,
    pub device_pixel_ratio: f32,
}

impl SurfaceSize {
    /// Backing-store size in physical pixels, never zero.
    pub fn backing(&self) -> (u32, u32) {
        let scale = |css: f32| (css * self.device_pixel_ratio).round().max(1.0) as u32;
        (scale(self.css_width), scale(self.css_height))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub delta: f32,
    pub fps: f32,
    pub mode: VisualMode,
    pub level: f32,
    pub energy: EnergyState,
    /// `None` while no spectral tap is available.
    pub glow: Option<GlowStyle>,
    pub resized: bool,
}

pub struct RenderPipeline {
    config: VisualConfig,
    clock: FrameClock,
    detector: BeatDetector,
    frequency: Vec<u8>,
    time_domain: Vec<u8>,
    smoothed: Vec<f32>,
    pending_resize: Option<SurfaceSize>,
    surface: Option<SurfaceSize>,
    rng: fastrand::Rng,
    fps: f32,
    on_fps: Option<Box<dyn FnMut(f32)>>,
    on_beat: Option<Box<dyn FnMut(f32)>>,
    on_glow: Option<Box<dyn FnMut(Option<&GlowStyle>)>>,
}

impl RenderPipeline {
    pub fn new(config: VisualConfig) -> Self {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Deterministic camera shake, for reproducible output.
    pub fn with_seed(config: VisualConfig, seed: u64) -> Self {
        Self::with_rng(config, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(config: VisualConfig, rng: fastrand::Rng) -> Self {
        let mut config = config;
        config.set_sensitivity(config.sensitivity);
        config.set_bar_count(config.bar_count);
        Self {
            config,
            clock: FrameClock::default(),
            detector: BeatDetector::new(),
            frequency: Vec::new(),
            time_domain: Vec::new(),
            smoothed: Vec::new(),
            pending_resize: None,
            surface: None,
            rng,
            fps: 0.0,
            on_fps: None,
            on_beat: None,
            on_glow: None,
        }
    }

    pub fn config(&self) -> &VisualConfig {
        &self.config
    }

    pub fn set_mode(&mut self, mode: VisualMode) {
        self.config.mode = mode;
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.config.theme = theme;
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.config.set_sensitivity(sensitivity);
    }

    pub fn set_bar_count(&mut self, bar_count: usize) {
        self.config.set_bar_count(bar_count);
    }

    pub fn set_fps_callback(&mut self, callback: impl FnMut(f32) + 'static) {
        self.on_fps = Some(Box::new(callback));
    }

    /// Receives the strength of each beat above [`BEAT_CALLBACK_FLOOR`].
    pub fn set_beat_callback(&mut self, callback: impl FnMut(f32) + 'static) {
        self.on_beat = Some(Box::new(callback));
    }

    pub fn set_glow_callback(&mut self, callback: impl FnMut(Option<&GlowStyle>) + 'static) {
        self.on_glow = Some(Box::new(callback));
    }

    /// Records a layout change; the backing store follows on the next frame.
    pub fn notify_resize(&mut self, css_width: f32, css_height: f32, device_pixel_ratio: f32) {
        let valid = |side: f32| side.is_finite() && side > 0.0;
        if !(valid(css_width) && valid(css_height)) {
            return;
        }
        let device_pixel_ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        self.pending_resize = Some(SurfaceSize {
            css_width,
            css_height,
            device_pixel_ratio,
        });
    }

    pub fn surface(&self) -> Option<SurfaceSize> {
        self.surface
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn energy(&self) -> &EnergyState {
        self.detector.state()
    }

    pub fn beat_count(&self) -> u64 {
        self.detector.beat_count()
    }

    /// Starts measuring frame deltas from `timestamp`.
    pub fn start(&mut self, timestamp: f64) {
        self.clock.prime(timestamp);
    }

    /// Renders one frame for the display timestamp `timestamp` (seconds).
    /// Returns `None` when the frame is skipped because time did not advance.
    pub fn frame(
        &mut self,
        timestamp: f64,
        tap: Option<SpectralTap<'_>>,
        canvas: &mut dyn Canvas,
    ) -> Option<FrameReport> {
        if !self.clock.is_primed() {
            self.clock.prime(timestamp);
            return None;
        }
        let delta = self.clock.advance_to(timestamp)?;
        self.fps = 1.0 / delta;
        if let Some(on_fps) = self.on_fps.as_mut() {
            on_fps(self.fps);
        }

        let resized = self.apply_resize(canvas);
        canvas.clear();
        let (width, height) = canvas.size();
        let (width, height) = (width as f32, height as f32);

        let Some(mut tap) = tap else {
            let state = *self.detector.state();
            let inputs = self.inputs(width, height, &state);
            scenes::draw_background(canvas, &inputs, 0.0);
            self.emit_glow(None);
            return Some(self.report(delta, 0.0, state, None, resized));
        };

        let bins = tap.frequency_bin_count();
        if self.frequency.len() != bins {
            debug!(bins, "spectral buffers resized");
            self.frequency = vec![0; bins];
            self.time_domain = vec![128; bins];
            self.smoothed = vec![0.0; bins];
            self.detector.reset();
        }
        tap.read_frequency(&mut self.frequency);
        let state = self
            .detector
            .process_bins(&self.frequency, self.clock.time_seconds, self.config.sensitivity);
        if state.is_beat && state.strength > BEAT_CALLBACK_FLOOR {
            if let Some(on_beat) = self.on_beat.as_mut() {
                on_beat(state.strength);
            }
        }

        let glow = scenes::glow_style(width, height, self.config.theme, &state);
        self.emit_glow(Some(&glow));

        let (dx, dy) = scenes::shake_offset(width, height, &state, &mut self.rng);
        canvas.save();
        canvas.translate(dx, dy);

        let inputs = self.inputs(width, height, &state);
        let level = match self.config.mode {
            VisualMode::Wave => {
                tap.read_time_domain(&mut self.time_domain);
                let level = scenes::level_from_time_domain(&self.time_domain);
                scenes::draw_background(canvas, &inputs, level);
                scenes::draw_beat_rings(canvas, &inputs);
                scenes::draw_wave(canvas, &inputs, &self.time_domain);
                level
            }
            mode => {
                for (smoothed, value) in self.smoothed.iter_mut().zip(&self.frequency) {
                    *smoothed = *smoothed * FREQUENCY_SMOOTHING
                        + *value as f32 * (1.0 - FREQUENCY_SMOOTHING);
                }
                let level = scenes::level_from_frequency(&self.smoothed);
                scenes::draw_background(canvas, &inputs, level);
                scenes::draw_beat_rings(canvas, &inputs);
                if mode == VisualMode::Circle {
                    scenes::draw_circle(canvas, &inputs, &self.smoothed);
                } else {
                    scenes::draw_bars(canvas, &inputs, &self.smoothed);
                }
                level
            }
        };
        canvas.restore();

        Some(self.report(delta, level, state, Some(glow), resized))
    }

    fn apply_resize(&mut self, canvas: &mut dyn Canvas) -> bool {
        let Some(size) = self.pending_resize.take() else {
            return false;
        };
        let (width, height) = size.backing();
        if canvas.size() != (width, height) {
            canvas.resize(width, height);
            debug!(width, height, "canvas resized");
        }
        self.surface = Some(size);
        true
    }

    fn inputs<'a>(&self, width: f32, height: f32, beat: &'a EnergyState) -> FrameInputs<'a> {
        FrameInputs {
            width,
            height,
            time: self.clock.time_seconds,
            rotation: self.clock.rotation,
            theme: self.config.theme,
            sensitivity: self.config.sensitivity,
            bar_count: self.config.bar_count,
            beat,
        }
    }

    fn emit_glow(&mut self, glow: Option<&GlowStyle>) {
        if let Some(on_glow) = self.on_glow.as_mut() {
            on_glow(glow);
        }
    }

    fn report(
        &self,
        delta: f32,
        level: f32,
        energy: EnergyState,
        glow: Option<GlowStyle>,
        resized: bool,
    ) -> FrameReport {
        FrameReport {
            delta,
            fps: self.fps,
            mode: self.config.mode,
            level,
            energy,
            glow,
            resized,
        }
    }
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("surface", &self.surface)
            .field("fps", &self.fps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::{
        graph::{AudioContext, ContextState, NodeId},
        ElementId, Result,
    };

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Op {
        Resize(u32, u32),
        Clear,
        Save,
        Restore,
        Translate,
        Alpha,
        Blend(Blend),
        Shadow,
        FillRect,
        FillPolygon,
        Stroke,
        Circle,
    }

    #[derive(Default)]
    struct RecordingCanvas {
        size: (u32, u32),
        ops: Vec<Op>,
    }

    impl RecordingCanvas {
        fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                ops: Vec::new(),
            }
        }

        fn take(&mut self) -> Vec<Op> {
            std::mem::take(&mut self.ops)
        }
    }

    fn count(ops: &[Op], op: Op) -> usize {
        ops.iter().filter(|o| **o == op).count()
    }

    impl Canvas for RecordingCanvas {
        fn size(&self) -> (u32, u32) {
            self.size
        }
        fn resize(&mut self, width: u32, height: u32) {
            self.size = (width, height);
            self.ops.push(Op::Resize(width, height));
        }
        fn clear(&mut self) {
            self.ops.push(Op::Clear);
        }
        fn save(&mut self) {
            self.ops.push(Op::Save);
        }
        fn restore(&mut self) {
            self.ops.push(Op::Restore);
        }
        fn translate(&mut self, _dx: f32, _dy: f32) {
            self.ops.push(Op::Translate);
        }
        fn set_global_alpha(&mut self, _alpha: f32) {
            self.ops.push(Op::Alpha);
        }
        fn set_blend(&mut self, blend: Blend) {
            self.ops.push(Op::Blend(blend));
        }
        fn set_shadow(&mut self, _blur: f32, _color: Rgba) {
            self.ops.push(Op::Shadow);
        }
        fn fill_rect(&mut self, _rect: Rect, _paint: &Paint) {
            self.ops.push(Op::FillRect);
        }
        fn fill_polygon(&mut self, _points: &[Point], _paint: &Paint) {
            self.ops.push(Op::FillPolygon);
        }
        fn stroke_polyline(&mut self, _points: &[Point], _width: f32, _color: Rgba) {
            self.ops.push(Op::Stroke);
        }
        fn stroke_circle(&mut self, _center: Point, _radius: f32, _width: f32, _color: Rgba) {
            self.ops.push(Op::Circle);
        }
    }

    /// Context whose analyser reports a flat spectrum at `level`.
    struct ScriptedContext {
        level: u8,
    }

    impl AudioContext for ScriptedContext {
        fn state(&self) -> ContextState {
            ContextState::Running
        }
        fn resume(&mut self) -> Result<()> {
            Ok(())
        }
        fn current_time(&self) -> f64 {
            0.0
        }
        fn create_media_source(&mut self, _element: ElementId) -> Result<NodeId> {
            Ok(NodeId(1))
        }
        fn create_gain(&mut self) -> Result<NodeId> {
            Ok(NodeId(2))
        }
        fn create_analyser(&mut self, _fft_size: usize) -> Result<NodeId> {
            Ok(NodeId(3))
        }
        fn connect(&mut self, _from: NodeId, _to: NodeId) {}
        fn connect_to_destination(&mut self, _from: NodeId) {}
        fn disconnect(&mut self, _from: NodeId, _to: NodeId) {}
        fn gain_value(&self, _gain: NodeId) -> f32 {
            1.0
        }
        fn cancel_scheduled_values(&mut self, _gain: NodeId, _from: f64) {}
        fn set_value_at_time(&mut self, _gain: NodeId, _value: f32, _at: f64) {}
        fn linear_ramp_to_value_at_time(&mut self, _gain: NodeId, _value: f32, _end: f64) {}
        fn frequency_bin_count(&self, _analyser: NodeId) -> usize {
            128
        }
        fn byte_frequency_data(&mut self, _analyser: NodeId, out: &mut [u8]) {
            out.fill(self.level);
        }
        fn byte_time_domain_data(&mut self, _analyser: NodeId, out: &mut [u8]) {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample = if i % 2 == 0 { 208 } else { 48 };
            }
        }
    }

    const FRAME: f64 = 1.0 / 60.0;

    fn pipeline() -> RenderPipeline {
        let mut pipeline = RenderPipeline::with_seed(VisualConfig::default(), 1);
        pipeline.start(0.0);
        pipeline
    }

    #[test]
    fn first_frame_only_primes_the_clock() {
        let mut pipeline = RenderPipeline::with_seed(VisualConfig::default(), 1);
        let reported = Rc::new(Cell::new(0.0));
        let sink = Rc::clone(&reported);
        pipeline.set_fps_callback(move |fps| sink.set(fps));
        let mut canvas = RecordingCanvas::new(64, 64);

        assert!(pipeline.frame(1.0, None, &mut canvas).is_none());
        assert!(pipeline.frame(1.0, None, &mut canvas).is_none());
        assert!(canvas.ops.is_empty());

        let report = pipeline.frame(1.02, None, &mut canvas).unwrap();
        assert!((report.fps - 50.0).abs() < 0.01);
        assert!((reported.get() - 50.0).abs() < 0.01);
    }

    #[test]
    fn resize_is_applied_on_the_next_frame() {
        let mut pipeline = pipeline();
        let mut canvas = RecordingCanvas::new(10, 10);

        pipeline.notify_resize(400.0, 300.0, 2.0);
        assert!(canvas.ops.is_empty());

        let report = pipeline.frame(FRAME, None, &mut canvas).unwrap();
        assert!(report.resized);
        assert_eq!(canvas.take()[0], Op::Resize(800, 600));
        assert_eq!(canvas.size(), (800, 600));

        let report = pipeline.frame(2.0 * FRAME, None, &mut canvas).unwrap();
        assert!(!report.resized);
        assert!(!canvas.take().iter().any(|op| matches!(op, Op::Resize(..))));

        pipeline.notify_resize(f32::NAN, 10.0, 1.0);
        pipeline.frame(3.0 * FRAME, None, &mut canvas).unwrap();
        assert_eq!(canvas.size(), (800, 600));
    }

    #[test]
    fn idle_frame_draws_background_without_glow() {
        let mut pipeline = pipeline();
        let glows = Rc::new(Cell::new(0));
        let sink = Rc::clone(&glows);
        pipeline.set_glow_callback(move |glow| {
            assert!(glow.is_none());
            sink.set(sink.get() + 1);
        });
        let mut canvas = RecordingCanvas::new(320, 200);

        let report = pipeline.frame(FRAME, None, &mut canvas).unwrap();
        assert_eq!(report.glow, None);
        assert_eq!(glows.get(), 1);

        let ops = canvas.take();
        assert_eq!(ops[0], Op::Clear);
        assert_eq!(count(&ops, Op::Translate), 0);
        assert!(count(&ops, Op::FillRect) >= 3);
        assert_eq!(count(&ops, Op::Stroke), 0);
    }

    #[test]
    fn modes_switch_on_the_next_frame() {
        let mut pipeline = pipeline();
        let mut context = ScriptedContext { level: 120 };
        let mut canvas = RecordingCanvas::new(320, 200);
        let bars = pipeline.config().bar_count;

        let tap = SpectralTap::new(&mut context, NodeId(3));
        let report = pipeline.frame(FRAME, Some(tap), &mut canvas).unwrap();
        assert_eq!(report.mode, VisualMode::Bars);
        assert!(report.glow.is_some());
        let ops = canvas.take();
        assert_eq!(ops[1], Op::Save);
        assert_eq!(ops[2], Op::Translate);
        assert!(count(&ops, Op::FillRect) >= 2 * bars);
        assert_eq!(ops.last(), Some(&Op::Restore));

        pipeline.set_mode(VisualMode::Circle);
        let tap = SpectralTap::new(&mut context, NodeId(3));
        pipeline.frame(2.0 * FRAME, Some(tap), &mut canvas).unwrap();
        let ops = canvas.take();
        assert_eq!(count(&ops, Op::Stroke), bars);
        // Three beat rings plus the two halos.
        assert_eq!(count(&ops, Op::Circle), 5);

        pipeline.set_mode(VisualMode::Wave);
        let tap = SpectralTap::new(&mut context, NodeId(3));
        let report = pipeline.frame(3.0 * FRAME, Some(tap), &mut canvas).unwrap();
        let ops = canvas.take();
        assert_eq!(count(&ops, Op::FillPolygon), 1);
        assert_eq!(count(&ops, Op::Stroke), 2);
        assert!(report.level > 0.5);
    }

    #[test]
    fn quiet_input_skips_the_rings() {
        let mut pipeline = pipeline();
        let mut context = ScriptedContext { level: 10 };
        let mut canvas = RecordingCanvas::new(320, 200);
        pipeline.set_mode(VisualMode::Wave);

        let tap = SpectralTap::new(&mut context, NodeId(3));
        pipeline.frame(FRAME, Some(tap), &mut canvas).unwrap();
        assert_eq!(count(&canvas.take(), Op::Circle), 0);
    }

    #[test]
    fn strong_beats_reach_the_callback() {
        let mut pipeline = pipeline();
        let strengths = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = Rc::clone(&strengths);
        pipeline.set_beat_callback(move |strength| sink.borrow_mut().push(strength));
        let mut context = ScriptedContext { level: 40 };
        let mut canvas = RecordingCanvas::new(64, 64);

        for frame in 1..=40 {
            context.level = if frame == 31 { 230 } else { 40 };
            let tap = SpectralTap::new(&mut context, NodeId(3));
            pipeline.frame(frame as f64 * FRAME, Some(tap), &mut canvas);
        }

        let strengths = strengths.borrow();
        assert_eq!(strengths.len(), 1);
        assert!(strengths[0] > BEAT_CALLBACK_FLOOR);
        assert_eq!(pipeline.beat_count(), 1);
    }

    #[test]
    fn renders_pixels() {
        let mut pipeline = pipeline();
        let mut context = ScriptedContext { level: 160 };
        let mut canvas = PixelCanvas::new(96, 64);
        pipeline.set_theme(Theme::Neon);
        let mut tick = 0;
        for mode in [VisualMode::Bars, VisualMode::Circle, VisualMode::Wave] {
            pipeline.set_mode(mode);
            for _ in 0..5 {
                tick += 1;
                let tap = SpectralTap::new(&mut context, NodeId(3));
                pipeline.frame(tick as f64 * FRAME, Some(tap), &mut canvas);
            }
            assert!(canvas.mean_luminance() > 0.05, "{mode:?}");
        }
    }
}

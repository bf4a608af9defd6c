//! Spectral tap: instantaneous byte snapshots of the signal leaving the gain
//! stage.

use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{graph::AudioContext, graph::NodeId, AuroraError, Result};

pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DECIBELS: f32 = -100.0;
pub const DEFAULT_MAX_DECIBELS: f32 = -30.0;

/// Borrowed handle on the context's analysis node. Every read reflects the
/// current state; nothing is buffered between calls.
pub struct SpectralTap<'a> {
    context: &'a mut dyn AudioContext,
    node: NodeId,
}

impl<'a> SpectralTap<'a> {
    pub(crate) fn new(context: &'a mut dyn AudioContext, node: NodeId) -> Self {
        Self { context, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.context.frequency_bin_count(self.node)
    }

    /// Fills `out` with frequency magnitudes in 0..=255.
    pub fn read_frequency(&mut self, out: &mut [u8]) {
        self.context.byte_frequency_data(self.node, out);
    }

    /// Fills `out` with time-domain samples in 0..=255, silence at 128.
    pub fn read_time_domain(&mut self, out: &mut [u8]) {
        self.context.byte_time_domain_data(self.node, out);
    }
}

impl fmt::Debug for SpectralTap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralTap").field("node", &self.node).finish()
    }
}

/// Analyser-node behaviour for hosts that only have PCM: Blackman window,
/// smoothed magnitudes and a decibel window mapped onto bytes.
pub struct ByteAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    window: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
    time_domain: Vec<f32>,
}

impl ByteAnalyser {
    pub fn new(fft_size: usize) -> Result<Self> {
        if fft_size < 32 || !fft_size.is_power_of_two() {
            return Err(AuroraError::InvalidInput(
                "fft size must be a power of two no smaller than 32",
            ));
        }

        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Ok(Self {
            fft_size,
            smoothing: DEFAULT_SMOOTHING,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
            window: (0..fft_size).map(|i| blackman_value(i, fft_size)).collect(),
            input: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            plan,
            smoothed: vec![0.0; fft_size / 2],
            time_domain: vec![0.0; fft_size],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    /// Analyses the most recent `fft_size` samples of `block`, zero-padding
    /// at the front when the block is shorter.
    pub fn process(&mut self, block: &[f32]) -> Result<()> {
        self.capture(block);
        for (i, sample) in self.time_domain.iter().enumerate() {
            self.input[i] = sample * self.window[i];
        }
        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let scale = 1.0 / self.fft_size as f32;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.spectrum) {
            let magnitude = bin.norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
        }
        Ok(())
    }

    /// Stores the time-domain window without touching the spectrum.
    pub fn capture(&mut self, block: &[f32]) {
        let take = block.len().min(self.fft_size);
        let pad = self.fft_size - take;
        self.time_domain[..pad].fill(0.0);
        self.time_domain[pad..].copy_from_slice(&block[block.len() - take..]);
    }

    pub fn byte_frequency_data(&self, out: &mut [u8]) {
        let range = (self.max_decibels - self.min_decibels).max(f32::EPSILON);
        for (byte, magnitude) in out.iter_mut().zip(&self.smoothed) {
            let db = if *magnitude > 0.0 {
                20.0 * magnitude.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (db - self.min_decibels) / range;
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    pub fn byte_time_domain_data(&self, out: &mut [u8]) {
        for (byte, sample) in out.iter_mut().zip(&self.time_domain) {
            *byte = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
    }
}

impl fmt::Debug for ByteAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    let alpha = 0.16;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5;
    let a2 = 0.5 * alpha;
    let x = index as f32 / len as f32;
    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}

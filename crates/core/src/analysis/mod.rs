use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const HISTORY_SIZE: usize = 60;
const MIN_HISTORY: usize = 15;
const LOW_BAND_END: f32 = 0.15;
const MID_BAND_END: f32 = 0.5;
const THRESHOLD_CAP: f32 = 0.97;
const MIN_BEAT_ENERGY: f32 = 0.12;
const MIN_BEAT_INTERVAL: f32 = 0.23;
const FLASH_FLOOR: f32 = 0.45;
const FLASH_DECAY: f32 = 0.88;
const WARMUP_FLASH_DECAY: f32 = 0.9;
const FLASH_EPSILON: f32 = 0.01;
const SMOOTHING_ALPHA: f32 = 0.25;

/// Mean normalised magnitude of the low, mid and high sections of a spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
    /// Mean of the three bands, clamped to [0, 1].
    pub energy: f32,
}

impl BandEnergies {
    /// Splits `bins` at 15% and 50% and averages each section.
    pub fn from_bins(bins: &[u8]) -> Self {
        let n = bins.len();
        if n == 0 {
            return Self::default();
        }

        let low_end = (n as f32 * LOW_BAND_END) as usize;
        let mid_end = (n as f32 * MID_BAND_END) as usize;

        let mut sums = [0.0f32; 3];
        for (i, value) in bins.iter().enumerate() {
            let band = if i < low_end {
                0
            } else if i < mid_end {
                1
            } else {
                2
            };
            sums[band] += *value as f32 / 255.0;
        }

        let low = sums[0] / low_end.max(1) as f32;
        let mid = sums[1] / mid_end.saturating_sub(low_end).max(1) as f32;
        let high = sums[2] / n.saturating_sub(mid_end).max(1) as f32;
        let energy = ((low + mid + high) / 3.0).clamp(0.0, 1.0);

        Self {
            low,
            mid,
            high,
            energy,
        }
    }
}

/// Per-frame energy and beat state consumed by the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyState {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
    pub energy: f32,
    /// Exponential moving average of `energy`.
    pub smoothed: f32,
    pub is_beat: bool,
    /// Strength of the beat fired this frame, 0 when none fired.
    pub strength: f32,
    /// Decaying pulse raised by beats.
    pub flash: f32,
    pub last_beat_time: f32,
}

/// Adaptive-threshold beat detector over the band energy signal.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    history: VecDeque<f32>,
    state: EnergyState,
    beats: u64,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BeatDetector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_SIZE + 1),
            state: EnergyState::default(),
            beats: 0,
        }
    }

    pub fn state(&self) -> &EnergyState {
        &self.state
    }

    /// Total beats fired since construction or the last reset.
    pub fn beat_count(&self) -> u64 {
        self.beats
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.state = EnergyState::default();
        self.beats = 0;
    }

    /// Analyses one spectrum snapshot taken at `now` seconds.
    pub fn process_bins(&mut self, bins: &[u8], now: f32, sensitivity: f32) -> EnergyState {
        self.update(BandEnergies::from_bins(bins), now, sensitivity)
    }

    /// Feeds one frame of band energies taken at `now` seconds.
    pub fn update(&mut self, bands: BandEnergies, now: f32, sensitivity: f32) -> EnergyState {
        let state = &mut self.state;
        let energy = bands.energy;
        state.low = bands.low;
        state.mid = bands.mid;
        state.high = bands.high;
        state.energy = energy;
        state.smoothed += (energy - state.smoothed) * SMOOTHING_ALPHA;
        state.is_beat = false;
        state.strength = 0.0;

        self.history.push_back(energy);
        if self.history.len() > HISTORY_SIZE {
            self.history.pop_front();
        }

        if self.history.len() < MIN_HISTORY {
            decay_flash(state, WARMUP_FLASH_DECAY);
            return *state;
        }

        let threshold = adaptive_threshold(&self.history, sensitivity);
        if energy > threshold
            && energy > MIN_BEAT_ENERGY
            && now - state.last_beat_time > MIN_BEAT_INTERVAL
        {
            let overshoot = (energy - threshold) / (1.0 - threshold).max(1e-4);
            let strength = (overshoot * 1.4).clamp(0.0, 1.0);
            state.is_beat = true;
            state.strength = strength;
            state.last_beat_time = now;
            state.flash = state.flash.max(FLASH_FLOOR + strength * 0.55);
            self.beats += 1;
        }

        decay_flash(state, FLASH_DECAY);
        *state
    }
}

/// Coefficient applied to the standard deviation; falls as sensitivity rises.
pub fn threshold_coefficient(sensitivity: f32) -> f32 {
    (1.35 - (sensitivity - 1.0) * 0.35).clamp(0.6, 1.6)
}

fn adaptive_threshold(history: &VecDeque<f32>, sensitivity: f32) -> f32 {
    let len = history.len() as f32;
    let mean = history.iter().sum::<f32>() / len;
    let variance = history.iter().map(|e| (e - mean) * (e - mean)).sum::<f32>() / len;
    (mean + variance.sqrt() * threshold_coefficient(sensitivity)).min(THRESHOLD_CAP)
}

fn decay_flash(state: &mut EnergyState, factor: f32) {
    state.flash *= factor;
    if state.flash < FLASH_EPSILON {
        state.flash = 0.0;
    }
}

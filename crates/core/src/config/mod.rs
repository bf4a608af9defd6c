use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

pub const MIN_SENSITIVITY: f32 = 0.5;
pub const MAX_SENSITIVITY: f32 = 2.0;
pub const MIN_BAR_COUNT: usize = 8;
pub const MAX_BAR_COUNT: usize = 256;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub visual: VisualConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let mut config: AppConfig = serde_json::from_str(raw)?;
        config.sanitize();
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Pulls every value back into its supported range.
    pub fn sanitize(&mut self) {
        self.audio.sanitize();
        let visual = &mut self.visual;
        visual.set_sensitivity(visual.sensitivity);
        visual.set_bar_count(visual.bar_count);
    }
}

/// Configuration specific to the playback graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Initial target volume in [0, 1].
    pub volume: f32,
    pub playback_rate: f32,
    /// Analyser window length; the tap exposes half as many frequency bins.
    pub fft_size: usize,
    /// Gain ramp applied on `play`, in seconds.
    pub fade_in: f64,
    /// Gain ramp applied before a deferred pause, in seconds.
    pub fade_out: f64,
    /// Gain ramp applied on volume changes, in seconds.
    pub volume_ramp: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 0.8,
            playback_rate: 1.0,
            fft_size: 2048,
            fade_in: 0.4,
            fade_out: 0.3,
            volume_ramp: 0.1,
        }
    }
}

impl AudioConfig {
    fn sanitize(&mut self) {
        let defaults = Self::default();
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            defaults.volume
        };
        if !self.playback_rate.is_finite() || self.playback_rate <= 0.0 {
            self.playback_rate = defaults.playback_rate;
        }
        if !self.fft_size.is_power_of_two() || !(32..=32_768).contains(&self.fft_size) {
            self.fft_size = defaults.fft_size;
        }
        for (value, fallback) in [
            (&mut self.fade_in, defaults.fade_in),
            (&mut self.fade_out, defaults.fade_out),
            (&mut self.volume_ramp, defaults.volume_ramp),
        ] {
            if !value.is_finite() || *value < 0.0 {
                *value = fallback;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualMode {
    #[default]
    Bars,
    Circle,
    Wave,
}

impl std::str::FromStr for VisualMode {
    type Err = crate::AuroraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bars" => Ok(Self::Bars),
            "circle" => Ok(Self::Circle),
            "wave" => Ok(Self::Wave),
            _ => Err(crate::AuroraError::InvalidInput("unknown visual mode")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Neon,
}

impl Theme {
    pub fn is_neon(self) -> bool {
        self == Theme::Neon
    }
}

impl std::str::FromStr for Theme {
    type Err = crate::AuroraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "neon" => Ok(Self::Neon),
            _ => Err(crate::AuroraError::InvalidInput("unknown theme")),
        }
    }
}

/// Visual settings read by the render pipeline every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub mode: VisualMode,
    pub theme: Theme,
    pub sensitivity: f32,
    pub bar_count: usize,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            mode: VisualMode::Bars,
            theme: Theme::Dark,
            sensitivity: 1.0,
            bar_count: 64,
        }
    }
}

impl VisualConfig {
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = if sensitivity.is_finite() {
            sensitivity.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY)
        } else {
            1.0
        };
    }

    pub fn set_bar_count(&mut self, bar_count: usize) {
        self.bar_count = bar_count.clamp(MIN_BAR_COUNT, MAX_BAR_COUNT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json_str(r#"{ "visual": { "mode": "wave" } }"#).unwrap();
        assert_eq!(config.visual.mode, VisualMode::Wave);
        assert_eq!(config.visual.bar_count, 64);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = AppConfig::from_json_str(
            r#"{ "audio": { "volume": 3.0, "fft_size": 1000, "playback_rate": -1 },
                 "visual": { "sensitivity": 9.0, "bar_count": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.audio.volume, 1.0);
        assert_eq!(config.audio.fft_size, 2048);
        assert_eq!(config.audio.playback_rate, 1.0);
        assert_eq!(config.visual.sensitivity, MAX_SENSITIVITY);
        assert_eq!(config.visual.bar_count, MIN_BAR_COUNT);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = AppConfig::from_json_str("{ nope").unwrap_err();
        assert!(format!("{err}").starts_with("config:"));
    }

    #[test]
    fn parses_mode_and_theme_names() {
        assert_eq!("Circle".parse::<VisualMode>().unwrap(), VisualMode::Circle);
        assert_eq!("neon".parse::<Theme>().unwrap(), Theme::Neon);
        assert!("sparkles".parse::<VisualMode>().is_err());
    }
}

use std::{cell::Cell, rc::Rc};

use crate::Result;

/// Radians per second added to the shared rotation phase.
pub const ROTATION_SPEED: f32 = 0.35;

/// Animation clock fed by per-frame timestamps.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    pub time_seconds: f32,
    pub rotation: f32,
    last_timestamp: Option<f64>,
}

impl FrameClock {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Starts measuring deltas from `timestamp`.
    pub fn prime(&mut self, timestamp: f64) {
        self.last_timestamp = Some(timestamp);
    }

    pub fn is_primed(&self) -> bool {
        self.last_timestamp.is_some()
    }

    /// Moves to `timestamp` (seconds) and returns the elapsed delta. Returns
    /// `None` for the priming call and for timestamps that do not move forward.
    pub fn advance_to(&mut self, timestamp: f64) -> Option<f32> {
        if !timestamp.is_finite() {
            return None;
        }
        let Some(last) = self.last_timestamp.replace(timestamp) else {
            return None;
        };
        let delta = (timestamp - last) as f32;
        if delta <= 0.0 {
            self.last_timestamp = Some(last);
            return None;
        }
        self.advance(delta);
        Some(delta)
    }

    pub fn advance(&mut self, delta: f32) {
        if delta <= 0.0 {
            return;
        }
        self.time_seconds += delta;
        self.rotation += delta * ROTATION_SPEED;
    }
}

/// Host hook that yields display-refresh timestamps in seconds. `None` ends
/// the loop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<f64>;
}

/// Virtual refresh for headless hosts: `fps` frames per second, optionally
/// bounded.
#[derive(Debug, Clone)]
pub struct FixedRateFrames {
    interval: f64,
    now: f64,
    remaining: Option<u64>,
}

impl FixedRateFrames {
    pub fn new(fps: f64, limit: Option<u64>) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
        Self {
            interval: 1.0 / fps,
            now: 0.0,
            remaining: limit,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }
}

impl FrameSource for FixedRateFrames {
    fn next_frame(&mut self) -> Option<f64> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        self.now += self.interval;
        Some(self.now)
    }
}

/// Cancels a running [`AnimationLoop`]. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct LoopHandle {
    running: Rc<Cell<bool>>,
}

impl LoopHandle {
    pub fn stop(&self) {
        self.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }
}

/// Frame loop driven by a [`FrameSource`] until stopped or the source ends.
#[derive(Debug, Default)]
pub struct AnimationLoop {
    handle: LoopHandle,
    frames: u64,
}

impl AnimationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Calls `on_frame` once per timestamp. Returns the number of frames run
    /// by this call; an error from `on_frame` stops the loop and is returned.
    pub fn run<S, F>(&mut self, source: &mut S, mut on_frame: F) -> Result<u64>
    where
        S: FrameSource + ?Sized,
        F: FnMut(f64, &LoopHandle) -> Result<()>,
    {
        self.handle.running.set(true);
        let mut ran = 0;
        while self.handle.is_running() {
            let Some(timestamp) = source.next_frame() else {
                break;
            };
            if let Err(err) = on_frame(timestamp, &self.handle) {
                self.handle.stop();
                return Err(err);
            }
            ran += 1;
            self.frames += 1;
        }
        self.handle.stop();
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuroraError;

    #[test]
    fn clock_skips_non_positive_deltas() {
        let mut clock = FrameClock::default();
        assert_eq!(clock.advance_to(1.0), None);
        assert_eq!(clock.advance_to(1.0), None);
        assert_eq!(clock.advance_to(0.5), None);

        let delta = clock.advance_to(1.5).unwrap();
        assert!((delta - 0.5).abs() < 1e-6);
        assert!((clock.time_seconds - 0.5).abs() < 1e-6);
        assert!((clock.rotation - 0.5 * ROTATION_SPEED).abs() < 1e-6);
    }

    #[test]
    fn fixed_rate_source_is_bounded() {
        let mut frames = FixedRateFrames::new(50.0, Some(3));
        assert!((frames.next_frame().unwrap() - 0.02).abs() < 1e-12);
        assert!(frames.next_frame().is_some());
        assert!(frames.next_frame().is_some());
        assert_eq!(frames.next_frame(), None);
    }

    #[test]
    fn stop_ends_the_loop() {
        let mut animation = AnimationLoop::new();
        let mut frames = FixedRateFrames::new(60.0, None);
        let ran = animation
            .run(&mut frames, |timestamp, handle| {
                if timestamp > 0.51 {
                    handle.stop();
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(ran, 31);
        assert!(!animation.handle().is_running());
    }

    #[test]
    fn frame_errors_stop_the_loop() {
        let mut animation = AnimationLoop::new();
        let mut frames = FixedRateFrames::new(60.0, Some(10));
        let mut seen = 0;
        let result = animation.run(&mut frames, |_, _| {
            seen += 1;
            if seen == 4 {
                Err(AuroraError::msg("surface lost"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(seen, 4);
        assert_eq!(animation.frames(), 3);
    }
}

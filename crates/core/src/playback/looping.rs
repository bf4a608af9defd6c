use serde::{Deserialize, Serialize};

/// Distance kept from the loop bounds when clamping or snapping back.
pub const LOOP_EPSILON: f64 = 0.05;

/// A-B loop window. Whenever both bounds are set, `b > a` holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub enabled: bool,
}

impl LoopSpec {
    /// The window, if both bounds are set.
    pub fn window(&self) -> Option<(f64, f64)> {
        match (self.a, self.b) {
            (Some(a), Some(b)) if b > a => Some((a, b)),
            _ => None,
        }
    }

    /// The window, if it is complete and looping is enabled.
    pub fn active_window(&self) -> Option<(f64, f64)> {
        self.window().filter(|_| self.enabled)
    }

    /// Replaces both bounds. `None` clears a bound; clearing both also
    /// disables the loop. Returns true if `b` was dropped for not lying
    /// after `a`.
    pub fn set_points(&mut self, a: Option<f64>, b: Option<f64>) -> bool {
        self.a = a.and_then(valid_time);
        self.b = b.and_then(valid_time);
        if self.a.is_none() && self.b.is_none() {
            self.enabled = false;
            return false;
        }
        self.drop_invalid_b()
    }

    /// Moves only `a`. A `b` that no longer lies after it is cleared.
    pub fn set_a(&mut self, a: f64) -> bool {
        let Some(a) = valid_time(a) else {
            return false;
        };
        self.a = Some(a);
        self.drop_invalid_b()
    }

    /// Moves only `b`. A `b` at or before the existing `a` is not stored.
    pub fn set_b(&mut self, b: f64) -> bool {
        let Some(b) = valid_time(b) else {
            return false;
        };
        self.b = Some(b);
        self.drop_invalid_b()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Clamps a seek target into `[a, b)`.
    pub fn clamp_seek(&self, target: f64) -> f64 {
        match self.active_window() {
            Some((a, _)) if target < a => a,
            Some((a, b)) if target >= b => (b - LOOP_EPSILON).max(a),
            _ => target,
        }
    }

    /// Where playback must jump to when `time` has left the active window.
    pub fn enforce(&self, time: f64) -> Option<f64> {
        let (a, b) = self.active_window()?;
        if time >= b {
            Some(restart_point(a, b))
        } else if time < a {
            Some(a)
        } else {
            None
        }
    }

    /// Where a looped playthrough resumes once it reaches `b` or the end of
    /// the media.
    pub fn restart(&self) -> Option<f64> {
        self.active_window().map(|(a, b)| restart_point(a, b))
    }

    fn drop_invalid_b(&mut self) -> bool {
        match (self.a, self.b) {
            (Some(a), Some(b)) if b <= a => {
                self.b = None;
                true
            }
            _ => false,
        }
    }
}

fn valid_time(value: f64) -> Option<f64> {
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Just past `a`, but never at or beyond `b` for very short windows.
fn restart_point(a: f64, b: f64) -> f64 {
    (a + LOOP_EPSILON).min(a + (b - a) * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(a: f64, b: f64) -> LoopSpec {
        LoopSpec {
            a: Some(a),
            b: Some(b),
            enabled: true,
        }
    }

    #[test]
    fn later_a_clears_stale_b() {
        let mut spec = LoopSpec::default();
        spec.set_points(Some(1.0), Some(3.0));
        assert!(spec.set_a(4.0));
        assert_eq!(spec.a, Some(4.0));
        assert_eq!(spec.b, None);
    }

    #[test]
    fn b_before_a_is_not_stored() {
        let mut spec = LoopSpec::default();
        spec.set_a(2.0);
        assert!(spec.set_b(1.0));
        assert_eq!(spec.a, Some(2.0));
        assert_eq!(spec.b, None);

        assert!(spec.set_points(Some(5.0), Some(5.0)));
        assert_eq!(spec.window(), None);
    }

    #[test]
    fn clearing_both_bounds_disables() {
        let mut spec = enabled(1.0, 2.0);
        assert!(!spec.set_points(None, None));
        assert_eq!(spec, LoopSpec::default());
    }

    #[test]
    fn ignores_non_finite_bounds() {
        let mut spec = enabled(1.0, 2.0);
        assert!(!spec.set_b(f64::NAN));
        assert!(!spec.set_a(-1.0));
        assert_eq!(spec.window(), Some((1.0, 2.0)));
    }

    #[test]
    fn clamps_seeks_into_the_window() {
        let spec = enabled(2.0, 4.0);
        assert_eq!(spec.clamp_seek(1.0), 2.0);
        assert_eq!(spec.clamp_seek(3.0), 3.0);
        assert!((spec.clamp_seek(4.0) - 3.95).abs() < 1e-9);
        assert!((spec.clamp_seek(9.0) - 3.95).abs() < 1e-9);

        let disabled = LoopSpec {
            enabled: false,
            ..spec
        };
        assert_eq!(disabled.clamp_seek(9.0), 9.0);
    }

    #[test]
    fn enforce_snaps_past_a() {
        let spec = enabled(2.0, 4.0);
        assert_eq!(spec.enforce(3.0), None);
        assert!((spec.enforce(4.0).unwrap() - 2.05).abs() < 1e-9);
        assert_eq!(spec.enforce(1.0), Some(2.0));

        let tiny = enabled(1.0, 1.02);
        let target = tiny.enforce(1.5).unwrap();
        assert!(target > 1.0 && target < 1.02);
    }

    #[test]
    fn restart_needs_an_active_window() {
        let mut spec = enabled(8.0, 10.0);
        assert_eq!(spec.restart(), Some(8.0 + LOOP_EPSILON));
        spec.enabled = false;
        assert_eq!(spec.restart(), None);
    }
}

//! Scheduled parameter values, as used by gain stages.
//!
//! Events are kept sorted by time. A `LinearRamp` interpolates from the
//! previous event (or the initial value) up to its own end time.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamEvent {
    SetValue { time: f64, value: f32 },
    LinearRamp { end: f64, value: f32 },
}

impl ParamEvent {
    pub fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. } => time,
            ParamEvent::LinearRamp { end, .. } => end,
        }
    }

    pub fn value(&self) -> f32 {
        match *self {
            ParamEvent::SetValue { value, .. } | ParamEvent::LinearRamp { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamTimeline {
    initial: f32,
    events: Vec<ParamEvent>,
}

impl ParamTimeline {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    pub fn set_value_at(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::SetValue { time, value });
    }

    pub fn linear_ramp_to(&mut self, value: f32, end: f64) {
        self.insert(ParamEvent::LinearRamp { end, value });
    }

    /// Drops every event scheduled at or after `from`.
    pub fn cancel_from(&mut self, from: f64) {
        self.events.retain(|event| event.time() < from);
    }

    pub fn pending_after(&self, time: f64) -> usize {
        self.events.iter().filter(|event| event.time() > time).count()
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let next = self.events.partition_point(|event| event.time() <= time);
        let (prev_time, prev_value) = match next.checked_sub(1) {
            Some(index) => (self.events[index].time(), self.events[index].value()),
            None => (f64::NEG_INFINITY, self.initial),
        };

        match self.events.get(next) {
            Some(&ParamEvent::LinearRamp { end, value }) => {
                if !prev_time.is_finite() || end <= prev_time {
                    return prev_value;
                }
                let progress = ((time - prev_time) / (end - prev_time)).clamp(0.0, 1.0) as f32;
                prev_value + (value - prev_value) * progress
            }
            _ => prev_value,
        }
    }

    fn insert(&mut self, event: ParamEvent) {
        let index = self
            .events
            .partition_point(|existing| existing.time() <= event.time());
        self.events.insert(index, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_linear_ramps() {
        let mut timeline = ParamTimeline::new(1.0);
        timeline.set_value_at(0.0, 1.0);
        timeline.linear_ramp_to(1.0, 2.0);

        assert_eq!(timeline.value_at(0.5), 1.0);
        assert_eq!(timeline.value_at(1.0), 0.0);
        assert!((timeline.value_at(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(timeline.value_at(3.0), 1.0);
    }

    #[test]
    fn cancel_keeps_earlier_events() {
        let mut timeline = ParamTimeline::new(0.0);
        timeline.set_value_at(0.5, 0.0);
        timeline.linear_ramp_to(1.0, 1.0);
        timeline.cancel_from(0.5);

        assert_eq!(timeline.pending_after(0.0), 0);
        assert_eq!(timeline.value_at(2.0), 0.5);
    }
}

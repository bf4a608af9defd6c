//! Draw routines for the background and the three visual modes.

use std::f32::consts::TAU;

use super::canvas::{Blend, Canvas, ColorStop, Paint, Point, Rect, Rgba};
use crate::{analysis::EnergyState, config::Theme};

/// Beat rings are drawn only above this energy.
pub const RING_ENERGY_GATE: f32 = 0.12;
const FLASH_OVERLAY_GATE: f32 = 0.05;
const WAVE_MAX_POINTS: usize = 512;

/// Everything a scene needs for one frame, in backing-store pixels.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub width: f32,
    pub height: f32,
    pub time: f32,
    pub rotation: f32,
    pub theme: Theme,
    pub sensitivity: f32,
    pub bar_count: usize,
    pub beat: &'a EnergyState,
}

impl FrameInputs<'_> {
    fn short_side(&self) -> f32 {
        self.width.min(self.height)
    }

    fn neon(&self) -> bool {
        self.theme.is_neon()
    }
}

/// Outer glow emitted alongside each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlowStyle {
    pub blur: f32,
    pub color: Rgba,
}

impl GlowStyle {
    /// CSS `box-shadow` value.
    pub fn to_css(&self) -> String {
        format!("0 0 {:.2}px {}", self.blur, self.color.to_css())
    }
}

pub fn glow_style(width: f32, height: f32, theme: Theme, beat: &EnergyState) -> GlowStyle {
    let s = width.min(height);
    let blur = s * 0.008 + s * 0.06 * (beat.flash + beat.energy * 0.7);
    let alpha = (0.15 + beat.flash * 0.6 + beat.energy * 0.3).min(0.9);
    let color = if theme.is_neon() {
        Rgba::rgb8(0, 229, 255, alpha)
    } else {
        Rgba::rgb8(96, 165, 250, alpha)
    };
    GlowStyle { blur, color }
}

/// Camera offset for this frame; each axis stays within 2% of the short side.
pub fn shake_offset(
    width: f32,
    height: f32,
    beat: &EnergyState,
    rng: &mut fastrand::Rng,
) -> (f32, f32) {
    let s = width.min(height);
    let amount = s * 0.005 * (beat.flash * 0.8 + beat.energy * 0.4);
    let limit = s * 0.02;
    let mut axis = || ((rng.f32() - 0.5) * amount * 2.0).clamp(-limit, limit);
    let dx = axis();
    let dy = axis();
    (dx, dy)
}

/// Mean of the first 64 bins, normalised.
pub fn level_from_frequency(data: &[f32]) -> f32 {
    let len = data.len().min(64);
    if len == 0 {
        return 0.0;
    }
    (data[..len].iter().sum::<f32>() / len as f32 / 255.0).min(1.0)
}

/// Mean deviation from the midline, normalised.
pub fn level_from_time_domain(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let sum: f32 = data
        .iter()
        .map(|v| (*v as f32 - 128.0).abs() * 2.0)
        .sum();
    (sum / data.len() as f32 / 255.0).min(1.0)
}

/// Gradient backdrop, radial glow, flash overlay and baseline.
pub fn draw_background(canvas: &mut dyn Canvas, frame: &FrameInputs<'_>, level: f32) {
    let (w, h) = (frame.width, frame.height);
    let neon = frame.neon();
    let energy = frame.beat.energy;
    let flash = frame.beat.flash;

    let top = Rgba::rgb8(15, 23, 42, if neon { 0.92 } else { 0.96 });
    let mid_alpha = 0.16 + level * 0.25 + energy * 0.15 + flash * 0.25;
    let bottom_alpha = 0.22 + level * 0.3 + energy * 0.18 + flash * 0.2;
    let (mid, bottom) = if neon {
        (Rgba::rgb8(56, 189, 248, mid_alpha), Rgba::rgb8(16, 185, 129, bottom_alpha))
    } else {
        (Rgba::rgb8(59, 130, 246, mid_alpha), Rgba::rgb8(8, 47, 73, bottom_alpha))
    };
    let backdrop = Paint::Linear {
        start: Point::new(0.0, 0.0),
        end: Point::new(0.0, h),
        stops: vec![
            ColorStop::new(0.0, top),
            ColorStop::new(0.45 + (frame.time * 0.5).sin() * 0.04, mid),
            ColorStop::new(1.0, bottom),
        ],
    };
    canvas.fill_rect(Rect::new(0.0, 0.0, w, h), &backdrop);

    let center = Point::new(w / 2.0, h * 0.55);
    let base_radius = frame.short_side() * 0.35;
    let pulse = 0.1 + level * 0.9 + energy * 0.6 + flash * 0.7;
    let glow = if neon {
        Rgba::rgb8(56, 189, 248, 0.35 + pulse * 0.4)
    } else {
        Rgba::rgb8(96, 165, 250, 0.3 + pulse * 0.4)
    };
    let radial = Paint::Radial {
        center,
        inner: base_radius * 0.1,
        outer: base_radius * (0.7 + pulse * 0.4),
        stops: vec![ColorStop::new(0.0, glow), ColorStop::new(1.0, Rgba::TRANSPARENT)],
    };
    canvas.set_blend(Blend::Lighter);
    canvas.fill_rect(Rect::new(0.0, 0.0, w, h), &radial);
    canvas.set_blend(Blend::SourceOver);

    if flash > FLASH_OVERLAY_GATE {
        canvas.save();
        canvas.set_blend(Blend::Screen);
        canvas.set_global_alpha(flash * 0.25);
        let wash = if neon {
            Rgba::rgb8(56, 189, 248, 0.9)
        } else {
            Rgba::rgb8(148, 163, 184, 0.9)
        };
        canvas.fill_rect(Rect::new(0.0, 0.0, w, h), &Paint::Solid(wash));
        canvas.restore();
    }

    canvas.save();
    canvas.set_global_alpha(0.24 + level * 0.2 + energy * 0.15);
    let line = if neon {
        Rgba::rgb8(0x38, 0xbd, 0xf8, 1.0)
    } else {
        Rgba::rgb8(0x60, 0xa5, 0xfa, 1.0)
    };
    canvas.fill_rect(Rect::new(0.0, h * 0.92, w, 1.5), &Paint::Solid(line));
    canvas.restore();
}

/// Three expanding rings around the glow centre; drawn only above the
/// energy gate. Returns whether anything was drawn.
pub fn draw_beat_rings(canvas: &mut dyn Canvas, frame: &FrameInputs<'_>) -> bool {
    let energy = frame.beat.energy;
    if energy <= RING_ENERGY_GATE {
        return false;
    }
    let flash = frame.beat.flash;
    let center = Point::new(frame.width / 2.0, frame.height * 0.55);
    let base_radius = frame.short_side() * 0.35;
    let inner = base_radius * 0.78;
    let outer = base_radius * (1.1 + energy * 0.8 + flash * 0.6);

    for ring in 0..3 {
        let k = ring as f32 / 3.0;
        let radius = inner + (outer - inner) * k;
        let alpha = (0.18 - k * 0.06) * (0.6 + energy * 0.8 + flash * 0.6);
        let color = if frame.neon() {
            Rgba::rgb8(56, 189, 248, alpha)
        } else {
            Rgba::rgb8(129, 140, 248, alpha)
        };
        canvas.stroke_circle(center, radius, 1.2, color);
    }
    true
}

/// Mean of bar `index` over `step` consecutive bins.
fn bucket(data: &[f32], index: usize, step: usize) -> f32 {
    let start = (index * step).min(data.len());
    let end = (start + step).min(data.len());
    data[start..end].iter().sum::<f32>() / step as f32
}

pub fn draw_bars(canvas: &mut dyn Canvas, frame: &FrameInputs<'_>, data: &[f32]) {
    let (w, h) = (frame.width, frame.height);
    let count = frame.bar_count.max(1);
    let step = (data.len() / count).max(1);
    let usable = w * 0.9;
    let offset_x = (w - usable) / 2.0;
    let slot = usable / count as f32;
    let bar_width = slot * 0.7;
    let neon = frame.neon();
    let beat = frame.beat;

    canvas.save();
    if neon {
        canvas.set_shadow(22.0, Rgba::rgb8(56, 189, 248, 0.9));
    } else {
        canvas.set_shadow(16.0, Rgba::rgb8(96, 165, 250, 0.8));
    }

    let baseline = h * 0.02;
    let gain = 1.0 + beat.flash * 0.5 + beat.low * 0.15;
    let hue_base = if neon { 190.0 } else { 215.0 };

    for i in 0..count {
        let value = bucket(data, i, step) * frame.sensitivity;
        let normalized = (value / 255.0).min(1.0);
        let bar_height = normalized * h * 0.85 * gain;
        let x = offset_x + i as f32 * slot;
        let hue = hue_base + i as f32 * 0.9 + normalized * 35.0 + beat.high * 20.0;

        // Bars grow upwards from the baseline.
        let bottom_y = h - baseline;
        let top_y = bottom_y - bar_height;
        let paint = Paint::Linear {
            start: Point::new(x, bottom_y),
            end: Point::new(x, h - bar_height),
            stops: vec![
                ColorStop::new(
                    0.0,
                    Rgba::new(1.0, 1.0, 1.0, 0.1 + normalized * 0.3 + beat.flash * 0.2),
                ),
                ColorStop::new(0.3, Rgba::hsla(hue, 90.0, 65.0, 0.95)),
                ColorStop::new(1.0, Rgba::hsla(hue + 20.0, 90.0, 55.0, 0.9)),
            ],
        };
        canvas.fill_rect(Rect::new(x, top_y, bar_width, bar_height), &paint);

        if bar_height > 4.0 {
            let cap = Rgba::rgb8(248, 250, 252, 0.5 + normalized * 0.4 + beat.flash * 0.2);
            canvas.fill_rect(Rect::new(x, top_y, bar_width, 3.0), &Paint::Solid(cap));
        }
    }

    canvas.set_global_alpha(0.08 + beat.low * 0.1);
    let band = if neon {
        Rgba::rgb8(0x38, 0xbd, 0xf8, 1.0)
    } else {
        Rgba::rgb8(0x93, 0xc5, 0xfd, 1.0)
    };
    canvas.fill_rect(
        Rect::new(offset_x, h - baseline * 6.0, usable, baseline * 6.0),
        &Paint::Solid(band),
    );
    canvas.restore();
}

pub fn draw_circle(canvas: &mut dyn Canvas, frame: &FrameInputs<'_>, data: &[f32]) {
    let count = frame.bar_count.max(1);
    let step = (data.len() / count).max(1);
    let center = Point::new(frame.width / 2.0, frame.height / 2.0);
    let base_radius = frame.short_side() * 0.22;
    let max_extra = frame.short_side() * 0.28;
    let neon = frame.neon();
    let beat = frame.beat;
    let t = frame.time;

    canvas.save();
    if neon {
        canvas.set_shadow(20.0, Rgba::rgb8(56, 189, 248, 0.9));
    } else {
        canvas.set_shadow(14.0, Rgba::rgb8(129, 140, 248, 0.8));
    }

    let extra_scale = 1.0 + beat.flash * 0.4 + beat.energy * 0.25;
    let wobble = (t * 0.4).sin() * 0.05;
    let hue_base = if neon { 185.0 } else { 215.0 };

    for i in 0..count {
        let value = bucket(data, i, step) * frame.sensitivity;
        let normalized = (value / 255.0).min(1.0);
        let angle = i as f32 / count as f32 * TAU + frame.rotation + wobble;
        let radius = (base_radius + normalized * max_extra) * extra_scale;
        let (sin, cos) = angle.sin_cos();
        let inner = Point::new(
            center.x + cos * base_radius * 0.98,
            center.y + sin * base_radius * 0.98,
        );
        let outer = Point::new(center.x + cos * radius, center.y + sin * radius);
        let color = Rgba::hsla(
            hue_base + i as f32 * 1.2,
            95.0,
            50.0 + normalized * 15.0 + beat.flash * 20.0,
            0.6 + normalized * 0.3,
        );
        canvas.stroke_polyline(&[inner, outer], 2.0, color);
    }

    let (halo_shadow, ring_color) = if neon {
        (Rgba::rgb8(56, 189, 248, 0.9), Rgba::rgb8(56, 189, 248, 0.85))
    } else {
        (Rgba::rgb8(96, 165, 250, 0.85), Rgba::rgb8(148, 163, 184, 0.9))
    };
    canvas.set_shadow(if neon { 30.0 } else { 20.0 }, halo_shadow);
    let halo_radius = base_radius * (0.94 + (t * 0.9).sin() * 0.03 + beat.energy * 0.1);
    canvas.stroke_circle(center, halo_radius, 3.0, ring_color);

    canvas.set_global_alpha(0.3 + beat.flash * 0.2);
    let outer_radius = base_radius * (1.35 + (t * 0.4).sin() * 0.05);
    canvas.stroke_circle(center, outer_radius, 1.2, ring_color);
    canvas.restore();
}

/// At most `max` evenly strided samples.
fn downsample(data: &[u8], max: usize) -> Vec<u8> {
    if data.len() <= max {
        return data.to_vec();
    }
    let stride = data.len() as f32 / max as f32;
    (0..max)
        .map(|i| data[((i as f32 * stride) as usize).min(data.len() - 1)])
        .collect()
}

pub fn draw_wave(canvas: &mut dyn Canvas, frame: &FrameInputs<'_>, data: &[u8]) {
    let samples = downsample(data, WAVE_MAX_POINTS);
    if samples.len() < 2 {
        return;
    }
    let (w, h) = (frame.width, frame.height);
    let neon = frame.neon();
    let beat = frame.beat;
    let t = frame.time;

    let mid_y = h * (0.5 + (t * 0.6).sin() * 0.05);
    let main_amp = h * (0.4 + beat.flash * 0.3 + beat.mid * 0.15);
    let sub_amp = h * (0.25 + beat.mid * 0.1);
    let last = (samples.len() - 1) as f32;
    let trace = |amp: f32, lift: &dyn Fn(usize) -> f32| -> Vec<Point> {
        samples
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let x = i as f32 / last * w;
                Point::new(x, mid_y + (*v as f32 / 255.0 - 0.5) * amp + lift(i))
            })
            .collect()
    };

    canvas.save();
    if neon {
        canvas.set_shadow(24.0, Rgba::rgb8(56, 189, 248, 0.9));
    } else {
        canvas.set_shadow(18.0, Rgba::rgb8(96, 165, 250, 0.9));
    }
    let stroke = if neon {
        Rgba::rgb8(244, 244, 245, 0.98)
    } else {
        Rgba::rgb8(248, 250, 252, 0.96)
    };
    canvas.stroke_polyline(&trace(main_amp, &|_: usize| 0.0), 2.2, stroke);
    canvas.restore();

    let fill_top = if neon {
        Rgba::rgb8(56, 189, 248, 0.35 + beat.flash * 0.4)
    } else {
        Rgba::rgb8(96, 165, 250, 0.32 + beat.flash * 0.35)
    };
    let mut area = trace(main_amp * 0.85, &|_: usize| 0.0);
    area.push(Point::new(w, h));
    area.push(Point::new(0.0, h));
    let fill = Paint::Linear {
        start: Point::new(0.0, mid_y),
        end: Point::new(0.0, h),
        stops: vec![
            ColorStop::new(0.0, fill_top),
            ColorStop::new(1.0, Rgba::rgb8(15, 23, 42, 0.0)),
        ],
    };
    canvas.fill_polygon(&area, &fill);

    let flash = beat.flash;
    let shimmer = trace(sub_amp, &|i: usize| {
        10.0 + (t * 0.8 + i as f32 * 0.08).sin() * 4.0 * flash
    });
    let color = Rgba::rgb8(148, 163, 184, if neon { 0.5 } else { 0.4 });
    canvas.stroke_polyline(&shimmer, 1.0, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat(energy: f32, flash: f32) -> EnergyState {
        EnergyState {
            energy,
            flash,
            ..EnergyState::default()
        }
    }

    #[test]
    fn glow_grows_with_flash_and_caps_alpha() {
        let calm = glow_style(1000.0, 500.0, Theme::Dark, &beat(0.0, 0.0));
        assert!((calm.blur - 4.0).abs() < 1e-4);
        assert!((calm.color.a - 0.15).abs() < 1e-6);

        let loud = glow_style(1000.0, 500.0, Theme::Neon, &beat(1.0, 1.0));
        assert!(loud.blur > calm.blur);
        assert_eq!(loud.color.a, 0.9);
        assert!(loud.to_css().starts_with("0 0 "));
    }

    #[test]
    fn shake_is_clamped_to_the_short_side() {
        let mut rng = fastrand::Rng::with_seed(7);
        let state = beat(1.0, 8.0);
        for _ in 0..200 {
            let (dx, dy) = shake_offset(800.0, 400.0, &state, &mut rng);
            assert!(dx.abs() <= 8.0 + 1e-4 && dy.abs() <= 8.0 + 1e-4);
        }
        let still = shake_offset(800.0, 400.0, &EnergyState::default(), &mut rng);
        assert_eq!(still, (0.0, 0.0));
    }

    #[test]
    fn levels() {
        assert_eq!(level_from_frequency(&[]), 0.0);
        let mut bins = vec![255.0; 64];
        bins.extend(vec![0.0; 64]);
        assert_eq!(level_from_frequency(&bins), 1.0);

        assert_eq!(level_from_time_domain(&[128; 32]), 0.0);
        let swing = [0u8, 255];
        assert!(level_from_time_domain(&swing) > 0.99);
    }

    #[test]
    fn downsampling_keeps_short_buffers() {
        assert_eq!(downsample(&[1, 2, 3], 8), vec![1, 2, 3]);
        let long: Vec<u8> = (0..=255).collect();
        let short = downsample(&long, 64);
        assert_eq!(short.len(), 64);
        assert_eq!(short[0], 0);
        assert_eq!(short[1], 4);
    }

    #[test]
    fn bucket_averages_over_step() {
        let data = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(bucket(&data, 0, 2), 15.0);
        assert_eq!(bucket(&data, 2, 2), 25.0);
        assert_eq!(bucket(&data, 9, 2), 0.0);
    }
}

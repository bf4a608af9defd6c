//! 2D drawing surface used by the scenes.

use serde::{Deserialize, Serialize};

/// Straight (non-premultiplied) colour with components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// 8-bit channels plus a unit alpha, as in CSS `rgba()`.
    pub fn rgb8(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self::new(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a.clamp(0.0, 1.0),
        )
    }

    /// CSS `hsla()`: hue in degrees, saturation and lightness in percent.
    pub fn hsla(hue: f32, saturation: f32, lightness: f32, alpha: f32) -> Self {
        let h = hue.rem_euclid(360.0) / 360.0;
        let s = (saturation / 100.0).clamp(0.0, 1.0);
        let l = (lightness / 100.0).clamp(0.0, 1.0);
        if s == 0.0 {
            return Self::new(l, l, l, alpha.clamp(0.0, 1.0));
        }
        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        Self::new(
            hue_channel(p, q, h + 1.0 / 3.0),
            hue_channel(p, q, h),
            hue_channel(p, q, h - 1.0 / 3.0),
            alpha.clamp(0.0, 1.0),
        )
    }

    pub fn lerp(self, other: Rgba, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
            self.a + (other.a - self.a) * t,
        )
    }

    /// CSS-style `rgba(r, g, b, a)` string.
    pub fn to_css(&self) -> String {
        format!(
            "rgba({}, {}, {}, {:.3})",
            (self.r * 255.0).round() as u8,
            (self.g * 255.0).round() as u8,
            (self.b * 255.0).round() as u8,
            self.a
        )
    }
}

fn hue_channel(p: f32, q: f32, t: f32) -> f32 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub offset: f32,
    pub color: Rgba,
}

impl ColorStop {
    pub const fn new(offset: f32, color: Rgba) -> Self {
        Self { offset, color }
    }
}

/// Fill source: flat colour or a gradient in user space.
#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    Solid(Rgba),
    Linear {
        start: Point,
        end: Point,
        stops: Vec<ColorStop>,
    },
    Radial {
        center: Point,
        inner: f32,
        outer: f32,
        stops: Vec<ColorStop>,
    },
}

impl Paint {
    /// Colour of the paint at `point`.
    pub fn color_at(&self, point: Point) -> Rgba {
        match self {
            Paint::Solid(color) => *color,
            Paint::Linear { start, end, stops } => {
                let dx = end.x - start.x;
                let dy = end.y - start.y;
                let len_sq = dx * dx + dy * dy;
                if len_sq <= f32::EPSILON {
                    return sample_stops(stops, 0.0);
                }
                let t = ((point.x - start.x) * dx + (point.y - start.y) * dy) / len_sq;
                sample_stops(stops, t)
            }
            Paint::Radial {
                center,
                inner,
                outer,
                stops,
            } => {
                let distance = ((point.x - center.x).powi(2) + (point.y - center.y).powi(2)).sqrt();
                let span = (outer - inner).max(f32::EPSILON);
                sample_stops(stops, (distance - inner) / span)
            }
        }
    }
}

fn sample_stops(stops: &[ColorStop], t: f32) -> Rgba {
    let t = t.clamp(0.0, 1.0);
    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return Rgba::TRANSPARENT;
    };
    if t <= first.offset {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.offset {
            let span = (b.offset - a.offset).max(f32::EPSILON);
            return a.color.lerp(b.color, (t - a.offset) / span);
        }
    }
    last.color
}

/// Compositing operator for subsequent draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Blend {
    #[default]
    SourceOver,
    /// Additive, as in `lighter`.
    Lighter,
    Screen,
}

/// Immediate-mode drawing target. Coordinates are backing-store pixels.
///
/// `save`/`restore` cover the translation, global alpha, blend mode and
/// shadow.
pub trait Canvas {
    fn size(&self) -> (u32, u32);
    /// Resizes the backing store, clearing it.
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, dx: f32, dy: f32);
    fn set_global_alpha(&mut self, alpha: f32);
    fn set_blend(&mut self, blend: Blend);
    fn set_shadow(&mut self, blur: f32, color: Rgba);
    fn fill_rect(&mut self, rect: Rect, paint: &Paint);
    /// Fills a closed polygon using the even-odd rule.
    fn fill_polygon(&mut self, points: &[Point], paint: &Paint);
    fn stroke_polyline(&mut self, points: &[Point], width: f32, color: Rgba);
    fn stroke_circle(&mut self, center: Point, radius: f32, width: f32, color: Rgba);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Rgba, b: Rgba) -> bool {
        (a.r - b.r).abs() < 1e-3 && (a.g - b.g).abs() < 1e-3 && (a.b - b.b).abs() < 1e-3
    }

    #[test]
    fn hsla_matches_css() {
        assert!(close(Rgba::hsla(0.0, 100.0, 50.0, 1.0), Rgba::new(1.0, 0.0, 0.0, 1.0)));
        assert!(close(Rgba::hsla(120.0, 100.0, 50.0, 1.0), Rgba::new(0.0, 1.0, 0.0, 1.0)));
        assert!(close(Rgba::hsla(600.0, 100.0, 50.0, 1.0), Rgba::new(0.0, 0.0, 1.0, 1.0)));
        assert!(close(Rgba::hsla(42.0, 0.0, 30.0, 1.0), Rgba::new(0.3, 0.3, 0.3, 1.0)));
    }

    #[test]
    fn gradients_interpolate_between_stops() {
        let black = Rgba::new(0.0, 0.0, 0.0, 1.0);
        let white = Rgba::new(1.0, 1.0, 1.0, 1.0);
        let paint = Paint::Linear {
            start: Point::new(0.0, 0.0),
            end: Point::new(0.0, 100.0),
            stops: vec![ColorStop::new(0.0, black), ColorStop::new(1.0, white)],
        };
        assert!(close(paint.color_at(Point::new(50.0, 50.0)), Rgba::new(0.5, 0.5, 0.5, 1.0)));
        assert!(close(paint.color_at(Point::new(0.0, 500.0)), white));

        let radial = Paint::Radial {
            center: Point::new(0.0, 0.0),
            inner: 10.0,
            outer: 20.0,
            stops: vec![ColorStop::new(0.0, white), ColorStop::new(1.0, black)],
        };
        assert!(close(radial.color_at(Point::new(5.0, 0.0)), white));
        assert!(close(radial.color_at(Point::new(0.0, 15.0)), Rgba::new(0.5, 0.5, 0.5, 1.0)));
    }

    #[test]
    fn css_rendering() {
        assert_eq!(Rgba::rgb8(0, 229, 255, 0.5).to_css(), "rgba(0, 229, 255, 0.500)");
    }
}

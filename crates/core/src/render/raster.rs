//! Software [`Canvas`] over an RGBA float buffer. Shadows are tracked but not
//! rasterised.

use std::io::Write;

use super::canvas::{Blend, Canvas, Paint, Point, Rect, Rgba};

#[derive(Debug, Clone, Copy)]
struct DrawState {
    offset: (f32, f32),
    alpha: f32,
    blend: Blend,
    shadow: (f32, Rgba),
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            offset: (0.0, 0.0),
            alpha: 1.0,
            blend: Blend::SourceOver,
            shadow: (0.0, Rgba::TRANSPARENT),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PixelCanvas {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
    state: DrawState,
    stack: Vec<DrawState>,
}

impl PixelCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgba::TRANSPARENT; width as usize * height as usize],
            state: DrawState::default(),
            stack: Vec::new(),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Blur radius and colour of the current shadow.
    pub fn shadow(&self) -> (f32, Rgba) {
        self.state.shadow
    }

    /// Pixels flattened onto opaque black, 8 bits per channel.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 3);
        for px in &self.pixels {
            for channel in [px.r, px.g, px.b] {
                out.push(((channel * px.a).clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
        out
    }

    /// Writes a binary PPM (P6) image.
    pub fn write_ppm<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        out.write_all(&self.to_rgb8())
    }

    /// Mean luminance of the flattened image in [0, 1].
    pub fn mean_luminance(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .pixels
            .iter()
            .map(|px| (0.2126 * px.r + 0.7152 * px.g + 0.0722 * px.b) * px.a)
            .sum();
        sum / self.pixels.len() as f32
    }

    fn blend_pixel(&mut self, x: i64, y: i64, color: Rgba, coverage: f32) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let src_a = (color.a * coverage * self.state.alpha).clamp(0.0, 1.0);
        if src_a <= 0.0 {
            return;
        }
        let index = y as usize * self.width as usize + x as usize;
        let dst = self.pixels[index];

        self.pixels[index] = match self.state.blend {
            Blend::SourceOver => {
                let out_a = src_a + dst.a * (1.0 - src_a);
                let mix = |s: f32, d: f32| (s * src_a + d * dst.a * (1.0 - src_a)) / out_a;
                Rgba::new(mix(color.r, dst.r), mix(color.g, dst.g), mix(color.b, dst.b), out_a)
            }
            Blend::Lighter => {
                let out_a = (src_a + dst.a).min(1.0);
                let add = |s: f32, d: f32| ((s * src_a + d * dst.a) / out_a).min(1.0);
                Rgba::new(add(color.r, dst.r), add(color.g, dst.g), add(color.b, dst.b), out_a)
            }
            Blend::Screen => {
                let out_a = src_a + dst.a * (1.0 - src_a);
                let screen = |s: f32, d: f32| {
                    let (s, d) = (s * src_a, d * dst.a);
                    (s + d - s * d) / out_a
                };
                Rgba::new(
                    screen(color.r, dst.r),
                    screen(color.g, dst.g),
                    screen(color.b, dst.b),
                    out_a,
                )
            }
        };
    }

    fn to_user(&self, x: i64, y: i64) -> Point {
        Point::new(
            x as f32 + 0.5 - self.state.offset.0,
            y as f32 + 0.5 - self.state.offset.1,
        )
    }

    /// Pixels whose centres fall in `[lo, hi)`, clipped to the canvas.
    fn span(&self, lo: f32, hi: f32, limit: u32) -> (i64, i64) {
        let lo = ((lo - 0.5).ceil() as i64).max(0);
        let hi = ((hi - 0.5).ceil() as i64).min(limit as i64);
        (lo, hi)
    }
}

impl Canvas for PixelCanvas {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![Rgba::TRANSPARENT; width as usize * height as usize];
    }

    fn clear(&mut self) {
        self.pixels.fill(Rgba::TRANSPARENT);
    }

    fn save(&mut self) {
        self.stack.push(self.state);
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        self.state.offset.0 += dx;
        self.state.offset.1 += dy;
    }

    fn set_global_alpha(&mut self, alpha: f32) {
        self.state.alpha = alpha.clamp(0.0, 1.0);
    }

    fn set_blend(&mut self, blend: Blend) {
        self.state.blend = blend;
    }

    fn set_shadow(&mut self, blur: f32, color: Rgba) {
        self.state.shadow = (blur.max(0.0), color);
    }

    fn fill_rect(&mut self, rect: Rect, paint: &Paint) {
        let (ox, oy) = self.state.offset;
        let (x0, x1) = self.span(rect.x + ox, rect.x + rect.width + ox, self.width);
        let (y0, y1) = self.span(rect.y + oy, rect.y + rect.height + oy, self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let color = paint.color_at(self.to_user(x, y));
                self.blend_pixel(x, y, color, 1.0);
            }
        }
    }

    fn fill_polygon(&mut self, points: &[Point], paint: &Paint) {
        if points.len() < 3 {
            return;
        }
        let (ox, oy) = self.state.offset;
        let device: Vec<Point> = points.iter().map(|p| Point::new(p.x + ox, p.y + oy)).collect();
        let min_y = device.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let max_y = device.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
        let (y0, y1) = self.span(min_y, max_y, self.height);

        let mut crossings = Vec::new();
        for y in y0..y1 {
            let scan = y as f32 + 0.5;
            crossings.clear();
            for (i, a) in device.iter().enumerate() {
                let b = device[(i + 1) % device.len()];
                if (a.y <= scan && b.y > scan) || (b.y <= scan && a.y > scan) {
                    crossings.push(a.x + (scan - a.y) / (b.y - a.y) * (b.x - a.x));
                }
            }
            crossings.sort_by(f32::total_cmp);
            for pair in crossings.chunks_exact(2) {
                let (x0, x1) = self.span(pair[0], pair[1], self.width);
                for x in x0..x1 {
                    let color = paint.color_at(self.to_user(x, y));
                    self.blend_pixel(x, y, color, 1.0);
                }
            }
        }
    }

    fn stroke_polyline(&mut self, points: &[Point], width: f32, color: Rgba) {
        let half = width.max(0.5) * 0.5;
        let (ox, oy) = self.state.offset;
        for pair in points.windows(2) {
            let a = Point::new(pair[0].x + ox, pair[0].y + oy);
            let b = Point::new(pair[1].x + ox, pair[1].y + oy);
            let reach = half + 1.0;
            let (x0, x1) = self.span(a.x.min(b.x) - reach, a.x.max(b.x) + reach, self.width);
            let (y0, y1) = self.span(a.y.min(b.y) - reach, a.y.max(b.y) + reach, self.height);
            for y in y0..y1 {
                for x in x0..x1 {
                    let p = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                    let coverage = (half - segment_distance(p, a, b) + 0.5).clamp(0.0, 1.0);
                    if coverage > 0.0 {
                        self.blend_pixel(x, y, color, coverage);
                    }
                }
            }
        }
    }

    fn stroke_circle(&mut self, center: Point, radius: f32, width: f32, color: Rgba) {
        let half = width.max(0.5) * 0.5;
        let (ox, oy) = self.state.offset;
        let c = Point::new(center.x + ox, center.y + oy);
        let reach = radius + half + 1.0;
        let (x0, x1) = self.span(c.x - reach, c.x + reach, self.width);
        let (y0, y1) = self.span(c.y - reach, c.y + reach, self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - c.x;
                let dy = y as f32 + 0.5 - c.y;
                let ring = ((dx * dx + dy * dy).sqrt() - radius).abs();
                let coverage = (half - ring + 0.5).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    self.blend_pixel(x, y, color, coverage);
                }
            }
        }
    }
}

fn segment_distance(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + dx * t, a.y + dy * t);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

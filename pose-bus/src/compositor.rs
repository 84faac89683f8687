use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use crate::types::{Color, PoseEstimate};

/// Draw surface for estimates. `begin_frame` clears it, `render` is called
/// once per model in draw order, `finish_frame` presents it.
pub trait Compositor: Send {
    fn begin_frame(&mut self, width: u32, height: u32);

    fn render(&mut self, estimates: &[PoseEstimate], color: Color, min_confidence: f64);

    fn finish_frame(&mut self) {}
}

/// Drops everything; for headless runs.
#[derive(Default)]
pub struct NullCompositor;

impl Compositor for NullCompositor {
    fn begin_frame(&mut self, _width: u32, _height: u32) {}

    fn render(&mut self, _estimates: &[PoseEstimate], _color: Color, _min_confidence: f64) {}
}

/// COCO-17 limb pairs, drawn when an estimate has exactly 17 keypoints.
pub const COCO_SKELETON: [[usize; 2]; 16] = [
    [15, 13],
    [13, 11],
    [16, 14],
    [14, 12],
    [11, 12],
    [5, 11],
    [6, 12],
    [5, 6],
    [5, 7],
    [6, 8],
    [7, 9],
    [8, 10],
    [0, 1],
    [0, 2],
    [1, 3],
    [2, 4],
];

const POINT_RADIUS: i32 = 3;
const LINE_HALF_WIDTH: i32 = 1;

/// One finished overlay, RGBA with a transparent background.
#[derive(Clone, Debug, Default)]
pub struct OverlayImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Bytes,
}

impl OverlayImage {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.rgba.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    pub fn to_jpeg(&self, quality: u8) -> anyhow::Result<Vec<u8>> {
        let (width, height) = (
            u16::try_from(self.width).map_err(|_| anyhow::anyhow!("overlay too wide"))?,
            u16::try_from(self.height).map_err(|_| anyhow::anyhow!("overlay too tall"))?,
        );
        let mut out = Vec::new();
        jpeg_encoder::Encoder::new(&mut out, quality)
            .encode(&self.rgba, width, height, jpeg_encoder::ColorType::Rgba)
            .map_err(|e| anyhow::anyhow!("overlay jpeg encode: {}", e))?;
        Ok(out)
    }
}

pub type OverlayReceiver = watch::Receiver<Option<Arc<OverlayImage>>>;

/// Software raster compositor. Each finished frame is published to watchers.
pub struct OverlayCompositor {
    width: u32,
    height: u32,
    surface: Vec<u8>,
    published: watch::Sender<Option<Arc<OverlayImage>>>,
}

impl OverlayCompositor {
    pub fn new() -> (Self, OverlayReceiver) {
        let (published, receiver) = watch::channel(None);
        (
            Self {
                width: 0,
                height: 0,
                surface: Vec::new(),
                published,
            },
            receiver,
        )
    }

    fn put(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.surface[i..i + 4].copy_from_slice(&[color.r, color.g, color.b, 255]);
    }

    fn fill_square(&mut self, cx: i32, cy: i32, half: i32, color: Color) {
        for y in cy - half..=cy + half {
            for x in cx - half..=cx + half {
                self.put(x, y, color);
            }
        }
    }

    /// Whether anything drawn within `margin` of `(x, y)` lands on the surface.
    fn reaches_surface(&self, (x, y): (f64, f64), margin: f64) -> bool {
        x >= -margin
            && y >= -margin
            && x <= self.width as f64 - 1.0 + margin
            && y <= self.height as f64 - 1.0 + margin
    }

    fn fill_circle(&mut self, center: (f64, f64), r: i32, color: Color) {
        if !self.reaches_surface(center, r as f64) {
            return;
        }
        let (cx, cy) = (center.0.round() as i32, center.1.round() as i32);
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy <= r * r {
                    self.put(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// Liang-Barsky: the part of `p`-`q` inside the surface grown by `margin`.
    fn clip_segment(
        &self,
        p: (f64, f64),
        q: (f64, f64),
        margin: f64,
    ) -> Option<((f64, f64), (f64, f64))> {
        let (dx, dy) = (q.0 - p.0, q.1 - p.1);
        if !dx.is_finite() || !dy.is_finite() {
            return None;
        }
        let (x_max, y_max) = (
            self.width as f64 - 1.0 + margin,
            self.height as f64 - 1.0 + margin,
        );
        let (mut t0, mut t1) = (0.0f64, 1.0f64);
        for (pk, qk) in [
            (-dx, p.0 + margin),
            (dx, x_max - p.0),
            (-dy, p.1 + margin),
            (dy, y_max - p.1),
        ] {
            if pk == 0.0 {
                if qk < 0.0 {
                    return None;
                }
                continue;
            }
            let t = qk / pk;
            if pk < 0.0 {
                t0 = t0.max(t);
            } else {
                t1 = t1.min(t);
            }
            if t0 > t1 {
                return None;
            }
        }
        Some((
            (p.0 + t0 * dx, p.1 + t0 * dy),
            (p.0 + t1 * dx, p.1 + t1 * dy),
        ))
    }

    fn draw_line(&mut self, p: (f64, f64), q: (f64, f64), color: Color) {
        let Some((p, q)) = self.clip_segment(p, q, LINE_HALF_WIDTH as f64) else {
            return;
        };
        let (x0, y0) = (p.0.round() as i32, p.1.round() as i32);
        let (x1, y1) = (q.0.round() as i32, q.1.round() as i32);
        // Bresenham
        let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
        let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
        let (mut x, mut y, mut err) = (x0, y0, dx + dy);
        loop {
            self.fill_square(x, y, LINE_HALF_WIDTH, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn point(estimate: &PoseEstimate, index: usize, min_confidence: f64) -> Option<(f64, f64)> {
        let kp = estimate.keypoints.get(index)?;
        if !kp.passes(min_confidence) {
            return None;
        }
        kp.position().filter(|(x, y)| x.is_finite() && y.is_finite())
    }
}

impl Compositor for OverlayCompositor {
    fn begin_frame(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.surface.clear();
        self.surface.resize(width as usize * height as usize * 4, 0);
    }

    fn render(&mut self, estimates: &[PoseEstimate], color: Color, min_confidence: f64) {
        for estimate in estimates {
            if estimate.keypoints.len() == 17 {
                for [a, b] in COCO_SKELETON {
                    if let (Some(p), Some(q)) = (
                        Self::point(estimate, a, min_confidence),
                        Self::point(estimate, b, min_confidence),
                    ) {
                        self.draw_line(p, q, color);
                    }
                }
            }
            for i in 0..estimate.keypoints.len() {
                if let Some(center) = Self::point(estimate, i, min_confidence) {
                    self.fill_circle(center, POINT_RADIUS, color);
                }
            }
        }
    }

    fn finish_frame(&mut self) {
        let image = OverlayImage {
            width: self.width,
            height: self.height,
            rgba: Bytes::copy_from_slice(&self.surface),
        };
        self.published.send_replace(Some(Arc::new(image)));
    }
}

//! raster.rs — plain RGBA8 pixel buffers
//!
//! The renderer produces bitmaps for an external map host that composites
//! them onto its own canvas, so the output is a bare width/height/pixels
//! triple rather than any image-format container.

use crate::ramp::Rgba;

/// Row-major RGBA8 bitmap. `data.len() == width * height * 4`.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Raster {
    /// Fully transparent raster.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * 4
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, c: Rgba) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.index(x, y);
        self.data[i] = c.r;
        self.data[i + 1] = c.g;
        self.data[i + 2] = c.b;
        self.data[i + 3] = c.a;
    }

    /// Out-of-range reads are transparent, mirroring `set_pixel`'s clipping.
    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        if x >= self.width || y >= self.height {
            return Rgba::TRANSPARENT;
        }
        let i = self.index(x, y);
        Rgba::new(self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3])
    }

    /// Fill an axis-aligned rect, clipped to the raster bounds.
    pub fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, c: Rgba) {
        let xa = x0.max(0) as u32;
        let ya = y0.max(0) as u32;
        let xb = (x1.min(self.width as i64)).max(0) as u32;
        let yb = (y1.min(self.height as i64)).max(0) as u32;
        for y in ya..yb {
            for x in xa..xb {
                self.set_pixel(x, y, c);
            }
        }
    }

    /// Fill a rounded rect (corner radius in pixels) — the legend panel.
    pub fn fill_round_rect(&mut self, x0: u32, y0: u32, w: u32, h: u32, radius: u32, c: Rgba) {
        let r = radius.min(w / 2).min(h / 2) as i64;
        for dy in 0..h as i64 {
            for dx in 0..w as i64 {
                // Corner test: inside the quarter-circle of the nearest corner?
                let cx = if dx < r {
                    r - 1 - dx
                } else if dx >= w as i64 - r {
                    dx - (w as i64 - r)
                } else {
                    -1
                };
                let cy = if dy < r {
                    r - 1 - dy
                } else if dy >= h as i64 - r {
                    dy - (h as i64 - r)
                } else {
                    -1
                };
                if cx >= 0 && cy >= 0 && cx * cx + cy * cy > r * r {
                    continue;
                }
                self.set_pixel(x0 + dx as u32, y0 + dy as u32, c);
            }
        }
    }

    /// Copy another raster on top of this one (no blending — source alpha
    /// wins wherever it is non-zero).
    pub fn blit(&mut self, src: &Raster, x0: u32, y0: u32) {
        for y in 0..src.height {
            for x in 0..src.width {
                let c = src.pixel(x, y);
                if c.a != 0 {
                    self.set_pixel(x0 + x, y0 + y, c);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_raster_is_transparent() {
        let r = Raster::new(4, 3);
        assert_eq!(r.data.len(), 48);
        assert_eq!(r.pixel(2, 1), Rgba::TRANSPARENT);
    }

    #[test]
    fn out_of_range_reads_are_transparent() {
        let mut r = Raster::new(4, 3);
        r.fill_rect(0, 0, 4, 3, Rgba::new(7, 7, 7, 255));
        assert_eq!(r.pixel(4, 0), Rgba::TRANSPARENT);
        assert_eq!(r.pixel(0, 3), Rgba::TRANSPARENT);
        assert_eq!(r.pixel(100, 100), Rgba::TRANSPARENT);
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut r = Raster::new(4, 4);
        r.fill_rect(-2, -2, 10, 2, Rgba::new(1, 2, 3, 255));
        assert_eq!(r.pixel(0, 0).a, 255);
        assert_eq!(r.pixel(3, 1).a, 255);
        assert_eq!(r.pixel(0, 2).a, 0);
    }

    #[test]
    fn round_rect_leaves_corners_empty() {
        let mut r = Raster::new(20, 20);
        r.fill_round_rect(0, 0, 20, 20, 8, Rgba::new(9, 9, 9, 255));
        assert_eq!(r.pixel(0, 0).a, 0); // corner clipped
        assert_eq!(r.pixel(10, 0).a, 255); // edge midpoint filled
        assert_eq!(r.pixel(10, 10).a, 255);
    }
}

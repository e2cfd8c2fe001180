//! Square grid of height-like samples covering a world rectangle.

use glam::{IVec2, Vec2};

use super::types::Rect;

/// `resolution × resolution` samples spread over `rect`.
///
/// Sample `(x, z)` sits at the center of its pixel, so a world position maps
/// to a pixel with [`Matrix::pixel_at`].
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    pub rect: Rect,
    pub resolution: u32,
    pub data: Vec<f32>,
}

impl Matrix {
    /// Create a matrix filled with `value`.
    pub fn filled(rect: Rect, resolution: u32, value: f32) -> Self {
        let resolution = resolution.max(1);
        Self {
            rect,
            resolution,
            data: vec![value; (resolution * resolution) as usize],
        }
    }

    /// Create a matrix by sampling `f` at every pixel center.
    pub fn from_fn(rect: Rect, resolution: u32, mut f: impl FnMut(Vec2) -> f32) -> Self {
        let mut matrix = Self::filled(rect, resolution, 0.0);
        for z in 0..matrix.resolution {
            for x in 0..matrix.resolution {
                let world = matrix.world_pos(x, z);
                let idx = matrix.index(x, z);
                matrix.data[idx] = f(world);
            }
        }
        matrix
    }

    /// World units covered by one pixel.
    pub fn pixel_size(&self) -> Vec2 {
        self.rect.size.as_vec2() / self.resolution as f32
    }

    #[inline]
    pub fn index(&self, x: u32, z: u32) -> usize {
        (z * self.resolution + x) as usize
    }

    pub fn get(&self, x: u32, z: u32) -> f32 {
        self.data[self.index(x, z)]
    }

    pub fn set(&mut self, x: u32, z: u32, value: f32) {
        let idx = self.index(x, z);
        self.data[idx] = value;
    }

    /// World position of a pixel center.
    pub fn world_pos(&self, x: u32, z: u32) -> Vec2 {
        self.rect.origin.as_vec2() + (Vec2::new(x as f32, z as f32) + 0.5) * self.pixel_size()
    }

    /// Pixel containing a world position, if inside the rect.
    pub fn pixel_at(&self, pos: Vec2) -> Option<(u32, u32)> {
        if !self.rect.contains(pos) {
            return None;
        }
        let local = (pos - self.rect.origin.as_vec2()) / self.pixel_size();
        let px: IVec2 = local.floor().as_ivec2();
        let max = self.resolution as i32 - 1;
        Some((px.x.clamp(0, max) as u32, px.y.clamp(0, max) as u32))
    }

    /// Nearest-sample lookup at a world position.
    pub fn sample(&self, pos: Vec2) -> Option<f32> {
        self.pixel_at(pos).map(|(x, z)| self.get(x, z))
    }

    /// Copy overlapping samples from `src`, resampling by nearest pixel.
    ///
    /// Returns the number of pixels written.
    pub fn blit_from(&mut self, src: &Matrix) -> usize {
        if !self.rect.intersects(&src.rect) {
            return 0;
        }
        let mut written = 0;
        for z in 0..self.resolution {
            for x in 0..self.resolution {
                if let Some(v) = src.sample(self.world_pos(x, z)) {
                    self.set(x, z, v);
                    written += 1;
                }
            }
        }
        written
    }

    /// Add `other * weight` sample-wise. Both must share rect and resolution.
    pub fn add_weighted(&mut self, other: &Matrix, weight: Option<&Matrix>) {
        debug_assert_eq!(self.resolution, other.resolution);
        for (i, v) in self.data.iter_mut().enumerate() {
            let w = weight.map_or(1.0, |w| w.data[i]);
            *v += other.data[i] * w;
        }
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(origin: i32, size: i32) -> Rect {
        Rect::new(IVec2::splat(origin), IVec2::splat(size))
    }

    #[test]
    fn test_from_fn_samples_pixel_centers() {
        let m = Matrix::from_fn(rect(0, 4), 4, |p| p.x);
        assert_eq!(m.get(0, 0), 0.5);
        assert_eq!(m.get(3, 2), 3.5);
    }

    #[test]
    fn test_pixel_at_outside() {
        let m = Matrix::filled(rect(0, 10), 5, 0.0);
        assert_eq!(m.pixel_at(Vec2::new(-1.0, 2.0)), None);
        assert_eq!(m.pixel_at(Vec2::new(9.9, 0.1)), Some((4, 0)));
    }

    #[test]
    fn test_blit_from_larger_source() {
        let src = Matrix::from_fn(rect(0, 100), 100, |p| p.x + p.y);
        let mut dst = Matrix::filled(rect(20, 10), 10, -1.0);
        let written = dst.blit_from(&src);
        assert_eq!(written, 100);
        assert_eq!(dst.get(0, 0), src.sample(Vec2::new(20.5, 20.5)).unwrap());
    }

    #[test]
    fn test_blit_disjoint() {
        let src = Matrix::filled(rect(0, 10), 4, 1.0);
        let mut dst = Matrix::filled(rect(50, 10), 4, 0.0);
        assert_eq!(dst.blit_from(&src), 0);
    }

    #[test]
    fn test_add_weighted() {
        let mut a = Matrix::filled(rect(0, 2), 2, 1.0);
        let b = Matrix::filled(rect(0, 2), 2, 2.0);
        let w = Matrix::filled(rect(0, 2), 2, 0.5);
        a.add_weighted(&b, Some(&w));
        assert!(a.data.iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }
}

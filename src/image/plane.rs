//! 2-D complex image: real-space particle images and their transforms.
use nalgebra::Vector2;
use rustfft::num_complex::Complex32;

use super::{signed_freq, wrap};

/// A 2-D image with complex samples. Real-space images keep their values in
/// the real part; `sampling` is the pixel size in ångström and `origin` the
/// real-space reference point in pixel coordinates.
#[derive(Clone, Debug)]
pub struct Plane {
    pub nx: usize,
    pub ny: usize,
    /// Pixel size (ångström / pixel).
    pub sampling: f32,
    /// Real-space origin (pixels).
    pub origin: Vector2<f32>,
    pub data: Vec<Complex32>,
}

impl Plane {
    pub fn new(nx: usize, ny: usize, sampling: f32) -> Self {
        Self {
            nx,
            ny,
            sampling,
            origin: Vector2::zeros(),
            data: vec![Complex32::new(0.0, 0.0); nx * ny],
        }
    }

    /// Wraps a real-valued image into a complex plane.
    pub fn from_real(nx: usize, ny: usize, sampling: f32, values: &[f32]) -> Result<Self, String> {
        if values.len() != nx * ny {
            return Err(format!(
                "plane size mismatch: {}x{} needs {} values, got {}",
                nx,
                ny,
                nx * ny,
                values.len()
            ));
        }
        let mut p = Self::new(nx, ny, sampling);
        for (d, &v) in p.data.iter_mut().zip(values) {
            d.re = v;
        }
        Ok(p)
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.nx + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Complex32 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: Complex32) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }

    /// Value at wrapped signed frequency coordinates.
    #[inline]
    pub fn get_wrapped(&self, hx: i64, hy: i64) -> Complex32 {
        self.data[wrap(hy, self.ny) * self.nx + wrap(hx, self.nx)]
    }

    /// Mean and standard deviation of the real part.
    pub fn real_stats(&self) -> (f32, f32) {
        let n = self.data.len() as f64;
        let mut sum = 0.0f64;
        let mut sum2 = 0.0f64;
        for v in &self.data {
            sum += v.re as f64;
            sum2 += (v.re as f64) * (v.re as f64);
        }
        let mean = sum / n;
        let var = (sum2 / n - mean * mean).max(0.0);
        (mean as f32, var.sqrt() as f32)
    }

    /// Linearly rescales the real part to the given mean and standard
    /// deviation. A flat image is left at the target mean.
    pub fn rescale_to(&mut self, avg: f32, std: f32) {
        let (mean, sd) = self.real_stats();
        let scale = if sd > 1e-12 { std / sd } else { 0.0 };
        for v in self.data.iter_mut() {
            v.re = (v.re - mean) * scale + avg;
        }
    }

    /// Background estimate: mean of the real part outside the inscribed
    /// circle around the image center.
    pub fn background(&self) -> f32 {
        let cx = self.nx as f32 / 2.0;
        let cy = self.ny as f32 / 2.0;
        let r2 = (self.nx.min(self.ny) as f32 / 2.0).powi(2);
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for y in 0..self.ny {
            for x in 0..self.nx {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                if dx * dx + dy * dy >= r2 {
                    sum += self.get(x, y).re as f64;
                    count += 1;
                }
            }
        }
        if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        }
    }

    /// Pads to `new_nx` x `new_ny` with `fill`, placing the image centered.
    /// The origin moves with the image content.
    pub fn pad_to(&self, new_nx: usize, new_ny: usize, fill: f32) -> Result<Plane, String> {
        if new_nx < self.nx || new_ny < self.ny {
            return Err(format!(
                "pad target {}x{} smaller than image {}x{}",
                new_nx, new_ny, self.nx, self.ny
            ));
        }
        let mut out = Plane::new(new_nx, new_ny, self.sampling);
        for v in out.data.iter_mut() {
            v.re = fill;
        }
        let ox = (new_nx - self.nx) / 2;
        let oy = (new_ny - self.ny) / 2;
        for y in 0..self.ny {
            for x in 0..self.nx {
                out.set(x + ox, y + oy, self.get(x, y));
            }
        }
        out.origin = self.origin + Vector2::new(ox as f32, oy as f32);
        Ok(out)
    }

    /// Applies a real-space translation by `(dx, dy)` as a phase ramp on
    /// the transform.
    pub fn phase_shift(&mut self, dx: f32, dy: f32) {
        let two_pi = 2.0 * std::f32::consts::PI;
        for y in 0..self.ny {
            let hy = signed_freq(y, self.ny) as f32;
            let py = hy * dy / self.ny as f32;
            for x in 0..self.nx {
                let hx = signed_freq(x, self.nx) as f32;
                let phase = -two_pi * (hx * dx / self.nx as f32 + py);
                let i = self.idx(x, y);
                self.data[i] *= Complex32::new(phase.cos(), phase.sin());
            }
        }
    }

    /// Shifts the transform so the recorded origin sits at (0, 0).
    pub fn phase_shift_to_origin(&mut self) {
        let (ox, oy) = (self.origin[0], self.origin[1]);
        self.phase_shift(-ox, -oy);
        self.origin = Vector2::zeros();
    }

    /// Shifts the transform so the origin sits at the image center.
    pub fn phase_shift_to_center(&mut self) {
        let cx = (self.nx / 2) as f32;
        let cy = (self.ny / 2) as f32;
        let (ox, oy) = (self.origin[0], self.origin[1]);
        self.phase_shift(cx - ox, cy - oy);
        self.origin = Vector2::new(cx, cy);
    }

    /// Extracts the central `new_size` x `new_size` block of frequencies
    /// from a wrapped transform. The real size in ångström is preserved, so
    /// the effective pixel size grows by `nx / new_size`.
    pub fn reduce_transform_size(&self, new_size: usize) -> Result<Plane, String> {
        if new_size > self.nx || new_size > self.ny {
            return Err(format!(
                "cannot grow transform from {}x{} to {new_size}",
                self.nx, self.ny
            ));
        }
        let mut out = Plane::new(new_size, new_size, self.sampling * self.nx as f32 / new_size as f32);
        // An odd target carries frequencies -(n/2)..=(n-1)/2; the top row
        // must be kept or Friedel pairs lose their positive half.
        let lo = -(new_size as i64 / 2);
        let hi = (new_size as i64 - 1) / 2;
        for hy in lo..=hi {
            for hx in lo..=hi {
                let v = self.get_wrapped(hx, hy);
                let i = wrap(hy, new_size) * new_size + wrap(hx, new_size);
                out.data[i] = v;
            }
        }
        out.origin = self.origin * (new_size as f32 / self.nx as f32);
        Ok(out)
    }

    /// Total power (sum of squared norms).
    pub fn power(&self) -> f64 {
        self.data.iter().map(|v| v.norm_sqr() as f64).sum()
    }
}

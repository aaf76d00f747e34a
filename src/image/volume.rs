//! 3-D complex volume: reference maps and reciprocal-space reconstructions.
use nalgebra::{Matrix3, Vector3};
use rustfft::num_complex::Complex32;

use super::plane::Plane;
use super::{signed_freq, wrap};
use crate::kernel::SpectralKernel;

/// A 3-D volume with complex samples. Same conventions as [`Plane`]:
/// real-space maps keep values in the real part, transforms use the
/// wrapped frequency layout.
#[derive(Clone, Debug)]
pub struct Volume {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Voxel size (ångström / pixel).
    pub sampling: f32,
    /// Real-space origin (pixels).
    pub origin: Vector3<f32>,
    pub data: Vec<Complex32>,
}

impl Volume {
    pub fn new(nx: usize, ny: usize, nz: usize, sampling: f32) -> Self {
        Self {
            nx,
            ny,
            nz,
            sampling,
            origin: Vector3::zeros(),
            data: vec![Complex32::new(0.0, 0.0); nx * ny * nz],
        }
    }

    pub fn from_real(
        nx: usize,
        ny: usize,
        nz: usize,
        sampling: f32,
        values: &[f32],
    ) -> Result<Self, String> {
        if values.len() != nx * ny * nz {
            return Err(format!(
                "volume size mismatch: {}x{}x{} needs {} values, got {}",
                nx,
                ny,
                nz,
                nx * ny * nz,
                values.len()
            ));
        }
        let mut v = Self::new(nx, ny, nz, sampling);
        for (d, &x) in v.data.iter_mut().zip(values) {
            d.re = x;
        }
        Ok(v)
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.ny + y) * self.nx + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> Complex32 {
        self.data[self.idx(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, v: Complex32) {
        let i = self.idx(x, y, z);
        self.data[i] = v;
    }

    #[inline]
    pub fn get_wrapped(&self, hx: i64, hy: i64, hz: i64) -> Complex32 {
        self.data[(wrap(hz, self.nz) * self.ny + wrap(hy, self.ny)) * self.nx + wrap(hx, self.nx)]
    }

    /// Real size of the x axis in ångström.
    pub fn real_size(&self) -> f32 {
        self.nx as f32 * self.sampling
    }

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

    /// Applies a real-space translation as a phase ramp on the transform.
    pub fn phase_shift(&mut self, shift: Vector3<f32>) {
        let two_pi = 2.0 * std::f32::consts::PI;
        for z in 0..self.nz {
            let pz = signed_freq(z, self.nz) as f32 * shift[2] / self.nz as f32;
            for y in 0..self.ny {
                let py = signed_freq(y, self.ny) as f32 * shift[1] / self.ny as f32;
                for x in 0..self.nx {
                    let px = signed_freq(x, self.nx) as f32 * shift[0] / self.nx as f32;
                    let phase = -two_pi * (px + py + pz);
                    let i = self.idx(x, y, z);
                    self.data[i] *= Complex32::new(phase.cos(), phase.sin());
                }
            }
        }
    }

    pub fn phase_shift_to_origin(&mut self) {
        let shift = -self.origin;
        self.phase_shift(shift);
        self.origin = Vector3::zeros();
    }

    pub fn phase_shift_to_center(&mut self) {
        let center = Vector3::new(
            (self.nx / 2) as f32,
            (self.ny / 2) as f32,
            (self.nz / 2) as f32,
        );
        let shift = center - self.origin;
        self.phase_shift(shift);
        self.origin = center;
    }

    /// Zeroes the DC term of a transform.
    pub fn zero_dc(&mut self) {
        self.data[0] = Complex32::new(0.0, 0.0);
    }

    /// Extracts the central cube of frequencies, keeping the real size in
    /// ångström. See [`Plane::reduce_transform_size`].
    pub fn reduce_transform_size(&self, new_size: usize) -> Result<Volume, String> {
        if new_size > self.nx || new_size > self.ny || new_size > self.nz {
            return Err(format!(
                "cannot grow transform from {}x{}x{} to {new_size}",
                self.nx, self.ny, self.nz
            ));
        }
        let mut out = Volume::new(
            new_size,
            new_size,
            new_size,
            self.sampling * self.nx as f32 / new_size as f32,
        );
        // An odd target carries frequencies -(n/2)..=(n-1)/2; the top row
        // must be kept or Friedel pairs lose their positive half.
        let lo = -(new_size as i64 / 2);
        let hi = (new_size as i64 - 1) / 2;
        for hz in lo..=hi {
            for hy in lo..=hi {
                for hx in lo..=hi {
                    let v = self.get_wrapped(hx, hy, hz);
                    let i = (wrap(hz, new_size) * new_size + wrap(hy, new_size)) * new_size
                        + wrap(hx, new_size);
                    out.data[i] = v;
                }
            }
        }
        out.origin = self.origin * (new_size as f32 / self.nx as f32);
        Ok(out)
    }

    /// Intensity-weighted RMS deviation from Friedel symmetry over the
    /// non-redundant half-space. Zero for a transform of a real map.
    pub fn friedel_residual(&self) -> f32 {
        let (nx, ny, nz) = (self.nx as i64, self.ny as i64, self.nz as i64);
        let mut num = 0.0f64;
        let mut den = 0.0f64;
        for z in 0..nz {
            let hz = if z < (nz + 1) / 2 { z } else { z - nz };
            for y in 0..ny {
                let hy = if y < (ny + 1) / 2 { y } else { y - ny };
                for x in 0..(nx + 1) / 2 {
                    let a = self.get_wrapped(x, hy, hz);
                    let b = self.get_wrapped(-x, -hy, -hz);
                    let intensity = 0.5 * (a.norm_sqr() + b.norm_sqr()) as f64;
                    let dre = (a.re - b.re) as f64;
                    let dim = (a.im + b.im) as f64;
                    num += intensity * (dre * dre + dim * dim);
                    den += intensity * (a.norm_sqr() + b.norm_sqr()) as f64;
                }
            }
        }
        if den > 0.0 {
            (num / den).sqrt() as f32
        } else {
            0.0
        }
    }

    /// Kernel-interpolated transform value at a fractional frequency
    /// coordinate (wrapped indexing).
    pub fn interpolate(&self, kernel: &SpectralKernel, pos: Vector3<f32>) -> Complex32 {
        let fx = pos[0].floor();
        let fy = pos[1].floor();
        let fz = pos[2].floor();
        let wx = kernel.weights(pos[0] - fx);
        let wy = kernel.weights(pos[1] - fy);
        let wz = kernel.weights(pos[2] - fz);
        let start = kernel.start_offset();
        let (ix, iy, iz) = (fx as i64, fy as i64, fz as i64);
        let mut acc = Complex32::new(0.0, 0.0);
        for (kz, &vz) in wz.iter().enumerate() {
            let z = wrap(iz + start + kz as i64, self.nz);
            for (ky, &vy) in wy.iter().enumerate() {
                let y = wrap(iy + start + ky as i64, self.ny);
                let wzy = vz * vy;
                let row = (z * self.ny + y) * self.nx;
                for (kx, &vx) in wx.iter().enumerate() {
                    let x = wrap(ix + start + kx as i64, self.nx);
                    acc += self.data[row + x] * (wzy * vx);
                }
            }
        }
        acc
    }

    /// Extracts the central section of this transform on the plane through
    /// the origin rotated by `mat`, out to `max_radius` pixels.
    pub fn central_section(
        &self,
        mat: &Matrix3<f32>,
        max_radius: f32,
        kernel: &SpectralKernel,
    ) -> Plane {
        let mut plane = Plane::new(self.nx, self.ny, self.sampling);
        plane.origin = nalgebra::Vector2::new(self.origin[0], self.origin[1]);
        let max2 = max_radius * max_radius;
        let (nx, ny) = (self.nx as i64, self.ny as i64);
        for y in 0..ny {
            let hy = if y < (ny + 1) / 2 { y } else { y - ny } as f32;
            for x in 0..nx {
                let hx = if x < (nx + 1) / 2 { x } else { x - nx } as f32;
                if hx * hx + hy * hy > max2 {
                    continue;
                }
                let pos = mat * Vector3::new(hx, hy, 0.0);
                let v = self.interpolate(kernel, pos);
                plane.set(x as usize, y as usize, v);
            }
        }
        plane
    }

    pub fn power(&self) -> f64 {
        self.data.iter().map(|v| v.norm_sqr() as f64).sum()
    }
}

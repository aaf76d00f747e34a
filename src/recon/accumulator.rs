//! Reciprocal-space accumulation of particle transforms.
//!
//! An [`Accumulator`] owns a complex sum volume plus weight, squared-weight
//! and power side buffers. Worker threads each pack into a private
//! accumulator; accumulators merge by element-wise addition, and a final
//! weighing pass turns sums into weighted means with a per-voxel figure of
//! merit.
use nalgebra::{Matrix3, Vector3};
use rustfft::num_complex::Complex32;

use crate::image::{wrap, Plane, Volume};
use crate::symmetry::SymmetryGroup;
use crate::view::View;

/// How a plane sample spreads into the 3-D grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    /// Everything into the nearest voxel.
    Nearest,
    /// Into the nearest voxel, attenuated by its trilinear weight.
    WeightedNearest,
    /// Spread over the eight surrounding voxels.
    Trilinear,
}

/// Geometry shared by all accumulators of one reconstruction.
#[derive(Clone, Copy, Debug)]
pub struct PackParams {
    /// Map edge length (voxels); maps are cubes.
    pub size: usize,
    /// Map voxel size (ångström / pixel).
    pub sampling: f32,
    /// High-resolution limit (ångström).
    pub hi_res: f32,
    /// Low-resolution limit (ångström); 0 disables the inner cutoff.
    pub lo_res: f32,
    pub interpolation: Interpolation,
    /// Electron wavelength (ångström) for Ewald-sphere curvature; 0 packs
    /// flat central sections.
    pub ewald_lambda: f32,
}

impl PackParams {
    /// Outer packing radius in map voxels, capped inside the cube.
    pub fn max_radius(&self) -> f32 {
        let rad = self.size as f32 * self.sampling / self.hi_res.max(2.0 * self.sampling);
        rad.min(self.size as f32 / 2.0 - 1.0)
    }

    fn min_radius(&self) -> f32 {
        if self.lo_res > 0.0 {
            self.size as f32 * self.sampling / self.lo_res
        } else {
            0.0
        }
    }
}

/// One reconstruction accumulator.
#[derive(Clone, Debug)]
pub struct Accumulator {
    pub params: PackParams,
    /// Complex sums; after [`Accumulator::weigh`], weighted means.
    pub values: Volume,
    /// Sum of packing weights per voxel.
    pub weight: Vec<f32>,
    /// Sum of squared packing weights per voxel.
    pub weight2: Vec<f32>,
    /// Weighted power sums per voxel.
    pub power: Vec<f32>,
    /// Per-voxel figure of merit, filled by [`Accumulator::weigh`].
    pub fom: Vec<f32>,
    /// Per-voxel effective weight, filled by [`Accumulator::weigh`].
    pub weff: Vec<f32>,
    /// Number of planes packed (symmetry copies counted once).
    pub planes_packed: usize,
    weighed: bool,
}

impl Accumulator {
    pub fn new(params: PackParams) -> Result<Self, String> {
        if params.size < 4 {
            return Err(format!("map size {} too small", params.size));
        }
        if params.sampling <= 0.0 {
            return Err("map sampling must be positive".into());
        }
        if params.hi_res < 0.0 || params.lo_res < 0.0 {
            return Err("resolution limits must be non-negative".into());
        }
        let n = params.size * params.size * params.size;
        Ok(Self {
            params,
            values: Volume::new(params.size, params.size, params.size, params.sampling),
            weight: vec![0.0; n],
            weight2: vec![0.0; n],
            power: vec![0.0; n],
            fom: Vec::new(),
            weff: Vec::new(),
            planes_packed: 0,
            weighed: false,
        })
    }

    pub fn is_weighed(&self) -> bool {
        self.weighed
    }

    #[inline]
    fn deposit(&mut self, x: usize, y: usize, z: usize, v: Complex32, w: f32, pw: f32) {
        let n = self.params.size;
        let i = (z * n + y) * n + x;
        self.values.data[i] += v * w;
        self.weight[i] += w;
        self.weight2[i] += w * w;
        self.power[i] += w * pw;
    }

    fn scatter(&mut self, pos: Vector3<f32>, v: Complex32, w: f32) {
        let n = self.params.size;
        let pw = v.norm_sqr();
        match self.params.interpolation {
            Interpolation::Nearest => {
                let x = wrap(pos[0].round() as i64, n);
                let y = wrap(pos[1].round() as i64, n);
                let z = wrap(pos[2].round() as i64, n);
                self.deposit(x, y, z, v, w, pw);
            }
            Interpolation::WeightedNearest => {
                let fx = 1.0 - (pos[0] - pos[0].round()).abs();
                let fy = 1.0 - (pos[1] - pos[1].round()).abs();
                let fz = 1.0 - (pos[2] - pos[2].round()).abs();
                let x = wrap(pos[0].round() as i64, n);
                let y = wrap(pos[1].round() as i64, n);
                let z = wrap(pos[2].round() as i64, n);
                self.deposit(x, y, z, v, w * fx * fy * fz, pw);
            }
            Interpolation::Trilinear => {
                let (bx, by, bz) = (pos[0].floor(), pos[1].floor(), pos[2].floor());
                let (gx, gy, gz) = (pos[0] - bx, pos[1] - by, pos[2] - bz);
                for dz in 0..2i64 {
                    let wz = if dz == 0 { 1.0 - gz } else { gz };
                    if wz <= 0.0 {
                        continue;
                    }
                    let z = wrap(bz as i64 + dz, n);
                    for dy in 0..2i64 {
                        let wy = if dy == 0 { 1.0 - gy } else { gy };
                        if wy <= 0.0 {
                            continue;
                        }
                        let y = wrap(by as i64 + dy, n);
                        for dx in 0..2i64 {
                            let wx = if dx == 0 { 1.0 - gx } else { gx };
                            if wx <= 0.0 {
                                continue;
                            }
                            let x = wrap(bx as i64 + dx, n);
                            self.deposit(x, y, z, v, w * wx * wy * wz, pw);
                        }
                    }
                }
            }
        }
    }

    /// Packs one particle transform at the given rotation.
    ///
    /// Plane samples inside the resolution annulus are rotated into the map
    /// grid; the outermost pixel of the annulus is tapered with a square
    /// root falloff so the band edge does not ring.
    pub fn pack_plane(
        &mut self,
        plane: &Plane,
        mat: &Matrix3<f32>,
        magnification: f32,
        weight: f32,
    ) -> Result<(), String> {
        if self.weighed {
            return Err("cannot pack into a weighed accumulator".into());
        }
        if plane.nx == 0 || plane.sampling <= 0.0 {
            return Err("cannot pack an empty plane".into());
        }
        if magnification <= 0.0 {
            return Err(format!("bad magnification {magnification}"));
        }
        let map_real = self.params.size as f32 * self.params.sampling;
        let plane_real = plane.nx as f32 * plane.sampling * magnification;
        let vscale = map_real / plane_real;
        let maxrad = self.params.max_radius();
        let minrad = self.params.min_radius();

        let (nx, ny) = (plane.nx as i64, plane.ny as i64);
        for y in 0..ny {
            let hy = if y < (ny + 1) / 2 { y } else { y - ny } as f32;
            for x in 0..nx {
                let hx = if x < (nx + 1) / 2 { x } else { x - nx } as f32;
                let r = (hx * hx + hy * hy).sqrt() * vscale;
                if r < minrad || r >= maxrad + 1.0 {
                    continue;
                }
                let mut w = weight;
                if r > maxrad {
                    w *= (maxrad + 1.0 - r).sqrt();
                }
                let v = plane.get(x as usize, y as usize);
                let mut pos = mat * Vector3::new(hx, hy, 0.0) * vscale;
                let lambda = self.params.ewald_lambda;
                if lambda > 0.0 {
                    // The scattered beam samples a sphere cap, not a plane:
                    // offset along the beam axis by the sphere sagitta.
                    let sl = r / map_real * lambda;
                    if sl >= 1.0 {
                        continue;
                    }
                    let dz = (1.0 - (1.0 - sl * sl).sqrt()) / lambda * map_real;
                    pos += mat * Vector3::new(0.0, 0.0, dz);
                }
                self.scatter(pos, v, w);
            }
        }
        self.planes_packed += 1;
        Ok(())
    }

    /// Packs a particle transform once per symmetry operator.
    pub fn pack_plane_symmetric(
        &mut self,
        plane: &Plane,
        view: &View,
        sym: &SymmetryGroup,
        magnification: f32,
        weight: f32,
    ) -> Result<(), String> {
        let q = view.quaternion();
        for op in sym.operators() {
            let mat = (op * q).to_rotation_matrix().into_inner();
            self.pack_plane(plane, &mat, magnification, weight)?;
        }
        self.planes_packed -= sym.order();
        self.planes_packed += 1;
        Ok(())
    }

    /// Adds another accumulator's sums into this one.
    pub fn merge(&mut self, other: &Accumulator) -> Result<(), String> {
        if self.weighed || other.weighed {
            return Err("cannot merge weighed accumulators".into());
        }
        if self.params.size != other.params.size {
            return Err(format!(
                "accumulator size mismatch: {} vs {}",
                self.params.size, other.params.size
            ));
        }
        for (a, b) in self.values.data.iter_mut().zip(&other.values.data) {
            *a += b;
        }
        for (a, b) in self.weight.iter_mut().zip(&other.weight) {
            *a += b;
        }
        for (a, b) in self.weight2.iter_mut().zip(&other.weight2) {
            *a += b;
        }
        for (a, b) in self.power.iter_mut().zip(&other.power) {
            *a += b;
        }
        self.planes_packed += other.planes_packed;
        Ok(())
    }

    /// Turns sums into weighted means and computes the per-voxel figure of
    /// merit and effective weight. Returns the number of covered voxels.
    ///
    /// A voxel touched by a single contribution gets FOM 0: one plane
    /// cannot witness agreement.
    pub fn weigh(&mut self) -> Result<usize, String> {
        if self.weighed {
            return Err("accumulator already weighed".into());
        }
        let n = self.values.data.len();
        self.fom = vec![0.0; n];
        self.weff = vec![0.0; n];
        let mut covered = 0usize;
        for i in 0..n {
            let w = self.weight[i];
            if w <= 0.0 {
                continue;
            }
            covered += 1;
            let sum = self.values.data[i];
            let mut pw = self.power[i];
            if i == 0 && pw <= 0.0 {
                pw = 1.0;
            }
            let single = self.weight2[i] >= w * w * (1.0 - 1e-5);
            if !single && pw > 0.0 {
                let fom = (sum.norm_sqr() / (w * pw)).clamp(0.0, 1.0);
                self.fom[i] = fom;
            }
            self.weff[i] = w - self.weight2[i] / w;
            self.values.data[i] = sum / w;
        }
        self.weighed = true;
        Ok(covered)
    }
}

//! Folding packed accumulators into final maps with quality statistics.
use serde::Serialize;

use crate::image::fft::{fft3, Direction};
use crate::image::Volume;
use crate::recon::accumulator::Accumulator;

/// Which accumulators contribute to a combined map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapGroup {
    /// All accumulators.
    Full,
    /// Even-indexed accumulators (first half set).
    Half1,
    /// Odd-indexed accumulators (second half set).
    Half2,
}

/// Controls for the combination stage.
#[derive(Clone, Copy, Debug)]
pub struct CombineOptions {
    /// Inverse-transform and center the map into real space. When false the
    /// result stays a reciprocal-space transform with the origin at (0,0,0).
    pub produce_real_map: bool,
    /// Also emit the per-voxel SNR volume.
    pub snr_map: bool,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            produce_real_map: true,
            snr_map: false,
        }
    }
}

/// Radial shell statistics of a combined map.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ShellStat {
    /// Shell radius (voxels).
    pub radius: usize,
    /// Resolution at this shell (ångström).
    pub resolution: f32,
    /// Covered voxels in the shell.
    pub voxels: usize,
    pub signal: f32,
    pub noise: f32,
    pub snr: f32,
    pub fsc: f32,
}

/// A combined reconstruction with its quality measures.
#[derive(Clone, Debug)]
pub struct ReconMap {
    pub map: Volume,
    /// Fraction of the packing sphere that received data.
    pub coverage: f32,
    pub covered_voxels: usize,
    /// Intensity-weighted RMS deviation from Friedel symmetry.
    pub friedel_residual: f32,
    pub shells: Vec<ShellStat>,
    /// Resolution where the FSC estimate drops through 0.3 (ångström).
    pub resolution_fsc: f32,
    /// Resolution where the shell SNR drops through 0.5 (ångström).
    pub resolution_snr: f32,
    pub planes_packed: usize,
    /// Per-voxel SNR, if requested.
    pub snr: Option<Vec<f32>>,
}

const FOM_CAP: f32 = 0.999;
const FSC_THRESHOLD: f32 = 0.3;
const SNR_THRESHOLD: f32 = 0.5;

fn voxel_snr(acc: &Accumulator, i: usize) -> f32 {
    let fom = acc.fom[i].min(FOM_CAP);
    acc.weff[i].max(0.0) * fom / (1.0 - fom)
}

fn shell_stats(acc: &Accumulator) -> Vec<ShellStat> {
    let n = acc.params.size;
    let maxrad = acc.params.max_radius();
    let nshells = maxrad.ceil() as usize + 1;
    let real_size = n as f32 * acc.params.sampling;

    #[derive(Default, Clone, Copy)]
    struct Bin {
        voxels: usize,
        signal: f64,
        noise: f64,
        snr: f64,
    }
    let mut bins = vec![Bin::default(); nshells];

    let ni = n as i64;
    for z in 0..ni {
        let hz = if z < (ni + 1) / 2 { z } else { z - ni } as f32;
        for y in 0..ni {
            let hy = if y < (ni + 1) / 2 { y } else { y - ni } as f32;
            for x in 0..ni {
                let hx = if x < (ni + 1) / 2 { x } else { x - ni } as f32;
                let r = (hx * hx + hy * hy + hz * hz).sqrt();
                let shell = r.round() as usize;
                if shell >= nshells {
                    continue;
                }
                let i = ((z as usize) * n + y as usize) * n + x as usize;
                if acc.weight[i] <= 0.0 {
                    continue;
                }
                let intensity = acc.values.data[i].norm_sqr() as f64;
                let fom = acc.fom[i] as f64;
                let b = &mut bins[shell];
                b.voxels += 1;
                b.signal += fom * intensity;
                b.noise += (1.0 - fom) * intensity;
                b.snr += voxel_snr(acc, i) as f64;
            }
        }
    }

    bins.iter()
        .enumerate()
        .map(|(radius, b)| {
            let snr = if b.voxels > 0 {
                (b.snr / b.voxels as f64) as f32
            } else {
                0.0
            };
            ShellStat {
                radius,
                resolution: if radius > 0 {
                    real_size / radius as f32
                } else {
                    f32::INFINITY
                },
                voxels: b.voxels,
                signal: b.signal as f32,
                noise: b.noise as f32,
                snr,
                fsc: snr / (snr + 1.0),
            }
        })
        .collect()
}

/// First radius where `measure` drops through `threshold`, linearly
/// interpolated between shells, converted to a resolution in ångström.
/// Falls back to the last shell's resolution if the curve never crosses.
fn crossing_resolution(
    shells: &[ShellStat],
    real_size: f32,
    threshold: f32,
    measure: impl Fn(&ShellStat) -> f32,
) -> f32 {
    let mut prev: Option<(f32, f32)> = None;
    for s in shells.iter().skip(1) {
        if s.voxels == 0 {
            continue;
        }
        let value = measure(s);
        if let Some((pr, pv)) = prev {
            if pv >= threshold && value < threshold {
                let frac = (pv - threshold) / (pv - value).max(1e-12);
                let r = pr + frac * (s.radius as f32 - pr);
                return real_size / r.max(1e-6);
            }
        }
        prev = Some((s.radius as f32, value));
    }
    match shells.iter().rev().find(|s| s.voxels > 0) {
        Some(s) if s.radius > 0 => real_size / s.radius as f32,
        _ => f32::INFINITY,
    }
}

/// Folds a group of accumulators into one map.
///
/// All accumulators must be unweighed and of identical geometry; the sums
/// are merged, weighed, measured and optionally brought back to real space
/// with the density centered at `size/2`.
pub fn combine(
    accs: &[Accumulator],
    group: MapGroup,
    opts: &CombineOptions,
) -> Result<ReconMap, String> {
    let picked: Vec<&Accumulator> = accs
        .iter()
        .enumerate()
        .filter(|(i, _)| match group {
            MapGroup::Full => true,
            MapGroup::Half1 => i % 2 == 0,
            MapGroup::Half2 => i % 2 == 1,
        })
        .map(|(_, a)| a)
        .collect();
    let Some(first) = picked.first() else {
        return Err(format!("no accumulators in group {group:?}"));
    };

    let mut total = (*first).clone();
    for other in &picked[1..] {
        total.merge(other)?;
    }
    let covered = total.weigh()?;

    let rad = total.params.max_radius();
    let sphere = 4.0 / 3.0 * std::f64::consts::PI * ((rad + 1.0) as f64).powi(3);
    let coverage = (covered as f64 / sphere).min(1.0) as f32;

    let friedel = total.values.friedel_residual();
    let shells = shell_stats(&total);
    let real_size = total.params.size as f32 * total.params.sampling;
    let resolution_fsc = crossing_resolution(&shells, real_size, FSC_THRESHOLD, |s| s.fsc);
    let resolution_snr = crossing_resolution(&shells, real_size, SNR_THRESHOLD, |s| s.snr);

    let snr = if opts.snr_map {
        Some((0..total.values.data.len()).map(|i| voxel_snr(&total, i)).collect())
    } else {
        None
    };

    let mut map = total.values.clone();
    if opts.produce_real_map {
        map.phase_shift_to_center();
        fft3(&mut map, Direction::Inverse);
    }

    log::debug!(
        "combined {:?}: {} planes, coverage {:.3}, friedel {:.3e}, FSC(0.3) at {:.2} A",
        group,
        total.planes_packed,
        coverage,
        friedel,
        resolution_fsc
    );

    Ok(ReconMap {
        map,
        coverage,
        covered_voxels: covered,
        friedel_residual: friedel,
        shells,
        resolution_fsc,
        resolution_snr,
        planes_packed: total.planes_packed,
        snr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon::accumulator::{Interpolation, PackParams};
    use nalgebra::{Rotation3, Vector3};
    use rustfft::num_complex::Complex32;

    fn packed_accumulator(seed: f32) -> Accumulator {
        let params = PackParams {
            size: 16,
            sampling: 1.0,
            hi_res: 2.5,
            lo_res: 0.0,
            interpolation: Interpolation::Nearest,
            ewald_lambda: 0.0,
        };
        let mut acc = Accumulator::new(params).unwrap();
        let mut plane = crate::image::Plane::new(16, 16, 1.0);
        for (i, v) in plane.data.iter_mut().enumerate() {
            *v = Complex32::new(seed + (i % 5) as f32, 0.0);
        }
        for k in 0..6 {
            let m = Rotation3::from_axis_angle(&Vector3::x_axis(), 0.4 * k as f32).into_inner();
            acc.pack_plane(&plane, &m, 1.0, 1.0).unwrap();
        }
        acc
    }

    #[test]
    fn empty_group_is_an_error() {
        let accs = vec![packed_accumulator(1.0)];
        assert!(combine(&accs, MapGroup::Half2, &CombineOptions::default()).is_err());
    }

    #[test]
    fn half_sets_split_by_parity() {
        let accs = vec![
            packed_accumulator(1.0),
            packed_accumulator(2.0),
            packed_accumulator(3.0),
        ];
        let opts = CombineOptions {
            produce_real_map: false,
            snr_map: false,
        };
        let h1 = combine(&accs, MapGroup::Half1, &opts).unwrap();
        let h2 = combine(&accs, MapGroup::Half2, &opts).unwrap();
        let full = combine(&accs, MapGroup::Full, &opts).unwrap();
        assert_eq!(h1.planes_packed, 12);
        assert_eq!(h2.planes_packed, 6);
        assert_eq!(full.planes_packed, 18);
    }

    #[test]
    fn coverage_grows_with_views() {
        let params = PackParams {
            size: 16,
            sampling: 1.0,
            hi_res: 2.5,
            lo_res: 0.0,
            interpolation: Interpolation::Nearest,
            ewald_lambda: 0.0,
        };
        let mut one = Accumulator::new(params).unwrap();
        let mut many = Accumulator::new(params).unwrap();
        let mut plane = crate::image::Plane::new(16, 16, 1.0);
        for v in plane.data.iter_mut() {
            *v = Complex32::new(1.0, 0.0);
        }
        one.pack_plane(&plane, &nalgebra::Matrix3::identity(), 1.0, 1.0)
            .unwrap();
        for k in 0..12 {
            let m = Rotation3::from_axis_angle(&Vector3::x_axis(), 0.26 * k as f32).into_inner();
            many.pack_plane(&plane, &m, 1.0, 1.0).unwrap();
        }
        let opts = CombineOptions {
            produce_real_map: false,
            snr_map: false,
        };
        let c1 = combine(&[one], MapGroup::Full, &opts).unwrap();
        let c2 = combine(&[many], MapGroup::Full, &opts).unwrap();
        assert!(c2.coverage > c1.coverage);
        assert!(c2.coverage <= 1.0);
    }

    #[test]
    fn friedel_residual_small_for_real_input() {
        // Planes from a real image keep Friedel symmetry through packing
        // at identity orientation.
        let params = PackParams {
            size: 16,
            sampling: 1.0,
            hi_res: 2.5,
            lo_res: 0.0,
            interpolation: Interpolation::Nearest,
            ewald_lambda: 0.0,
        };
        let mut acc = Accumulator::new(params).unwrap();
        let vals: Vec<f32> = (0..256).map(|i| ((i * 3) % 7) as f32).collect();
        let mut plane = crate::image::Plane::from_real(16, 16, 1.0, &vals).unwrap();
        crate::image::fft::fft2(&mut plane, Direction::Forward);
        acc.pack_plane(&plane, &nalgebra::Matrix3::identity(), 1.0, 1.0)
            .unwrap();
        let opts = CombineOptions {
            produce_real_map: false,
            snr_map: false,
        };
        let out = combine(&[acc], MapGroup::Full, &opts).unwrap();
        assert!(out.friedel_residual < 1e-3, "got {}", out.friedel_residual);
    }

    #[test]
    fn snr_map_has_volume_size() {
        let accs = vec![packed_accumulator(1.0)];
        let opts = CombineOptions {
            produce_real_map: false,
            snr_map: true,
        };
        let out = combine(&accs, MapGroup::Full, &opts).unwrap();
        assert_eq!(out.snr.unwrap().len(), 16 * 16 * 16);
    }
}

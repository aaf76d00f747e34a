//! Orientation refinement: shared hypothesis types, reference preparation
//! and the per-particle driver.
pub mod grid;
pub mod monte;

use nalgebra::Vector2;
use rayon::prelude::*;
use serde::Serialize;

use crate::ctf::CtfParams;
use crate::image::fft::{fft3, Direction};
use crate::image::{Plane, Volume};
use crate::particle::ParticleSet;
use crate::prepare::{prepare_particle, PrepareParams};
use crate::score::{Candidate, ScoreParams, Scorer};
use crate::symmetry::SymmetryGroup;
use crate::view::View;

pub use grid::{GridParams, GridRefiner};
pub use monte::{MonteParams, MonteRefiner};

/// One orientation model for a particle under refinement.
#[derive(Clone, Copy, Debug)]
pub struct Hypothesis {
    pub view: View,
    /// Origin shift relative to the prepared particle origin (pixels of the
    /// plane being scored).
    pub shift: Vector2<f32>,
    pub magnification: f32,
    pub ctf: Option<CtfParams>,
}

impl Hypothesis {
    pub(crate) fn candidate(&self) -> Candidate {
        Candidate {
            mat: self.view.matrix(),
            shift: self.shift,
            magnification: self.magnification,
            ctf: self.ctf,
        }
    }
}

/// Outcome of refining one particle.
#[derive(Clone, Copy, Debug)]
pub struct RefineResult {
    pub hypothesis: Hypothesis,
    /// In-band figure of merit of the returned hypothesis.
    pub fom: f32,
    /// Cross-validation band figure of merit, reported but never optimized.
    pub cv: f32,
    /// Number of score evaluations spent.
    pub evaluations: usize,
}

/// Search strategy.
#[derive(Clone, Copy, Debug)]
pub enum RefineMode {
    /// Deterministic hierarchical grid search.
    Grid(GridParams),
    /// Stochastic search.
    Monte(MonteParams),
}

/// Controls for a refinement pass over a particle set.
#[derive(Clone, Debug)]
pub struct RefineOptions {
    pub mode: RefineMode,
    pub symmetry: String,
    pub score: ScoreParams,
    pub prepare: PrepareParams,
    /// Particles scoring below this after refinement are deselected;
    /// 0 keeps everything.
    pub fom_threshold: f32,
    /// Base seed for stochastic refinement; each particle derives its own
    /// stream from this and its index, so runs reproduce.
    pub seed: u64,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            mode: RefineMode::Grid(GridParams::default()),
            symmetry: "C1".into(),
            score: ScoreParams::default(),
            prepare: PrepareParams {
                pad_factor: 1,
                ..PrepareParams::default()
            },
            fom_threshold: 0.0,
            seed: 1,
        }
    }
}

/// Summary of one refinement pass.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RefineReport {
    pub particles: usize,
    /// Particles whose figure of merit improved over the stored one.
    pub improved: usize,
    pub deselected: usize,
    pub mean_fom_before: f32,
    pub mean_fom_after: f32,
    pub elapsed_s: f64,
}

/// Prepares a real-space reference map for scoring: forward transform,
/// reduction to the band the resolution limit needs (diameter
/// `2.2 * real_size / hi_res`, rounded up to even), DC removal and phase
/// origin at (0, 0, 0).
pub fn prepare_reference(map: &Volume, hi_res: f32) -> Result<Volume, String> {
    if hi_res <= 0.0 {
        return Err("high-resolution limit must be positive".into());
    }
    let mut ft = map.clone();
    let origin = map.origin;
    fft3(&mut ft, Direction::Forward);
    let mut diam = (2.2 * map.real_size() / hi_res).ceil() as usize;
    diam += diam % 2;
    let diam = diam.clamp(4, map.nx);
    let mut reduced = ft.reduce_transform_size(diam)?;
    reduced.zero_dc();
    reduced.origin = origin * (diam as f32 / map.nx as f32);
    reduced.phase_shift_to_origin();
    Ok(reduced)
}

fn refine_one(
    scorer: &Scorer,
    sym: &SymmetryGroup,
    mode: &RefineMode,
    particle: &Plane,
    start: &Hypothesis,
    seed: u64,
) -> Result<RefineResult, String> {
    match mode {
        RefineMode::Grid(params) => GridRefiner::new(scorer, sym, *params)?.refine(particle, start),
        RefineMode::Monte(params) => {
            MonteRefiner::new(scorer, sym, *params, seed)?.refine(particle, start)
        }
    }
}

struct ParticleOutcome {
    result: RefineResult,
    /// Resolved origin in full box pixels.
    origin: Vector2<f32>,
    /// Full box pixels per scored-plane pixel.
    pixel_ratio: f32,
}

/// Refines every selected particle against `reference` (a real-space map)
/// and writes the improved orientations back into the set.
///
/// Particles run in parallel; a particle that cannot be read or does not
/// match the reference geometry aborts the pass.
pub fn refine_orientations(
    set: &mut ParticleSet,
    reference: &Volume,
    opts: &RefineOptions,
) -> Result<RefineReport, String> {
    set.validate()?;
    let sym = SymmetryGroup::parse(&opts.symmetry)?;
    let reduced = prepare_reference(reference, opts.score.hi_res)?;
    let scorer = Scorer::new(&reduced, opts.score.clone())?;
    let started = std::time::Instant::now();

    let selected: Vec<usize> = set.selected();
    let fom_before = mean_fom(set);
    log::info!(
        "refining {} particles against a {}^3 reference band (symmetry {})",
        selected.len(),
        reduced.nx,
        sym.label()
    );

    let micrographs = &set.micrographs;
    let particles = &set.particles;
    let outcomes: Vec<(usize, ParticleOutcome)> = selected
        .par_iter()
        .map(|&i| -> Result<(usize, ParticleOutcome), String> {
            let p = &particles[i];
            let mg = &micrographs[p.micrograph];
            let prep = prepare_particle(p, mg, &opts.prepare)
                .map_err(|e| format!("particle {} failed: {e}", p.id))?;
            // Padding grows the physical extent of the transform; the scored
            // plane must cover the same real size as the reference or rings
            // land at the wrong radii.
            let plane_real = prep.plane.nx as f32 * prep.plane.sampling;
            if (plane_real - reference.real_size()).abs() > 1e-3 * plane_real {
                return Err(format!(
                    "particle {} transform covers {plane_real:.1} A but the reference covers {:.1} A",
                    p.id,
                    reference.real_size()
                ));
            }
            let plane = prep.plane.reduce_transform_size(reduced.nx)?;
            let start = Hypothesis {
                view: p.view,
                shift: Vector2::zeros(),
                magnification: p.magnification,
                ctf: prep.ctf,
            };
            let result = refine_one(
                &scorer,
                &sym,
                &opts.mode,
                &plane,
                &start,
                opts.seed.wrapping_add(i as u64),
            )?;
            Ok((
                i,
                ParticleOutcome {
                    result,
                    origin: prep.origin,
                    pixel_ratio: prep.plane.nx as f32 / reduced.nx as f32,
                },
            ))
        })
        .collect::<Result<_, String>>()?;

    let mut report = RefineReport {
        mean_fom_before: fom_before,
        ..RefineReport::default()
    };
    for (i, out) in outcomes {
        let p = &mut set.particles[i];
        report.particles += 1;
        if out.result.fom > p.fom {
            report.improved += 1;
        }
        let r = &out.result;
        p.view = r.hypothesis.view;
        // The candidate shift translates the particle onto the reference, so
        // the stored origin moves the opposite way.
        p.origin = Some(out.origin - r.hypothesis.shift * out.pixel_ratio);
        p.magnification = r.hypothesis.magnification;
        if let Some(ctf) = &r.hypothesis.ctf {
            p.defocus = Some(ctf.defocus_avg);
        }
        p.fom = r.fom;
        p.fom_cv = r.cv;
        if opts.fom_threshold > 0.0 && r.fom < opts.fom_threshold {
            p.select = 0;
            report.deselected += 1;
        }
    }
    report.mean_fom_after = mean_fom(set);
    report.elapsed_s = started.elapsed().as_secs_f64();
    log::info!(
        "refined {} particles in {:.2}s: mean fom {:.4} -> {:.4}, {} improved, {} deselected",
        report.particles,
        report.elapsed_s,
        report.mean_fom_before,
        report.mean_fom_after,
        report.improved,
        report.deselected
    );
    Ok(report)
}

fn mean_fom(set: &ParticleSet) -> f32 {
    let mut sum = 0.0f32;
    let mut n = 0usize;
    for p in set.particles.iter().filter(|p| p.select > 0) {
        sum += p.fom;
        n += 1;
    }
    if n > 0 {
        sum / n as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn reference_reduction_sizes() {
        let mut map = Volume::new(64, 64, 64, 1.0);
        map.origin = Vector3::new(32.0, 32.0, 32.0);
        for (i, v) in map.data.iter_mut().enumerate() {
            v.re = ((i * 13) % 17) as f32;
        }
        // diam = ceil(2.2 * 64 / 8) = 18, rounded up to even.
        let reduced = prepare_reference(&map, 8.0).unwrap();
        assert_eq!(reduced.nx, 18);
        assert_eq!(reduced.data[0], rustfft::num_complex::Complex32::new(0.0, 0.0));
        // Coarse limits clamp to the map size.
        let full = prepare_reference(&map, 2.0).unwrap();
        assert_eq!(full.nx, 64);
        assert!(prepare_reference(&map, 0.0).is_err());
    }
}

//! Stochastic orientation search.
//!
//! A random walk over view, in-plane angle and magnification. Origin and
//! defocus move on a much finer scale than the view, so every view trial
//! restarts the origin and fits it with a nested stochastic pass. A
//! candidate is accepted when the ratio of its score to the current score
//! beats a uniform draw; this keeps the walk exploring as long as scores
//! stay comparable. The ratio test assumes non-negative scores, which
//! holds for the correlation figures used here. The best hypothesis ever
//! seen is tracked separately from the walk and is what the refiner
//! returns.
use nalgebra::{Unit, UnitQuaternion, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::image::Plane;
use crate::score::{Score, Scorer};
use crate::symmetry::SymmetryGroup;
use crate::view::View;

use super::{Hypothesis, RefineResult};

/// Stochastic search controls. Angles in radians, shifts in pixels of the
/// scored plane, defocus in ångström.
#[derive(Clone, Copy, Debug)]
pub struct MonteParams {
    pub iterations: usize,
    /// Standard deviation of the view-vector perturbation.
    pub view_std: f32,
    /// Half-range of the uniform in-plane angle perturbation.
    pub max_angle: f32,
    /// Standard deviation of the origin perturbation.
    pub shift_std: f32,
    /// Standard deviation of the defocus perturbation; 0 freezes defocus.
    pub defocus_std: f32,
    /// Half-range of the uniform magnification perturbation (fractional);
    /// 0 freezes magnification.
    pub max_mag: f32,
    /// Trials of the nested origin and defocus pass run for each view
    /// candidate.
    pub origin_iterations: usize,
}

impl Default for MonteParams {
    fn default() -> Self {
        Self {
            iterations: 500,
            view_std: 0.05,
            max_angle: 0.1,
            shift_std: 0.5,
            defocus_std: 0.0,
            max_mag: 0.0,
            origin_iterations: 20,
        }
    }
}

pub struct MonteRefiner<'a> {
    scorer: &'a Scorer<'a>,
    sym: &'a SymmetryGroup,
    params: MonteParams,
    rng: StdRng,
}

impl<'a> MonteRefiner<'a> {
    pub fn new(
        scorer: &'a Scorer<'a>,
        sym: &'a SymmetryGroup,
        params: MonteParams,
        seed: u64,
    ) -> Result<Self, String> {
        if params.iterations == 0 {
            return Err("stochastic search needs at least one iteration".into());
        }
        if params.view_std < 0.0 || params.shift_std < 0.0 || params.defocus_std < 0.0 {
            return Err("perturbation widths must be non-negative".into());
        }
        Ok(Self {
            scorer,
            sym,
            params,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn perturb_view(&mut self, view: &View, normal: &Normal<f32>) -> View {
        let mut axis1 = view.axis.cross(&Vector3::z());
        if axis1.norm() < 1e-3 {
            axis1 = Vector3::x();
        }
        let axis1 = Unit::new_normalize(axis1);
        let axis2 = Unit::new_normalize(view.axis.cross(&axis1));
        let q1 = UnitQuaternion::from_axis_angle(&axis1, normal.sample(&mut self.rng));
        let q2 = UnitQuaternion::from_axis_angle(&axis2, normal.sample(&mut self.rng));
        let v = (q2 * q1) * view.axis;
        let da = if self.params.max_angle > 0.0 {
            self.rng.gen_range(-self.params.max_angle..=self.params.max_angle)
        } else {
            0.0
        };
        View::new(v[0], v[1], v[2], view.angle + da)
    }

    /// Nested stochastic pass over origin and, when enabled, defocus at a
    /// fixed view. Returns the best hypothesis seen, which includes the
    /// unperturbed start.
    fn fit_origin(
        &mut self,
        particle: &Plane,
        start: &Hypothesis,
        evals: &mut usize,
    ) -> Result<(Hypothesis, Score), String> {
        let mut best = *start;
        let mut best_score = self.scorer.score(particle, &best.candidate())?;
        *evals += 1;
        if self.params.shift_std <= 0.0 && self.params.defocus_std <= 0.0 {
            return Ok((best, best_score));
        }
        let shift_normal = Normal::new(0.0f32, self.params.shift_std.max(1e-6))
            .map_err(|e| format!("bad shift perturbation width: {e}"))?;
        let defocus_normal = if self.params.defocus_std > 0.0 {
            Some(
                Normal::new(0.0f32, self.params.defocus_std)
                    .map_err(|e| format!("bad defocus perturbation width: {e}"))?,
            )
        } else {
            None
        };
        let mut current = best;
        let mut current_score = best_score;
        for _ in 0..self.params.origin_iterations {
            let mut cand = current;
            cand.shift = current.shift
                + Vector2::new(
                    shift_normal.sample(&mut self.rng),
                    shift_normal.sample(&mut self.rng),
                );
            if let Some(dn) = &defocus_normal {
                if let Some(ctf) = &mut cand.ctf {
                    ctf.defocus_avg += dn.sample(&mut self.rng);
                    if !ctf.defocus_plausible() {
                        continue;
                    }
                }
            }
            let s = self.scorer.score(particle, &cand.candidate())?;
            *evals += 1;
            if s.fom > best_score.fom {
                best = cand;
                best_score = s;
            }
            let ratio = if current_score.fom > 0.0 {
                s.fom / current_score.fom
            } else {
                1.0
            };
            if ratio > self.rng.gen_range(0.0f32..1.0) {
                current = cand;
                current_score = s;
            }
        }
        Ok((best, best_score))
    }

    /// Runs the walk from `start`, seeding from the best-scoring
    /// symmetry-equivalent view.
    pub fn refine(&mut self, particle: &Plane, start: &Hypothesis) -> Result<RefineResult, String> {
        let mut evals = 0usize;
        let mut seeded: Option<(Hypothesis, Score)> = None;
        for view in self.sym.equivalent_views(&start.view) {
            let hyp = Hypothesis { view, ..*start };
            let s = self.scorer.score(particle, &hyp.candidate())?;
            evals += 1;
            if seeded.as_ref().map_or(true, |(_, c)| s.fom > c.fom) {
                seeded = Some((hyp, s));
            }
        }
        let (seed_hyp, _) =
            seeded.ok_or_else(|| "symmetry group produced no views".to_string())?;
        let (mut current, mut current_score) = self.fit_origin(particle, &seed_hyp, &mut evals)?;
        let mut best = current;
        let mut best_score = current_score;

        let view_normal = Normal::new(0.0f32, self.params.view_std.max(1e-6))
            .map_err(|e| format!("bad view perturbation width: {e}"))?;

        for _ in 0..self.params.iterations {
            let mut cand = current;
            cand.view = self.perturb_view(&current.view, &view_normal);
            if self.params.max_mag > 0.0 {
                let f = self.rng.gen_range(-self.params.max_mag..=self.params.max_mag);
                cand.magnification = current.magnification * (1.0 + f);
            }
            // Each view trial restarts the origin from the particle's
            // stored one; the nested pass refits it.
            cand.shift = start.shift;
            let (cand, s) = self.fit_origin(particle, &cand, &mut evals)?;
            if s.fom > best_score.fom {
                best = cand;
                best_score = s;
            }
            let ratio = if current_score.fom > 0.0 {
                s.fom / current_score.fom
            } else {
                1.0
            };
            if ratio > self.rng.gen_range(0.0f32..1.0) {
                current = cand;
                current_score = s;
            }
        }

        log::debug!(
            "stochastic refinement: fom {:.4} cv {:.4} after {} evaluations",
            best_score.fom,
            best_score.cv,
            evals
        );
        Ok(RefineResult {
            hypothesis: best,
            fom: best_score.fom,
            cv: best_score.cv,
            evaluations: evals,
        })
    }
}

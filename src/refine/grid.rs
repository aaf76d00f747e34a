//! Deterministic hierarchical grid search over orientation, origin,
//! defocus and magnification.
use nalgebra::Vector2;

use crate::image::Plane;
use crate::score::{Score, Scorer};
use crate::symmetry::SymmetryGroup;
use crate::view::views_for_refinement;

use super::{Hypothesis, RefineResult};

/// Grid search controls. Angles in radians, shifts in pixels of the scored
/// plane, defocus in ångström.
#[derive(Clone, Copy, Debug)]
pub struct GridParams {
    /// Starting angular step of the view neighborhood.
    pub alpha_step: f32,
    /// Angular convergence target; must not exceed `alpha_step`.
    pub angle_accuracy: f32,
    /// Starting origin step.
    pub shift_step: f32,
    /// Origin convergence target.
    pub shift_accuracy: f32,
    /// Defocus scan standard step; 0 disables the defocus scan.
    pub defocus_std: f32,
    /// Magnification search half-range (fractional); 0 disables it.
    pub max_mag: f32,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            alpha_step: 0.1,
            angle_accuracy: 0.01,
            shift_step: 1.0,
            shift_accuracy: 0.1,
            defocus_std: 0.0,
            max_mag: 0.0,
        }
    }
}

/// Minimum improvement treated as progress; smaller gains contract the
/// search step instead of moving the center.
const MIN_GAIN: f32 = 1e-6;
/// Safety stop for the contraction loops.
const MAX_LEVELS: usize = 64;

/// Hierarchical grid refiner for one particle.
pub struct GridRefiner<'a> {
    scorer: &'a Scorer<'a>,
    sym: &'a SymmetryGroup,
    params: GridParams,
}

impl<'a> GridRefiner<'a> {
    pub fn new(
        scorer: &'a Scorer<'a>,
        sym: &'a SymmetryGroup,
        params: GridParams,
    ) -> Result<Self, String> {
        if params.alpha_step < params.angle_accuracy {
            return Err(format!(
                "angular step {} below the accuracy target {}",
                params.alpha_step, params.angle_accuracy
            ));
        }
        if params.alpha_step <= 0.0 || params.shift_step <= 0.0 {
            return Err("grid steps must be positive".into());
        }
        if params.angle_accuracy <= 0.0 || params.shift_accuracy <= 0.0 {
            return Err("grid accuracy targets must be positive".into());
        }
        Ok(Self {
            scorer,
            sym,
            params,
        })
    }

    fn eval(
        &self,
        particle: &Plane,
        hyp: &Hypothesis,
        evals: &mut usize,
    ) -> Result<Score, String> {
        *evals += 1;
        self.scorer.score(particle, &hyp.candidate())
    }

    /// Contracting 3x3 origin search around the hypothesis' current shift.
    fn fit_origin(
        &self,
        particle: &Plane,
        hyp: &Hypothesis,
        step0: f32,
        accuracy: f32,
        evals: &mut usize,
    ) -> Result<(Hypothesis, Score), String> {
        let mut best = *hyp;
        let mut best_score = self.eval(particle, &best, evals)?;
        let mut step = step0;
        let mut levels = 0;
        while step >= accuracy && levels < MAX_LEVELS {
            let mut moved = false;
            let center = best.shift;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let cand = Hypothesis {
                        shift: center + Vector2::new(dx as f32, dy as f32) * step,
                        ..best
                    };
                    let s = self.eval(particle, &cand, evals)?;
                    if s.fom > best_score.fom + MIN_GAIN {
                        best = cand;
                        best_score = s;
                        moved = true;
                    }
                }
            }
            if !moved {
                step *= 0.5;
                levels += 1;
            }
        }
        Ok((best, best_score))
    }

    /// Contracting view search: each level scores the 27-view neighborhood
    /// with a nested origin fit, then either recenters or halves the step.
    fn fit_view(
        &self,
        particle: &Plane,
        start: &Hypothesis,
        evals: &mut usize,
    ) -> Result<(Hypothesis, Score), String> {
        let (mut best, mut best_score) = self.fit_origin(
            particle,
            start,
            self.params.shift_step,
            self.params.shift_accuracy,
            evals,
        )?;
        let mut step = self.params.alpha_step;
        let mut levels = 0;
        while step >= self.params.angle_accuracy && levels < MAX_LEVELS {
            let mut moved = false;
            for view in views_for_refinement(&best.view, step) {
                let cand = Hypothesis { view, ..best };
                let (cand, s) = self.fit_origin(
                    particle,
                    &cand,
                    2.0 * self.params.shift_accuracy,
                    self.params.shift_accuracy,
                    evals,
                )?;
                if s.fom > best_score.fom + MIN_GAIN {
                    best = cand;
                    best_score = s;
                    moved = true;
                }
            }
            if !moved {
                step *= 0.5;
                levels += 1;
            }
        }
        Ok((best, best_score))
    }

    /// Coarse defocus scan around the current value, best +- 5 steps. A
    /// refined defocus is kept only when positive and within 5 steps of the
    /// particle's starting defocus; anything else reverts.
    fn fit_defocus(
        &self,
        particle: &Plane,
        start_defocus: f32,
        best: &mut Hypothesis,
        best_score: &mut Score,
        evals: &mut usize,
    ) -> Result<(), String> {
        let std = self.params.defocus_std;
        let Some(ctf) = best.ctf else { return Ok(()) };
        if std <= 0.0 {
            return Ok(());
        }
        let window = 5.0 * std;
        let center = ctf.defocus_avg;
        for k in -5i32..=5 {
            if k == 0 {
                continue;
            }
            let mut cand_ctf = ctf;
            cand_ctf.defocus_avg = center + k as f32 * std;
            if cand_ctf.defocus_avg <= 0.0
                || (cand_ctf.defocus_avg - start_defocus).abs() > window + 1e-3
            {
                log::debug!("rejecting defocus {:.0}", cand_ctf.defocus_avg);
                continue;
            }
            let cand = Hypothesis {
                ctf: Some(cand_ctf),
                ..*best
            };
            let s = self.eval(particle, &cand, evals)?;
            if s.fom > best_score.fom + MIN_GAIN {
                *best = cand;
                *best_score = s;
            }
        }
        Ok(())
    }

    /// Magnification grid around the current value, each candidate refined
    /// with a short fixed origin pass.
    fn fit_magnification(
        &self,
        particle: &Plane,
        best: &mut Hypothesis,
        best_score: &mut Score,
        evals: &mut usize,
    ) -> Result<(), String> {
        let max_mag = self.params.max_mag;
        if max_mag <= 0.0 {
            return Ok(());
        }
        let center = best.magnification;
        let step = max_mag / 10.0;
        for k in -10i32..=10 {
            if k == 0 {
                continue;
            }
            let cand = Hypothesis {
                magnification: center * (1.0 + k as f32 * step),
                ..*best
            };
            let (cand, s) = self.fit_origin(particle, &cand, 0.4, 0.1, evals)?;
            if s.fom > best_score.fom + MIN_GAIN {
                *best = cand;
                *best_score = s;
            }
        }
        Ok(())
    }

    /// Runs the full search from `start`, trying every symmetry-equivalent
    /// starting view and keeping the best overall hypothesis.
    pub fn refine(&self, particle: &Plane, start: &Hypothesis) -> Result<RefineResult, String> {
        let mut evals = 0usize;
        let start_defocus = start.ctf.map_or(0.0, |c| c.defocus_avg);
        let mut overall: Option<(Hypothesis, Score)> = None;
        for view in self.sym.equivalent_views(&start.view) {
            let seeded = Hypothesis { view, ..*start };
            let (mut hyp, mut score) = self.fit_view(particle, &seeded, &mut evals)?;
            // Defocus is scanned once per orientation pass, outside the
            // angle and shift grids.
            self.fit_defocus(particle, start_defocus, &mut hyp, &mut score, &mut evals)?;
            if overall.as_ref().map_or(true, |(_, s)| score.fom > s.fom) {
                overall = Some((hyp, score));
            }
        }
        let (mut best, mut best_score) =
            overall.ok_or_else(|| "symmetry group produced no views".to_string())?;

        self.fit_magnification(particle, &mut best, &mut best_score, &mut evals)?;

        log::debug!(
            "grid refinement: fom {:.4} cv {:.4} after {} evaluations",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ScoreParams;

    fn dummy_scorer_volume() -> crate::image::Volume {
        crate::image::Volume::new(16, 16, 16, 1.0)
    }

    #[test]
    fn step_below_accuracy_is_rejected() {
        let vol = dummy_scorer_volume();
        let scorer = Scorer::new(&vol, ScoreParams::default()).unwrap();
        let sym = SymmetryGroup::parse("C1").unwrap();
        let params = GridParams {
            alpha_step: 0.005,
            angle_accuracy: 0.01,
            ..GridParams::default()
        };
        assert!(GridRefiner::new(&scorer, &sym, params).is_err());
    }

    #[test]
    fn non_positive_steps_rejected() {
        let vol = dummy_scorer_volume();
        let scorer = Scorer::new(&vol, ScoreParams::default()).unwrap();
        let sym = SymmetryGroup::parse("C1").unwrap();
        for params in [
            GridParams {
                shift_step: 0.0,
                ..GridParams::default()
            },
            GridParams {
                shift_accuracy: 0.0,
                ..GridParams::default()
            },
        ] {
            assert!(GridRefiner::new(&scorer, &sym, params).is_err());
        }
    }
}

//! JSON runtime configuration for the demo binaries.
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ctf::CtfCorrection;
use crate::prepare::PrepareParams;
use crate::recon::{Interpolation, ReconOptions};
use crate::refine::{GridParams, MonteParams, RefineMode, RefineOptions};
use crate::score::{FomKind, ScoreParams};

#[derive(Clone, Debug, Deserialize)]
pub struct ReconDemoConfig {
    /// Particle set (JSON-serialized [`crate::ParticleSet`]).
    pub particles: PathBuf,
    /// Output map (MRC).
    pub output_map: PathBuf,
    pub report_json: Option<PathBuf>,
    #[serde(default)]
    pub recon: ReconConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub symmetry: String,
    pub maps_per_class: usize,
    /// High-resolution limit (ångström).
    pub hi_res: f32,
    /// Low-resolution limit (ångström); 0 disables it.
    pub lo_res: f32,
    /// "nearest", "weighted" or "trilinear".
    pub interpolation: String,
    /// "none", "flip" or "wiener".
    pub ctf: String,
    /// Electron wavelength (ångström) for Ewald-curvature packing; 0 off.
    pub ewald_lambda: f32,
    pub pad_factor: usize,
    /// Map edge override (voxels); 0 derives it from the particle boxes.
    pub map_size: usize,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            symmetry: "C1".into(),
            maps_per_class: 2,
            hi_res: 8.0,
            lo_res: 0.0,
            interpolation: "nearest".into(),
            ctf: "none".into(),
            ewald_lambda: 0.0,
            pad_factor: 2,
            map_size: 0,
        }
    }
}

fn parse_interpolation(name: &str) -> Result<Interpolation, String> {
    match name {
        "nearest" => Ok(Interpolation::Nearest),
        "weighted" => Ok(Interpolation::WeightedNearest),
        "trilinear" => Ok(Interpolation::Trilinear),
        other => Err(format!("unknown interpolation '{other}'")),
    }
}

fn parse_ctf(name: &str) -> Result<CtfCorrection, String> {
    match name {
        "none" => Ok(CtfCorrection::None),
        "flip" => Ok(CtfCorrection::Flip),
        "wiener" => Ok(CtfCorrection::Wiener),
        other => Err(format!("unknown CTF correction '{other}'")),
    }
}

impl ReconConfig {
    pub fn to_options(&self) -> Result<ReconOptions, String> {
        Ok(ReconOptions {
            symmetry: self.symmetry.clone(),
            maps_per_class: self.maps_per_class,
            hi_res: self.hi_res,
            lo_res: self.lo_res,
            interpolation: parse_interpolation(&self.interpolation)?,
            ewald_lambda: self.ewald_lambda,
            prepare: PrepareParams {
                pad_factor: self.pad_factor,
                ctf_correction: parse_ctf(&self.ctf)?,
                ..PrepareParams::default()
            },
            map_size: self.map_size,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RefineDemoConfig {
    /// Particle set (JSON-serialized [`crate::ParticleSet`]).
    pub particles: PathBuf,
    /// Reference map (MRC).
    pub reference: PathBuf,
    /// Updated particle set written here (JSON).
    pub output_particles: PathBuf,
    pub report_json: Option<PathBuf>,
    #[serde(default)]
    pub refine: RefineConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// "grid" or "monte".
    pub mode: String,
    pub symmetry: String,
    pub hi_res: f32,
    pub lo_res: f32,
    /// "frc" or "dpr".
    pub fom: String,
    pub fom_threshold: f32,
    pub seed: u64,
    // grid search
    pub alpha_step_deg: f32,
    pub accuracy_deg: f32,
    pub shift_step: f32,
    pub shift_accuracy: f32,
    // stochastic search
    pub iterations: usize,
    pub view_std_deg: f32,
    pub max_angle_deg: f32,
    pub shift_std: f32,
    pub origin_iterations: usize,
    // shared extras
    pub defocus_std: f32,
    pub max_mag: f32,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            mode: "grid".into(),
            symmetry: "C1".into(),
            hi_res: 8.0,
            lo_res: 0.0,
            fom: "frc".into(),
            fom_threshold: 0.0,
            seed: 1,
            alpha_step_deg: 6.0,
            accuracy_deg: 0.5,
            shift_step: 1.0,
            shift_accuracy: 0.1,
            iterations: 500,
            view_std_deg: 3.0,
            max_angle_deg: 6.0,
            shift_std: 0.5,
            origin_iterations: 20,
            defocus_std: 0.0,
            max_mag: 0.0,
        }
    }
}

impl RefineConfig {
    pub fn to_options(&self) -> Result<RefineOptions, String> {
        let deg = std::f32::consts::PI / 180.0;
        let kind = match self.fom.as_str() {
            "frc" => FomKind::RingCorrelation,
            "dpr" => FomKind::PhaseResidual,
            other => return Err(format!("unknown figure of merit '{other}'")),
        };
        let mode = match self.mode.as_str() {
            "grid" => RefineMode::Grid(GridParams {
                alpha_step: self.alpha_step_deg * deg,
                angle_accuracy: self.accuracy_deg * deg,
                shift_step: self.shift_step,
                shift_accuracy: self.shift_accuracy,
                defocus_std: self.defocus_std,
                max_mag: self.max_mag,
            }),
            "monte" => RefineMode::Monte(MonteParams {
                iterations: self.iterations,
                view_std: self.view_std_deg * deg,
                max_angle: self.max_angle_deg * deg,
                shift_std: self.shift_std,
                defocus_std: self.defocus_std,
                max_mag: self.max_mag,
                origin_iterations: self.origin_iterations,
            }),
            other => return Err(format!("unknown refinement mode '{other}'")),
        };
        Ok(RefineOptions {
            mode,
            symmetry: self.symmetry.clone(),
            score: ScoreParams {
                hi_res: self.hi_res,
                lo_res: self.lo_res,
                kind,
                weight_curve: None,
            },
            fom_threshold: self.fom_threshold,
            seed: self.seed,
            ..RefineOptions::default()
        })
    }
}

pub fn load_recon_config(path: &Path) -> Result<ReconDemoConfig, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
}

pub fn load_refine_config(path: &Path) -> Result<RefineDemoConfig, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_recon_config_parses() {
        let cfg: ReconDemoConfig = serde_json::from_str(
            r#"{"particles": "set.json", "output_map": "map.mrc", "report_json": null}"#,
        )
        .unwrap();
        let opts = cfg.recon.to_options().unwrap();
        assert_eq!(opts.symmetry, "C1");
        assert_eq!(opts.maps_per_class, 2);
    }

    #[test]
    fn bad_interpolation_rejected() {
        let cfg = ReconConfig {
            interpolation: "bicubic".into(),
            ..ReconConfig::default()
        };
        assert!(cfg.to_options().is_err());
    }

    #[test]
    fn refine_mode_selection() {
        let grid = RefineConfig::default().to_options().unwrap();
        assert!(matches!(grid.mode, RefineMode::Grid(_)));
        let monte = RefineConfig {
            mode: "monte".into(),
            ..RefineConfig::default()
        }
        .to_options()
        .unwrap();
        assert!(matches!(monte.mode, RefineMode::Monte(_)));
        assert!(RefineConfig {
            mode: "anneal".into(),
            ..RefineConfig::default()
        }
        .to_options()
        .is_err());
    }
}

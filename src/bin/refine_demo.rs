//! Refinement demo: particle set plus reference map in, updated
//! orientations and report out.
use std::env;
use std::fs;
use std::path::Path;

use particle_recon::image::{mrc, Volume};
use particle_recon::config::{load_refine_config, RefineDemoConfig};
use particle_recon::types::ParticleRow;
use particle_recon::{refine_orientations, ParticleSet, RefineReport};
use serde::Serialize;

#[derive(Serialize)]
struct RefineDemoReport {
    report: RefineReport,
    particles: Vec<ParticleRow>,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn usage() -> String {
    "Usage: refine_demo <config.json>".to_string()
}

fn load_particles(config: &RefineDemoConfig) -> Result<ParticleSet, String> {
    let data = fs::read_to_string(&config.particles)
        .map_err(|e| format!("Failed to read {}: {e}", config.particles.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse {}: {e}", config.particles.display()))
}

fn run() -> Result<(), String> {
    let config_path = env::args().nth(1).ok_or_else(usage)?;
    let config = load_refine_config(Path::new(&config_path))?;
    let mut set = load_particles(&config)?;
    let opts = config.refine.to_options()?;

    let (header, values) = mrc::read_volume(&config.reference)?;
    let mut reference = Volume::from_real(header.nx, header.ny, header.nz, header.sampling, &values)?;
    // An all-zero header origin means "unset"; the density is then assumed
    // centered, like the particle images.
    reference.origin = if header.origin == nalgebra::Vector3::zeros() {
        nalgebra::Vector3::new(
            (header.nx / 2) as f32,
            (header.ny / 2) as f32,
            (header.nz / 2) as f32,
        )
    } else {
        header.origin
    };

    let report = refine_orientations(&mut set, &reference, &opts)?;
    println!(
        "refined {} particles: mean fom {:.4} -> {:.4}",
        report.particles, report.mean_fom_before, report.mean_fom_after
    );

    let json = serde_json::to_string_pretty(&set)
        .map_err(|e| format!("Failed to serialize particles: {e}"))?;
    fs::write(&config.output_particles, json)
        .map_err(|e| format!("Failed to write {}: {e}", config.output_particles.display()))?;

    if let Some(report_path) = &config.report_json {
        let full = RefineDemoReport {
            report,
            particles: set.particles.iter().map(ParticleRow::from).collect(),
        };
        let json = serde_json::to_string_pretty(&full)
            .map_err(|e| format!("Failed to serialize report: {e}"))?;
        fs::write(report_path, json)
            .map_err(|e| format!("Failed to write {}: {e}", report_path.display()))?;
    }
    Ok(())
}

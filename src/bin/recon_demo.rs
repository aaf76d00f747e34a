//! Reconstruction demo: particle set in, combined map and report out.
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use particle_recon::config::{load_recon_config, ReconDemoConfig};
use particle_recon::image::mrc;
use particle_recon::types::MapSummary;
use particle_recon::{combine, reconstruct, CombineOptions, MapGroup, ParticleSet};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn usage() -> String {
    "Usage: recon_demo <config.json>".to_string()
}

fn load_particles(config: &ReconDemoConfig) -> Result<ParticleSet, String> {
    let data = fs::read_to_string(&config.particles)
        .map_err(|e| format!("Failed to read {}: {e}", config.particles.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse {}: {e}", config.particles.display()))
}

fn run() -> Result<(), String> {
    let config_path = env::args().nth(1).ok_or_else(usage)?;
    let config = load_recon_config(Path::new(&config_path))?;
    let set = load_particles(&config)?;
    let opts = config.recon.to_options()?;

    let accs = reconstruct(&set, &opts)?;

    let mut summaries: BTreeMap<String, MapSummary> = BTreeMap::new();
    let full = combine(&accs, MapGroup::Full, &CombineOptions::default())?;
    summaries.insert("full".into(), MapSummary::from(&full));
    if accs.len() > 1 {
        let half_opts = CombineOptions {
            produce_real_map: false,
            snr_map: false,
        };
        let h1 = combine(&accs, MapGroup::Half1, &half_opts)?;
        let h2 = combine(&accs, MapGroup::Half2, &half_opts)?;
        summaries.insert("half1".into(), MapSummary::from(&h1));
        summaries.insert("half2".into(), MapSummary::from(&h2));
    }

    let real: Vec<f32> = full.map.data.iter().map(|v| v.re).collect();
    mrc::write_volume(
        &config.output_map,
        full.map.nx,
        full.map.ny,
        full.map.nz,
        full.map.sampling,
        full.map.origin,
        &real,
    )?;
    println!(
        "map {} ({}^3): coverage {:.3}, FSC(0.3) at {:.2} A",
        config.output_map.display(),
        full.map.nx,
        full.coverage,
        full.resolution_fsc
    );

    if let Some(report_path) = &config.report_json {
        let json = serde_json::to_string_pretty(&summaries)
            .map_err(|e| format!("Failed to serialize report: {e}"))?;
        fs::write(report_path, json)
            .map_err(|e| format!("Failed to write {}: {e}", report_path.display()))?;
    }
    Ok(())
}

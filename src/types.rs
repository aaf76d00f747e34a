//! Serializable summaries for reports and the demo binaries.
use serde::Serialize;

use crate::particle::ParticleRecord;
use crate::recon::{ReconMap, ShellStat};

/// Flat summary of a combined map, suitable for JSON reports.
#[derive(Clone, Debug, Serialize)]
pub struct MapSummary {
    pub size: usize,
    pub sampling: f32,
    pub planes_packed: usize,
    pub coverage: f32,
    pub covered_voxels: usize,
    pub friedel_residual: f32,
    pub resolution_fsc: f32,
    pub resolution_snr: f32,
    pub shells: Vec<ShellStat>,
}

impl From<&ReconMap> for MapSummary {
    fn from(map: &ReconMap) -> Self {
        Self {
            size: map.map.nx,
            sampling: map.map.sampling,
            planes_packed: map.planes_packed,
            coverage: map.coverage,
            covered_voxels: map.covered_voxels,
            friedel_residual: map.friedel_residual,
            resolution_fsc: map.resolution_fsc,
            resolution_snr: map.resolution_snr,
            shells: map.shells.clone(),
        }
    }
}

/// One particle's orientation model as a report row.
#[derive(Clone, Debug, Serialize)]
pub struct ParticleRow {
    pub id: usize,
    pub view: [f32; 4],
    pub origin: Option<[f32; 2]>,
    pub magnification: f32,
    pub defocus: Option<f32>,
    pub fom: f32,
    pub fom_cv: f32,
    pub select: u32,
}

impl From<&ParticleRecord> for ParticleRow {
    fn from(p: &ParticleRecord) -> Self {
        Self {
            id: p.id,
            view: [p.view.axis[0], p.view.axis[1], p.view.axis[2], p.view.angle],
            origin: p.origin.map(|o| [o[0], o[1]]),
            magnification: p.magnification,
            defocus: p.defocus,
            fom: p.fom,
            fom_cv: p.fom_cv,
            select: p.select,
        }
    }
}

//! Distribution of particles over reconstruction accumulators and the
//! parallel packing drive.
use rayon::prelude::*;

use crate::particle::ParticleSet;
use crate::prepare::{ft_size, prepare_particle, PrepareParams};
use crate::recon::accumulator::{Accumulator, Interpolation, PackParams};
use crate::symmetry::SymmetryGroup;

/// Controls for a reconstruction run.
#[derive(Clone, Debug)]
pub struct ReconOptions {
    /// Point-group symmetry label.
    pub symmetry: String,
    /// Accumulators per class: 1 for a single map, 2 for half-set maps,
    /// more for multi-map bootstrap schemes.
    pub maps_per_class: usize,
    /// High-resolution packing limit (ångström).
    pub hi_res: f32,
    /// Low-resolution packing limit (ångström); 0 disables it.
    pub lo_res: f32,
    pub interpolation: Interpolation,
    /// Electron wavelength (ångström) for Ewald-sphere curvature during
    /// packing; 0 packs flat central sections.
    pub ewald_lambda: f32,
    pub prepare: PrepareParams,
    /// Map edge length override; derived from the particle boxes when 0.
    pub map_size: usize,
}

impl Default for ReconOptions {
    fn default() -> Self {
        Self {
            symmetry: "C1".into(),
            maps_per_class: 1,
            hi_res: 8.0,
            lo_res: 0.0,
            interpolation: Interpolation::Nearest,
            ewald_lambda: 0.0,
            prepare: PrepareParams::default(),
            map_size: 0,
        }
    }
}

/// Round-robin assignment of selected particles to accumulators: particles
/// of class `c` cycle through the `maps_per_class` buckets of that class.
pub fn assign_buckets(set: &ParticleSet, maps_per_class: usize) -> Vec<Vec<usize>> {
    let classes = set.class_count().max(1);
    let mut buckets = vec![Vec::new(); classes * maps_per_class];
    let mut counters = vec![0usize; classes];
    for (i, p) in set.particles.iter().enumerate() {
        if p.select == 0 {
            continue;
        }
        let class = p.class - 1;
        let bucket = class * maps_per_class + counters[class] % maps_per_class;
        counters[class] += 1;
        buckets[bucket].push(i);
    }
    buckets
}

/// Map geometry derived from the particle boxes: the transform size of the
/// largest selected box, at the pixel size of its micrograph.
fn map_geometry(set: &ParticleSet, opts: &ReconOptions) -> Result<(usize, f32), String> {
    let mut size = opts.map_size;
    let mut sampling = 0.0f32;
    for p in set.particles.iter().filter(|p| p.select > 0) {
        let mg = &set.micrographs[p.micrograph];
        let s = ft_size(mg.box_size, opts.prepare.scale, opts.prepare.pad_factor);
        if s > size && opts.map_size == 0 {
            size = s;
        }
        if sampling == 0.0 {
            sampling = mg.pixel_size / opts.prepare.scale;
        }
    }
    if size == 0 || sampling == 0.0 {
        return Err("no selected particles to reconstruct".into());
    }
    Ok((size, sampling))
}

/// Packs every selected particle into per-bucket accumulators in parallel.
///
/// Each worker owns a private accumulator for its bucket, so no packing
/// locks are needed. An unreadable or malformed particle aborts the whole
/// run; a reconstruction from silently dropped particles would be worse
/// than no reconstruction.
pub fn reconstruct(set: &ParticleSet, opts: &ReconOptions) -> Result<Vec<Accumulator>, String> {
    set.validate()?;
    if opts.maps_per_class == 0 {
        return Err("maps_per_class must be at least 1".into());
    }
    let sym = SymmetryGroup::parse(&opts.symmetry)?;
    let (size, sampling) = map_geometry(set, opts)?;
    let params = PackParams {
        size,
        sampling,
        hi_res: opts.hi_res,
        lo_res: opts.lo_res,
        interpolation: opts.interpolation,
        ewald_lambda: opts.ewald_lambda,
    };
    let buckets = assign_buckets(set, opts.maps_per_class);
    log::info!(
        "reconstructing {} particles into {} maps of {}^3 at {:.2} A/px (symmetry {})",
        buckets.iter().map(Vec::len).sum::<usize>(),
        buckets.len(),
        size,
        sampling,
        sym.label()
    );

    buckets
        .into_par_iter()
        .map(|indices| {
            let mut acc = Accumulator::new(params)?;
            for i in indices {
                let p = &set.particles[i];
                let mg = &set.micrographs[p.micrograph];
                let prep = prepare_particle(p, mg, &opts.prepare)
                    .map_err(|e| format!("particle {} failed: {e}", p.id))?;
                acc.pack_plane_symmetric(&prep.plane, &p.view, &sym, p.magnification, prep.weight)?;
            }
            log::debug!("bucket packed {} planes", acc.planes_packed);
            Ok(acc)
        })
        .collect()
}

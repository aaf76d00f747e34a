//! Particle metadata: micrographs, particle records and the flat set
//! holding both.
//!
//! Records reference their micrograph by index into the set's micrograph
//! vector, so the whole model is a pair of flat arenas that serializes
//! cleanly and can be sliced for parallel work without chasing pointers.
use std::path::PathBuf;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::ctf::CtfParams;
use crate::view::View;

/// One micrograph and the acquisition parameters shared by its particles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Micrograph {
    pub id: String,
    /// Particle image stack (MRC, one z-slice per particle). `None` for
    /// purely in-memory sets.
    pub stack_path: Option<PathBuf>,
    /// Pixel size of the particle images (ångström / pixel).
    pub pixel_size: f32,
    /// Box size of the windowed particle images (pixels).
    pub box_size: usize,
    /// CTF model for this micrograph, if determined.
    pub ctf: Option<CtfParams>,
}

impl Default for Micrograph {
    fn default() -> Self {
        Self {
            id: String::new(),
            stack_path: None,
            pixel_size: 1.0,
            box_size: 0,
            ctf: None,
        }
    }
}

/// One particle: where its image lives and the current orientation model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub id: usize,
    /// Index into [`ParticleSet::micrographs`].
    pub micrograph: usize,
    /// z-slice in the micrograph's particle stack.
    pub slice: usize,
    /// Origin within the box (pixels); `None` falls back to the stack
    /// header origin, then to the box center.
    pub origin: Option<Vector2<f32>>,
    pub view: View,
    pub magnification: f32,
    /// Per-particle defocus override (ångström); `None` uses the
    /// micrograph CTF defocus.
    pub defocus: Option<f32>,
    /// 1-based class assignment.
    pub class: usize,
    /// Selection count: 0 excludes the particle, values above 1 weight it
    /// (bootstrap resampling).
    pub select: u32,
    /// Figure of merit from the last refinement pass.
    pub fom: f32,
    /// Cross-validation band figure of merit from the last refinement pass.
    #[serde(default)]
    pub fom_cv: f32,
}

impl Default for ParticleRecord {
    fn default() -> Self {
        Self {
            id: 0,
            micrograph: 0,
            slice: 0,
            origin: None,
            view: View::default(),
            magnification: 1.0,
            defocus: None,
            class: 1,
            select: 1,
            fom: 0.0,
            fom_cv: 0.0,
        }
    }
}

/// The full data model: micrograph arena plus particle arena.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParticleSet {
    pub micrographs: Vec<Micrograph>,
    pub particles: Vec<ParticleRecord>,
}

impl ParticleSet {
    /// Checks internal consistency: micrograph references in range, classes
    /// 1-based, positive box and pixel sizes on referenced micrographs.
    pub fn validate(&self) -> Result<(), String> {
        for p in &self.particles {
            let mg = self
                .micrographs
                .get(p.micrograph)
                .ok_or_else(|| format!("particle {} references micrograph {} of {}", p.id, p.micrograph, self.micrographs.len()))?;
            if p.class == 0 {
                return Err(format!("particle {} has class 0 (classes are 1-based)", p.id));
            }
            if p.select > 0 {
                if mg.box_size == 0 {
                    return Err(format!(
                        "micrograph '{}' has no box size but particle {} is selected",
                        mg.id, p.id
                    ));
                }
                if mg.pixel_size <= 0.0 {
                    return Err(format!("micrograph '{}' has non-positive pixel size", mg.id));
                }
            }
        }
        Ok(())
    }

    /// Indices of particles with a non-zero selection count.
    pub fn selected(&self) -> Vec<usize> {
        self.particles
            .iter()
            .enumerate()
            .filter(|(_, p)| p.select > 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Highest class number present among selected particles.
    pub fn class_count(&self) -> usize {
        self.particles
            .iter()
            .filter(|p| p.select > 0)
            .map(|p| p.class)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_set() -> ParticleSet {
        ParticleSet {
            micrographs: vec![Micrograph {
                id: "mg1".into(),
                box_size: 32,
                ..Micrograph::default()
            }],
            particles: vec![
                ParticleRecord {
                    id: 1,
                    ..ParticleRecord::default()
                },
                ParticleRecord {
                    id: 2,
                    select: 0,
                    ..ParticleRecord::default()
                },
                ParticleRecord {
                    id: 3,
                    class: 2,
                    ..ParticleRecord::default()
                },
            ],
        }
    }

    #[test]
    fn validate_accepts_consistent_set() {
        assert!(small_set().validate().is_ok());
    }

    #[test]
    fn validate_rejects_dangling_micrograph() {
        let mut set = small_set();
        set.particles[0].micrograph = 5;
        assert!(set.validate().unwrap_err().contains("references micrograph"));
    }

    #[test]
    fn selection_and_classes() {
        let set = small_set();
        assert_eq!(set.selected(), vec![0, 2]);
        assert_eq!(set.class_count(), 2);
    }
}

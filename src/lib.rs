#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod config;
pub mod image;
pub mod particle;
pub mod recon;
pub mod refine;
pub mod types;

// "Expert" modules - public, but considered unstable internals.
pub mod ctf;
pub mod kernel;
pub mod prepare;
pub mod score;
pub mod symmetry;
pub mod view;

// --- High-level re-exports -------------------------------------------------

// Main entry points: reconstruction + refinement.
pub use crate::recon::{combine, reconstruct, CombineOptions, MapGroup, ReconMap, ReconOptions};
pub use crate::refine::{refine_orientations, RefineMode, RefineOptions, RefineReport};

// The data model everything operates on.
pub use crate::particle::{Micrograph, ParticleRecord, ParticleSet};

// Report types for JSON output.
pub use crate::types::{MapSummary, ParticleRow};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
pub mod prelude {
    pub use crate::ctf::{CtfCorrection, CtfParams};
    pub use crate::image::{Plane, Volume};
    pub use crate::view::View;
    pub use crate::{
        combine, reconstruct, refine_orientations, CombineOptions, MapGroup, Micrograph,
        ParticleRecord, ParticleSet, ReconMap, ReconOptions, RefineMode, RefineOptions,
        RefineReport,
    };
}

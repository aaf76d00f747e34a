//! Reciprocal-space reconstruction: packing, parallel coordination and
//! map combination.
pub mod accumulator;
pub mod combine;
pub mod coordinator;

pub use accumulator::{Accumulator, Interpolation, PackParams};
pub use combine::{combine, CombineOptions, MapGroup, ReconMap, ShellStat};
pub use coordinator::{reconstruct, ReconOptions};

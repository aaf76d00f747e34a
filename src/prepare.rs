//! Particle preparation: from a boxed real-space image to an
//! origin-phased, CTF-compensated transform ready for packing.
use nalgebra::Vector2;

use crate::ctf::{CtfCorrection, CtfParams};
use crate::image::fft::{fft2, Direction};
use crate::image::{mrc, Plane};
use crate::particle::{Micrograph, ParticleRecord};

/// Controls for the preparation stage.
#[derive(Clone, Copy, Debug)]
pub struct PrepareParams {
    /// Fourier padding factor; 0 or 1 disables padding.
    pub pad_factor: usize,
    /// Reconstruction scale relative to the particle images.
    pub scale: f32,
    /// CTF compensation applied to the transform.
    pub ctf_correction: CtfCorrection,
    /// Weight attenuation constant for padded transforms. Padding spreads
    /// each particle's power over more voxels; the packed weight is divided
    /// by `pad_ratio^2 * pad_weight_constant` to compensate.
    pub pad_weight_constant: f32,
}

impl Default for PrepareParams {
    fn default() -> Self {
        Self {
            pad_factor: 2,
            scale: 1.0,
            ctf_correction: CtfCorrection::None,
            pad_weight_constant: 0.6,
        }
    }
}

/// A particle transform ready for packing or scoring.
#[derive(Clone, Debug)]
pub struct PreparedParticle {
    /// Fourier transform with the phase origin at (0, 0).
    pub plane: Plane,
    /// Packing weight (selection count, corrected for padding).
    pub weight: f32,
    /// CTF snapshot with the per-particle defocus applied.
    pub ctf: Option<CtfParams>,
    /// The origin the phase shift removed (padded-image pixels).
    pub origin: Vector2<f32>,
}

/// Transform size for a given box: the next power of two at or above
/// `pad_factor * box_size * scale`.
pub fn ft_size(box_size: usize, scale: f32, pad_factor: usize) -> usize {
    let target = (pad_factor.max(1) as f32 * box_size as f32 * scale).ceil() as usize;
    target.max(1).next_power_of_two()
}

/// CTF snapshot for one particle: the micrograph model with the particle's
/// defocus override folded in.
pub fn ctf_snapshot(record: &ParticleRecord, mg: &Micrograph) -> Option<CtfParams> {
    mg.ctf.map(|mut ctf| {
        if let Some(def) = record.defocus {
            ctf.defocus_avg = def;
        }
        ctf
    })
}

/// Origin defaulting: the record's origin, then the stack header origin,
/// then the box center.
pub fn resolve_origin(
    record: &ParticleRecord,
    header_origin: Option<Vector2<f32>>,
    center: Vector2<f32>,
) -> Vector2<f32> {
    record.origin.or(header_origin).unwrap_or(center)
}

/// Prepares an already-loaded particle image.
///
/// Normalizes to zero mean and unit standard deviation, subtracts the
/// corner background, resolves the origin (record, then `header_origin`,
/// then box center), pads to the transform size, forward-transforms,
/// shifts the phase origin to (0, 0) and applies the CTF compensation.
pub fn prepare_plane(
    mut plane: Plane,
    record: &ParticleRecord,
    mg: &Micrograph,
    header_origin: Option<Vector2<f32>>,
    params: &PrepareParams,
) -> Result<PreparedParticle, String> {
    if plane.nx == 0 || plane.ny == 0 {
        return Err(format!("particle {} has an empty image", record.id));
    }
    plane.rescale_to(0.0, 1.0);
    let bg = plane.background();
    for v in plane.data.iter_mut() {
        v.re -= bg;
    }

    let center = Vector2::new((plane.nx / 2) as f32, (plane.ny / 2) as f32);
    let origin = resolve_origin(record, header_origin, center);
    // A NaN or infinite origin would poison every phase in the transform.
    if !origin[0].is_finite() || !origin[1].is_finite() {
        return Err(format!(
            "particle {} has a degenerate origin ({}, {})",
            record.id, origin[0], origin[1]
        ));
    }
    plane.origin = origin;

    let mut weight = record.select.max(1) as f32;
    let size = ft_size(mg.box_size.max(plane.nx), params.scale, params.pad_factor);
    if size > plane.nx {
        let ratio = size as f32 / plane.nx as f32;
        weight /= ratio * ratio * params.pad_weight_constant;
        plane = plane.pad_to(size, size, 0.0)?;
    }

    let resolved = plane.origin;
    fft2(&mut plane, Direction::Forward);
    plane.phase_shift_to_origin();

    let ctf = ctf_snapshot(record, mg);
    if let Some(ctf) = &ctf {
        ctf.apply(&mut plane, params.ctf_correction);
    }

    log::debug!(
        "prepared particle {}: size {} weight {:.4} origin ({:.1}, {:.1})",
        record.id,
        plane.nx,
        weight,
        record.origin.map_or(center[0], |o| o[0]),
        record.origin.map_or(center[1], |o| o[1]),
    );
    Ok(PreparedParticle {
        plane,
        weight,
        ctf,
        origin: resolved,
    })
}

/// Loads a particle image from its micrograph stack and prepares it.
pub fn prepare_particle(
    record: &ParticleRecord,
    mg: &Micrograph,
    params: &PrepareParams,
) -> Result<PreparedParticle, String> {
    let path = mg
        .stack_path
        .as_ref()
        .ok_or_else(|| format!("micrograph '{}' has no particle stack", mg.id))?;
    let (header, values) = mrc::read_slice(path, record.slice)?;
    if mg.box_size != 0 && (header.nx != mg.box_size || header.ny != mg.box_size) {
        return Err(format!(
            "stack {} slice size {}x{} does not match box size {}",
            path.display(),
            header.nx,
            header.ny,
            mg.box_size
        ));
    }
    let plane = Plane::from_real(header.nx, header.ny, mg.pixel_size, &values)?;
    let header_origin = if header.origin[0] != 0.0 || header.origin[1] != 0.0 {
        Some(Vector2::new(header.origin[0], header.origin[1]))
    } else {
        None
    };
    prepare_plane(plane, record, mg, header_origin, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleRecord;

    fn test_mg(box_size: usize) -> Micrograph {
        Micrograph {
            id: "mg".into(),
            box_size,
            pixel_size: 2.0,
            ..Micrograph::default()
        }
    }

    fn test_image(n: usize) -> Plane {
        let vals: Vec<f32> = (0..n * n).map(|i| ((i * 7) % 13) as f32).collect();
        Plane::from_real(n, n, 2.0, &vals).unwrap()
    }

    #[test]
    fn ft_size_is_padded_power_of_two() {
        assert_eq!(ft_size(32, 1.0, 2), 64);
        assert_eq!(ft_size(48, 1.0, 2), 128);
        assert_eq!(ft_size(32, 1.0, 0), 32);
        assert_eq!(ft_size(33, 1.0, 1), 64);
    }

    #[test]
    fn padding_attenuates_weight() {
        let mg = test_mg(16);
        let record = ParticleRecord::default();
        let params = PrepareParams::default();
        let prep = prepare_plane(test_image(16), &record, &mg, None, &params).unwrap();
        assert_eq!(prep.plane.nx, 32);
        let expected = 1.0 / (4.0 * 0.6);
        assert!((prep.weight - expected).abs() < 1e-5);
    }

    #[test]
    fn unpadded_weight_is_selection_count() {
        let mg = test_mg(16);
        let record = ParticleRecord {
            select: 3,
            ..ParticleRecord::default()
        };
        let params = PrepareParams {
            pad_factor: 1,
            ..PrepareParams::default()
        };
        let prep = prepare_plane(test_image(16), &record, &mg, None, &params).unwrap();
        assert_eq!(prep.plane.nx, 16);
        assert!((prep.weight - 3.0).abs() < 1e-6);
    }

    #[test]
    fn origin_fallback_chain() {
        let center = Vector2::new(8.0, 8.0);
        let header = Some(Vector2::new(5.0, 5.0));
        let with_origin = ParticleRecord {
            origin: Some(Vector2::new(7.0, 9.0)),
            ..ParticleRecord::default()
        };
        let without = ParticleRecord::default();
        assert_eq!(resolve_origin(&with_origin, header, center), Vector2::new(7.0, 9.0));
        assert_eq!(resolve_origin(&without, header, center), Vector2::new(5.0, 5.0));
        assert_eq!(resolve_origin(&without, None, center), center);
    }

    #[test]
    fn prepared_plane_origin_is_reset() {
        let mg = test_mg(16);
        let params = PrepareParams {
            pad_factor: 1,
            ..PrepareParams::default()
        };
        let prep = prepare_plane(
            test_image(16),
            &ParticleRecord::default(),
            &mg,
            Some(Vector2::new(5.0, 5.0)),
            &params,
        )
        .unwrap();
        assert_eq!(prep.plane.origin, Vector2::zeros());
    }

    #[test]
    fn degenerate_origin_is_an_error() {
        let mg = test_mg(16);
        let record = ParticleRecord {
            origin: Some(Vector2::new(f32::NAN, 2.0)),
            ..ParticleRecord::default()
        };
        let err = prepare_plane(test_image(16), &record, &mg, None, &PrepareParams::default())
            .unwrap_err();
        assert!(err.contains("degenerate origin"), "{err}");
    }

    #[test]
    fn missing_stack_is_an_error() {
        let mg = test_mg(16);
        let record = ParticleRecord::default();
        let err = prepare_particle(&record, &mg, &PrepareParams::default()).unwrap_err();
        assert!(err.contains("no particle stack"));
    }
}

//! Contrast transfer function model.
//!
//! Parameters are captured as an immutable snapshot per particle before any
//! parallel work starts; refiners that search defocus copy the snapshot and
//! perturb the copy. All lengths are in ångström, angles in radians.
use serde::{Deserialize, Serialize};

use crate::image::Plane;

/// How to compensate the CTF when packing a particle transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtfCorrection {
    /// Leave amplitudes untouched.
    None,
    /// Multiply by the sign of the CTF (phase flipping).
    Flip,
    /// Multiply by `ctf / (ctf^2 + noise)` (single-image Wiener filter).
    Wiener,
}

/// Microscope and per-particle aberration parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CtfParams {
    /// Acceleration voltage (volt).
    pub volt: f32,
    /// Spherical aberration (ångström).
    pub cs: f32,
    /// Amplitude contrast fraction, in `[0, 1)`.
    pub amp_contrast: f32,
    /// Average defocus (ångström, positive = underfocus).
    pub defocus_avg: f32,
    /// Astigmatic defocus deviation (ångström).
    pub defocus_dev: f32,
    /// Astigmatism angle (radians).
    pub ast_angle: f32,
    /// Noise floor for the Wiener correction.
    pub wiener: f32,
}

impl Default for CtfParams {
    fn default() -> Self {
        Self {
            volt: 300_000.0,
            cs: 2.0e7,
            amp_contrast: 0.07,
            defocus_avg: 2.0e4,
            defocus_dev: 0.0,
            ast_angle: 0.0,
            wiener: 0.2,
        }
    }
}

impl CtfParams {
    /// Relativistically corrected electron wavelength (ångström).
    pub fn lambda(&self) -> f32 {
        12.2643 / (self.volt * (1.0 + self.volt * 0.97845e-6)).sqrt()
    }

    /// Defocus along the direction `angle` in the image plane.
    pub fn defocus_at(&self, angle: f32) -> f32 {
        self.defocus_avg + self.defocus_dev * (2.0 * (angle - self.ast_angle)).cos()
    }

    /// Aberration phase at spatial frequency `s` (1/Å) and direction `angle`.
    pub fn delta_phi(&self, s: f32, angle: f32) -> f32 {
        let lambda = self.lambda();
        let t1 = 0.5 * std::f32::consts::PI * lambda * lambda * lambda * self.cs;
        let t2 = std::f32::consts::PI * lambda;
        let s2 = s * s;
        (t1 * s2 - t2 * self.defocus_at(angle)) * s2 - self.amp_contrast.asin()
    }

    /// CTF value at spatial frequency `s` and direction `angle`.
    pub fn value(&self, s: f32, angle: f32) -> f32 {
        self.delta_phi(s, angle).sin()
    }

    /// Basic plausibility check used when refiners search defocus.
    pub fn defocus_plausible(&self) -> bool {
        self.defocus_avg > 100.0 && self.defocus_avg < 2.0e5
    }

    /// Applies the chosen correction to a centered 2-D transform in place.
    pub fn apply(&self, plane: &mut Plane, correction: CtfCorrection) {
        if correction == CtfCorrection::None {
            return;
        }
        let (nx, ny) = (plane.nx as i64, plane.ny as i64);
        let real_x = plane.nx as f32 * plane.sampling;
        let real_y = plane.ny as f32 * plane.sampling;
        for y in 0..ny {
            let hy = if y < (ny + 1) / 2 { y } else { y - ny } as f32 / real_y;
            for x in 0..nx {
                let hx = if x < (nx + 1) / 2 { x } else { x - nx } as f32 / real_x;
                let s = (hx * hx + hy * hy).sqrt();
                let c = self.value(s, hy.atan2(hx));
                let gain = match correction {
                    CtfCorrection::None => 1.0,
                    CtfCorrection::Flip => {
                        if c < 0.0 {
                            -1.0
                        } else {
                            1.0
                        }
                    }
                    CtfCorrection::Wiener => c / (c * c + self.wiener),
                };
                let i = plane.idx(x as usize, y as usize);
                plane.data[i] *= gain;
            }
        }
    }
}

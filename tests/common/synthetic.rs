//! Synthetic test data: an asymmetric blob map and projection images of it.
use nalgebra::{Vector2, Vector3};
use particle_recon::image::fft::{fft2, fft3, Direction};
use particle_recon::image::{Plane, Volume};
use particle_recon::kernel::SpectralKernel;
use particle_recon::view::View;

/// A map built from a few Gaussian blobs with no symmetry, centered density,
/// origin at the volume center.
pub fn blob_volume(n: usize, sampling: f32) -> Volume {
    let c = n as f32 / 2.0;
    let blobs: [(f32, f32, f32, f32, f32); 3] = [
        // (dx, dy, dz, width, amplitude) relative to the center
        (0.0, 0.0, 0.0, 0.16 * n as f32, 1.0),
        (0.12 * n as f32, 0.06 * n as f32, -0.04 * n as f32, 0.08 * n as f32, 0.8),
        (-0.08 * n as f32, 0.1 * n as f32, 0.08 * n as f32, 0.06 * n as f32, 0.6),
    ];
    let mut vals = vec![0f32; n * n * n];
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let mut v = 0.0f32;
                for (bx, by, bz, w, a) in blobs {
                    let dx = x as f32 - c - bx;
                    let dy = y as f32 - c - by;
                    let dz = z as f32 - c - bz;
                    v += a * (-(dx * dx + dy * dy + dz * dz) / (w * w)).exp();
                }
                vals[(z * n + y) * n + x] = v;
            }
        }
    }
    let mut vol = Volume::from_real(n, n, n, sampling, &vals).unwrap();
    vol.origin = Vector3::new(c, c, c);
    vol
}

/// Origin-phased Fourier transform of a real-space map.
pub fn transform_of(map: &Volume) -> Volume {
    let mut ft = map.clone();
    fft3(&mut ft, Direction::Forward);
    ft.phase_shift_to_origin();
    ft
}

/// Real-space projection of the map along `view`, with the density centered
/// in the box (central-slice extraction plus inverse transform).
pub fn project(map: &Volume, view: &View) -> Plane {
    let ft = transform_of(map);
    let kernel = SpectralKernel::default();
    let radius = map.nx as f32 / 2.0 - 1.0;
    let mut section = ft.central_section(&view.matrix(), radius, &kernel);
    section.origin = Vector2::zeros();
    section.phase_shift_to_center();
    fft2(&mut section, Direction::Inverse);
    // Drop the interpolation's imaginary leakage.
    for v in section.data.iter_mut() {
        v.im = 0.0;
    }
    section
}

/// Roughly uniform view directions over the sphere (golden-angle spiral).
pub fn spiral_views(count: usize) -> Vec<View> {
    let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    (0..count)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = golden * i as f32;
            View::new(r * phi.cos(), r * phi.sin(), z, 0.1 * i as f32)
        })
        .collect()
}

/// Zero-mean correlation between the real parts of two volumes.
pub fn real_correlation(a: &Volume, b: &Volume) -> f32 {
    assert_eq!(a.data.len(), b.data.len());
    let (ma, _) = a.real_stats();
    let (mb, _) = b.real_stats();
    let mut num = 0.0f64;
    let mut da = 0.0f64;
    let mut db = 0.0f64;
    for (x, y) in a.data.iter().zip(&b.data) {
        let xa = (x.re - ma) as f64;
        let yb = (y.re - mb) as f64;
        num += xa * yb;
        da += xa * xa;
        db += yb * yb;
    }
    (num / (da * db).sqrt().max(1e-30)) as f32
}

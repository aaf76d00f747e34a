//! FFT helpers over [`Plane`] and [`Volume`].
//!
//! Row-column decomposition on top of rustfft. Forward transforms are
//! unnormalized; inverse transforms scale by `1/N` so a forward/inverse
//! pair is the identity.
use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;

use super::{Plane, Volume};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

fn transform_lines(
    planner: &mut FftPlanner<f32>,
    data: &mut [Complex32],
    n: usize,
    count: usize,
    stride: usize,
    base: impl Fn(usize) -> usize,
    dir: Direction,
) {
    let fft = match dir {
        Direction::Forward => planner.plan_fft_forward(n),
        Direction::Inverse => planner.plan_fft_inverse(n),
    };
    let mut line = vec![Complex32::new(0.0, 0.0); n];
    for c in 0..count {
        let b = base(c);
        for (i, v) in line.iter_mut().enumerate() {
            *v = data[b + i * stride];
        }
        fft.process(&mut line);
        for (i, v) in line.iter().enumerate() {
            data[b + i * stride] = *v;
        }
    }
}

/// In-place 2-D FFT of a plane.
pub fn fft2(plane: &mut Plane, dir: Direction) {
    let (nx, ny) = (plane.nx, plane.ny);
    let mut planner = FftPlanner::new();
    // x lines
    transform_lines(&mut planner, &mut plane.data, nx, ny, 1, |r| r * nx, dir);
    // y lines
    transform_lines(&mut planner, &mut plane.data, ny, nx, nx, |c| c, dir);
    if dir == Direction::Inverse {
        let scale = 1.0 / (nx * ny) as f32;
        for v in plane.data.iter_mut() {
            *v *= scale;
        }
    }
}

/// In-place 3-D FFT of a volume.
pub fn fft3(vol: &mut Volume, dir: Direction) {
    let (nx, ny, nz) = (vol.nx, vol.ny, vol.nz);
    let mut planner = FftPlanner::new();
    // x lines
    transform_lines(&mut planner, &mut vol.data, nx, ny * nz, 1, |r| r * nx, dir);
    // y lines
    transform_lines(
        &mut planner,
        &mut vol.data,
        ny,
        nx * nz,
        nx,
        |c| {
            let z = c / nx;
            let x = c % nx;
            z * nx * ny + x
        },
        dir,
    );
    // z lines
    transform_lines(
        &mut planner,
        &mut vol.data,
        nz,
        nx * ny,
        nx * ny,
        |c| c,
        dir,
    );
    if dir == Direction::Inverse {
        let scale = 1.0 / (nx * ny * nz) as f32;
        for v in vol.data.iter_mut() {
            *v *= scale;
        }
    }
}

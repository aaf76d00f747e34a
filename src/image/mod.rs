//! Complex image containers and their I/O.
//!
//! [`Plane`] holds a 2-D image or its Fourier transform, [`Volume`] the 3-D
//! equivalent. Both use the wrapped frequency layout of an unshifted FFT:
//! index 0 is the DC term and negative frequencies live in the upper half
//! of each axis.
pub mod fft;
pub mod mrc;
pub mod plane;
pub mod volume;

pub use plane::Plane;
pub use volume::Volume;

/// Wraps a signed frequency index onto `[0, n)`.
#[inline]
pub(crate) fn wrap(h: i64, n: usize) -> usize {
    let n = n as i64;
    (((h % n) + n) % n) as usize
}

/// Signed frequency for a storage index: `0..(n+1)/2` maps to itself,
/// the rest to negative frequencies.
#[inline]
pub(crate) fn signed_freq(i: usize, n: usize) -> i64 {
    if (i as i64) < (n as i64 + 1) / 2 {
        i as i64
    } else {
        i as i64 - n as i64
    }
}

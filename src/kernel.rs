//! Precomputed interpolation kernel for reciprocal-space resampling.
//!
//! The kernel is a table of `sinc^power` tap weights, one row per
//! fractional offset. Interpolating a transform at a non-integer
//! coordinate then reduces to one row lookup and `width` multiply-adds
//! per axis, which keeps the packing and central-section loops cheap.

/// Tabulated separable interpolation kernel.
///
/// For a coordinate `x`, taps cover the integer samples
/// `floor(x) + start_offset() .. floor(x) + start_offset() + width - 1`
/// and the weight row is selected by the fractional part of `x`.
#[derive(Clone, Debug)]
pub struct SpectralKernel {
    width: usize,
    half_width: i64,
    divisions: usize,
    table: Vec<f32>,
}

fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-6 {
        1.0
    } else {
        let px = std::f32::consts::PI * x;
        px.sin() / px
    }
}

impl SpectralKernel {
    /// Builds a kernel with `width` taps (must be even and >= 2), weight
    /// `sinc^power`, and `divisions` tabulated fractional offsets. Rows are
    /// normalized to unit sum so interpolation preserves the local mean.
    pub fn new(width: usize, power: u32, divisions: usize) -> Result<Self, String> {
        if width < 2 || width % 2 != 0 {
            return Err(format!("kernel width must be even and >= 2, got {width}"));
        }
        if divisions == 0 {
            return Err("kernel divisions must be positive".into());
        }
        let half_width = (width / 2) as i64;
        let mut table = vec![0.0f32; (divisions + 1) * width];
        for row in 0..=divisions {
            let frac = row as f32 / divisions as f32;
            let mut sum = 0.0f32;
            for tap in 0..width {
                let d = (tap as i64 - half_width + 1) as f32 - frac;
                let w = sinc(d).powi(power as i32);
                table[row * width + tap] = w;
                sum += w;
            }
            if sum.abs() > 1e-12 {
                for tap in 0..width {
                    table[row * width + tap] /= sum;
                }
            }
        }
        Ok(Self {
            width,
            half_width,
            divisions,
            table,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Offset of the first tap relative to `floor(x)`.
    pub fn start_offset(&self) -> i64 {
        1 - self.half_width
    }

    /// Weight row for the fractional part of a coordinate.
    /// `frac` must lie in `[0, 1)`; values outside are clamped.
    pub fn weights(&self, frac: f32) -> &[f32] {
        let row = (frac.clamp(0.0, 1.0) * self.divisions as f32).round() as usize;
        let row = row.min(self.divisions);
        &self.table[row * self.width..(row + 1) * self.width]
    }
}

impl Default for SpectralKernel {
    /// 8-tap sinc² kernel, the default used throughout reconstruction.
    fn default() -> Self {
        Self::new(8, 2, 256).expect("default kernel parameters are valid")
    }
}

//! Scalar quantization (§4.4): reversible passthrough for 5/3, derived and
//! expounded dead-zone quantization for 9/7, plus ROI max-shift (§4.4.1).

use crate::error::{J2kError, Result};
use crate::image::Orientation;

/// How quantization step sizes are derived across the subbands of a tile
/// component (Table A.18's SQcd style field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantStyle {
    /// 5/3 reversible transform: no quantization, coefficients pass
    /// through the entropy coder bit-exact.
    NoQuantization,
    /// One step size at the lowest resolution, scaled to every other
    /// subband by its dynamic range (Annex E.1, equation E-5).
    ScalarDerived,
    /// Independent mantissa/exponent pair per subband.
    ScalarExpounded,
}

/// One subband's quantization parameters: 11-bit mantissa plus 5-bit
/// exponent, as carried in QCD/QCC marker segments (Table A.29).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSizeSpec {
    pub exponent: u8,
    pub mantissa: u16,
}

impl StepSizeSpec {
    /// Step size for a subband with nominal dynamic range `range_bits`,
    /// per equation E-3: `delta = 2^(R - eps) * (1 + mu / 2^11)`.
    pub fn step_size(self, range_bits: u8) -> f64 {
        let mu = self.mantissa as f64 / 2048.0;
        2f64.powi(range_bits as i32 - self.exponent as i32) * (1.0 + mu)
    }
}

/// Derives every subband's step size from a single base spec (reversible
/// style has no step sizes to derive; derived style propagates one spec
/// from the lowest resolution to every other subband).
pub fn derived_step_size(base: StepSizeSpec, base_range_bits: u8, subband_range_bits: u8) -> f64 {
    // equation E-5: delta_b = delta_0 * 2^(R_b - R_0)
    base.step_size(base_range_bits) * 2f64.powi(subband_range_bits as i32 - base_range_bits as i32)
}

/// Nominal dynamic range in bits for a subband, `Rb = component range +
/// wavelet gain` (Table E.1).
pub fn nominal_range_bits(component_bit_depth: u8, orientation: Orientation) -> u8 {
    component_bit_depth + orientation.gain_exponent()
}

/// Dead-zone scalar quantizer: `q = sign(x) * floor(|x| / delta)`.
pub fn quantize(coeff: f64, step_size: f64) -> Result<i32> {
    if step_size <= 0.0 {
        return Err(J2kError::QuantizerOverflow(
            "step size must be positive".into(),
        ));
    }
    let sign = if coeff < 0.0 { -1.0 } else { 1.0 };
    let magnitude = (coeff.abs() / step_size).floor();
    Ok((sign * magnitude) as i32)
}

/// Reconstructs the bin center: `x = (q + 0.5 * sign(q)) * delta`, zero maps
/// to zero exactly.
pub fn dequantize(q: i32, step_size: f64) -> f64 {
    if q == 0 {
        return 0.0;
    }
    let sign = if q > 0 { 1.0 } else { -1.0 };
    (q.unsigned_abs() as f64 + 0.5) * step_size * sign
}

/// Canonical order subbands appear in a QCD/QCC step-size list (Table
/// A.28): the coarsest LL first, then each resolution level's HL/LH/HH
/// from level 1 up to `levels`.
pub fn subband_order(levels: u8) -> Vec<(Orientation, u8)> {
    let mut out = vec![(Orientation::Ll, 0)];
    for level in 1..=levels {
        out.push((Orientation::Hl, level));
        out.push((Orientation::Lh, level));
        out.push((Orientation::Hh, level));
    }
    out
}

/// Nominal maximum magnitude bit-plane count for a subband (Annex E,
/// `Mb = G + Rb - 1`), used to derive each code-block's zero-bit-plane
/// count relative to the subband rather than its own tight magnitude.
pub fn subband_mb_max(range_bits: u8, guard_bits: u8) -> u8 {
    (range_bits as u16 + guard_bits as u16).saturating_sub(1).min(255) as u8
}

/// Applies ROI max-shift (Annex H.1.2, "scaling based method"): every
/// background (non-ROI) coefficient magnitude is right-shifted by `shift`
/// bits before entropy coding, making ROI magnitude bit-planes rank above
/// the background's in every code-block's bit-plane order.
pub fn apply_max_shift(magnitude: u32, in_roi: bool, shift: u8) -> u32 {
    if in_roi || shift == 0 {
        magnitude
    } else {
        magnitude >> shift
    }
}

/// Inverse of [`apply_max_shift`]: restores background magnitudes to their
/// original scale after Tier-1 decoding.
pub fn undo_max_shift(magnitude: u32, in_roi: bool, shift: u8) -> u32 {
    if in_roi || shift == 0 {
        magnitude
    } else {
        magnitude << shift
    }
}

/// Implicit general scaling-based ROI reconstruction (Annex H.1.3.1): the
/// decoder has no record of which code-blocks the encoder treated as ROI,
/// only the shift amount from the RGN marker, so membership is inferred
/// from magnitude instead — anything below `2^shift` is background left
/// shifted down by the encoder, anything at or above it was never shifted.
pub fn undo_max_shift_implicit(magnitude: u32, shift: u8) -> u32 {
    if shift == 0 {
        return magnitude;
    }
    let threshold = 1u32 << shift;
    if magnitude < threshold {
        magnitude << shift
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_dequantize_round_trip_within_one_step() {
        let step = 2.0;
        let val = 10.5;
        let q = quantize(val, step).unwrap();
        assert_eq!(q, 5);
        let recon = dequantize(q, step);
        assert!((val - recon).abs() <= step);
    }

    #[test]
    fn zero_quantizes_and_dequantizes_to_zero() {
        assert_eq!(quantize(0.0, 4.0).unwrap(), 0);
        assert_eq!(dequantize(0, 4.0), 0.0);
    }

    #[test]
    fn negative_coefficients_preserve_sign() {
        let q = quantize(-9.0, 2.0).unwrap();
        assert_eq!(q, -4);
        assert!(dequantize(q, 2.0) < 0.0);
    }

    #[test]
    fn nominal_range_bits_adds_orientation_gain() {
        assert_eq!(nominal_range_bits(8, Orientation::Ll), 8);
        assert_eq!(nominal_range_bits(8, Orientation::Hl), 9);
        assert_eq!(nominal_range_bits(8, Orientation::Hh), 10);
    }

    #[test]
    fn derived_step_size_scales_with_range_bit_delta() {
        let base = StepSizeSpec {
            exponent: 8,
            mantissa: 0,
        };
        let d0 = base.step_size(8);
        let d1 = derived_step_size(base, 8, 9);
        assert!((d1 - d0 * 2.0).abs() < 1e-9);
    }

    #[test]
    fn max_shift_scales_only_background_coefficients() {
        assert_eq!(apply_max_shift(100, true, 3), 100);
        assert_eq!(apply_max_shift(100, false, 3), 12);
        assert_eq!(undo_max_shift(12, false, 3), 96);
    }

    #[test]
    fn subband_order_lists_ll_then_each_level_in_hl_lh_hh() {
        let order = subband_order(2);
        assert_eq!(
            order,
            vec![
                (Orientation::Ll, 0),
                (Orientation::Hl, 1),
                (Orientation::Lh, 1),
                (Orientation::Hh, 1),
                (Orientation::Hl, 2),
                (Orientation::Lh, 2),
                (Orientation::Hh, 2),
            ]
        );
    }

    #[test]
    fn subband_mb_max_follows_guard_plus_range_minus_one() {
        assert_eq!(subband_mb_max(8, 2), 9);
        assert_eq!(subband_mb_max(0, 0), 0);
    }
}

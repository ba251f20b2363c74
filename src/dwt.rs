//! Discrete wavelet transforms (§4.3): 5/3 reversible integer lifting and
//! 9/7 irreversible lifting, one-dimensional primitives plus the 2-D and
//! N-level recursive decomposition built on top of them.

use crate::error::{J2kError, Result};
use crate::image::Orientation;

#[allow(dead_code)]
pub struct Dwt53;

impl Dwt53 {
    /// Forward 1-D lifting: predict odd samples from even neighbours, then
    /// update even samples from the new odd ones. Whole-sample symmetric
    /// boundary extension.
    pub fn forward(signal: &[i32], out_l: &mut [i32], out_h: &mut [i32]) {
        let len = signal.len();
        if len == 0 {
            return;
        }
        if len == 1 {
            out_l[0] = signal[0];
            return;
        }

        let mut x = signal.to_vec();

        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= (left + right) >> 1;
        }

        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += (left + right + 2) >> 2;
        }

        let (mut l_idx, mut h_idx) = (0, 0);
        for (i, &v) in x.iter().enumerate() {
            if i % 2 == 0 {
                if l_idx < out_l.len() {
                    out_l[l_idx] = v;
                    l_idx += 1;
                }
            } else if h_idx < out_h.len() {
                out_h[h_idx] = v;
                h_idx += 1;
            }
        }
    }

    pub fn inverse(in_l: &[i32], in_h: &[i32], output: &mut [i32]) {
        let len = output.len();
        let mut x = vec![0i32; len];
        let (mut l_idx, mut h_idx) = (0, 0);
        for i in 0..len {
            if i % 2 == 0 {
                if l_idx < in_l.len() {
                    x[i] = in_l[l_idx];
                    l_idx += 1;
                }
            } else if h_idx < in_h.len() {
                x[i] = in_h[h_idx];
                h_idx += 1;
            }
        }

        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= (left + right + 2) >> 2;
        }

        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += (left + right) >> 1;
        }

        output.copy_from_slice(&x);
    }

    /// Splits a `width`x`height` plane into LL/HL/LH/HH quadrants, one
    /// lifting pass over rows followed by one over columns.
    pub fn forward_2d(input: &[i32], width: u32, height: u32) -> Quadrants<i32> {
        forward_2d_generic(input, width, height, Self::forward)
    }

    pub fn inverse_2d(
        ll: &[i32],
        hl: &[i32],
        lh: &[i32],
        hh: &[i32],
        width: u32,
        height: u32,
        output: &mut [i32],
    ) {
        inverse_2d_generic(ll, hl, lh, hh, width, height, output, Self::inverse, 0i32);
    }
}

#[allow(dead_code)]
pub struct Dwt97;

impl Dwt97 {
    const ALPHA: f32 = -1.586134342;
    const BETA: f32 = -0.052980118;
    const GAMMA: f32 = 0.882911075;
    const DELTA: f32 = 0.443506852;
    const K: f32 = 1.230174105;
    const INV_K: f32 = 1.0 / 1.230174105;

    pub fn forward(signal: &[f32], out_l: &mut [f32], out_h: &mut [f32]) {
        let len = signal.len();
        if len == 0 {
            return;
        }
        let mut x = signal.to_vec();

        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::ALPHA * (left + right);
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::BETA * (left + right);
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::GAMMA * (left + right);
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::DELTA * (left + right);
        }

        for (i, v) in x.iter_mut().enumerate() {
            *v *= if i % 2 == 0 { Self::INV_K } else { Self::K };
        }

        let (mut l_idx, mut h_idx) = (0, 0);
        for (i, &v) in x.iter().enumerate() {
            if i % 2 == 0 {
                if l_idx < out_l.len() {
                    out_l[l_idx] = v;
                    l_idx += 1;
                }
            } else if h_idx < out_h.len() {
                out_h[h_idx] = v;
                h_idx += 1;
            }
        }
    }

    pub fn inverse(in_l: &[f32], in_h: &[f32], output: &mut [f32]) {
        let len = output.len();
        let mut x = vec![0.0f32; len];
        let (mut l_idx, mut h_idx) = (0, 0);
        for i in 0..len {
            if i % 2 == 0 {
                if l_idx < in_l.len() {
                    x[i] = in_l[l_idx];
                    l_idx += 1;
                }
            } else if h_idx < in_h.len() {
                x[i] = in_h[h_idx];
                h_idx += 1;
            }
        }

        for (i, v) in x.iter_mut().enumerate() {
            *v *= if i % 2 == 0 { Self::K } else { Self::INV_K };
        }

        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::DELTA * (left + right);
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::GAMMA * (left + right);
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::BETA * (left + right);
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::ALPHA * (left + right);
        }

        output.copy_from_slice(&x);
    }

    pub fn forward_2d(input: &[f32], width: u32, height: u32) -> Quadrants<f32> {
        forward_2d_generic(input, width, height, Self::forward)
    }

    pub fn inverse_2d(
        ll: &[f32],
        hl: &[f32],
        lh: &[f32],
        hh: &[f32],
        width: u32,
        height: u32,
        output: &mut [f32],
    ) {
        inverse_2d_generic(ll, hl, lh, hh, width, height, output, Self::inverse, 0.0f32);
    }
}

/// The four quadrants produced by one level of 2-D dyadic decomposition.
pub struct Quadrants<T> {
    pub ll: Vec<T>,
    pub hl: Vec<T>,
    pub lh: Vec<T>,
    pub hh: Vec<T>,
    pub ll_w: u32,
    pub ll_h: u32,
    pub hl_w: u32,
    pub lh_h: u32,
}

fn forward_2d_generic<T: Copy + Default>(
    input: &[T],
    width: u32,
    height: u32,
    forward_1d: fn(&[T], &mut [T], &mut [T]),
) -> Quadrants<T> {
    let w = width as usize;
    let h = height as usize;
    let ll_w = w.div_ceil(2);
    let hl_w = w / 2;
    let ll_h = h.div_ceil(2);
    let lh_h = h / 2;

    // Row pass: low part into [0, ll_w), high part into [ll_w, w).
    let mut temp = vec![T::default(); w * h];
    for y in 0..h {
        let row = &input[y * w..(y + 1) * w];
        let mut row_l = vec![T::default(); ll_w];
        let mut row_h = vec![T::default(); hl_w];
        forward_1d(row, &mut row_l, &mut row_h);
        temp[y * w..y * w + ll_w].copy_from_slice(&row_l);
        temp[y * w + ll_w..y * w + ll_w + hl_w].copy_from_slice(&row_h);
    }

    // Column pass over the low-x half produces LL (top) / LH (bottom).
    let mut ll = vec![T::default(); ll_w * ll_h];
    let mut lh = vec![T::default(); ll_w * lh_h];
    for x in 0..ll_w {
        let col: Vec<T> = (0..h).map(|y| temp[y * w + x]).collect();
        let mut col_l = vec![T::default(); ll_h];
        let mut col_h = vec![T::default(); lh_h];
        forward_1d(&col, &mut col_l, &mut col_h);
        for y in 0..ll_h {
            ll[y * ll_w + x] = col_l[y];
        }
        for y in 0..lh_h {
            lh[y * ll_w + x] = col_h[y];
        }
    }

    // Column pass over the high-x half produces HL (top) / HH (bottom).
    let mut hl = vec![T::default(); hl_w * ll_h];
    let mut hh = vec![T::default(); hl_w * lh_h];
    for x in 0..hl_w {
        let col: Vec<T> = (0..h).map(|y| temp[y * w + ll_w + x]).collect();
        let mut col_l = vec![T::default(); ll_h];
        let mut col_h = vec![T::default(); lh_h];
        forward_1d(&col, &mut col_l, &mut col_h);
        for y in 0..ll_h {
            hl[y * hl_w + x] = col_l[y];
        }
        for y in 0..lh_h {
            hh[y * hl_w + x] = col_h[y];
        }
    }

    Quadrants {
        ll,
        hl,
        lh,
        hh,
        ll_w: ll_w as u32,
        ll_h: ll_h as u32,
        hl_w: hl_w as u32,
        lh_h: lh_h as u32,
    }
}

#[allow(clippy::too_many_arguments)]
fn inverse_2d_generic<T: Copy + Default>(
    ll: &[T],
    hl: &[T],
    lh: &[T],
    hh: &[T],
    width: u32,
    height: u32,
    output: &mut [T],
    inverse_1d: fn(&[T], &[T], &mut [T]),
    zero: T,
) {
    let w = width as usize;
    let h = height as usize;
    let ll_w = w.div_ceil(2);
    let hl_w = w / 2;
    let ll_h = h.div_ceil(2);
    let lh_h = h / 2;

    let mut temp = vec![zero; w * h];

    for x in 0..ll_w {
        let col_l: Vec<T> = (0..ll_h).map(|y| ll[y * ll_w + x]).collect();
        let col_h: Vec<T> = (0..lh_h).map(|y| lh[y * ll_w + x]).collect();
        let mut col_out = vec![zero; h];
        inverse_1d(&col_l, &col_h, &mut col_out);
        for y in 0..h {
            temp[y * w + x] = col_out[y];
        }
    }
    for x in 0..hl_w {
        let col_l: Vec<T> = (0..ll_h).map(|y| hl[y * hl_w + x]).collect();
        let col_h: Vec<T> = (0..lh_h).map(|y| hh[y * hl_w + x]).collect();
        let mut col_out = vec![zero; h];
        inverse_1d(&col_l, &col_h, &mut col_out);
        for y in 0..h {
            temp[y * w + ll_w + x] = col_out[y];
        }
    }

    for y in 0..h {
        let row_l = &temp[y * w..y * w + ll_w];
        let row_h = &temp[y * w + ll_w..y * w + ll_w + hl_w];
        let mut row_out = vec![zero; w];
        inverse_1d(row_l, row_h, &mut row_out);
        output[y * w..(y + 1) * w].copy_from_slice(&row_out);
    }
}

/// The LL size at every resolution level from 0 (coarsest) to `levels`
/// (full resolution), computed top-down by the same ceil-halving
/// `decompose_53`/`decompose_97` apply going the other way. Doubling the
/// coarsest size back up is not invertible for odd dimensions (`ceil(5/2)
/// * 2 == 6 != 5`), so reconstruction must recompute these sizes from the
/// top rather than derive them from the LL band alone.
fn resolution_sizes(width: u32, height: u32, levels: u8) -> Vec<(u32, u32)> {
    let mut sizes = vec![(0u32, 0u32); levels as usize + 1];
    sizes[levels as usize] = (width, height);
    let (mut w, mut h) = (width, height);
    for level in (1..=levels).rev() {
        let ll_w = (w + 1) / 2;
        let ll_h = (h + 1) / 2;
        sizes[level as usize - 1] = (ll_w, ll_h);
        w = ll_w;
        h = ll_h;
    }
    sizes
}

/// One subband resulting from N-level recursive decomposition, tagged with
/// orientation and the resolution level it belongs to.
pub struct DecomposedSubband {
    pub orientation: Orientation,
    pub level: u8,
    pub width: u32,
    pub height: u32,
    pub data: Vec<i32>,
}

/// Recursively decomposes a tile-component with the 5/3 filter, `levels`
/// times. The coarsest LL band (tagged `level == 0`) is not decomposed
/// further. Returns subbands ordered from finest to coarsest, matching the
/// order Tier-2 addresses resolution levels in.
pub fn decompose_53(
    samples: &[i32],
    width: u32,
    height: u32,
    levels: u8,
) -> Result<Vec<DecomposedSubband>> {
    if levels > 32 {
        return Err(J2kError::invalid_geometry("decomposition levels must be <= 32"));
    }
    let mut out = Vec::new();
    let mut current = samples.to_vec();
    let (mut w, mut h) = (width, height);
    for level in (1..=levels).rev() {
        let q = Dwt53::forward_2d(&current, w, h);
        out.push(DecomposedSubband {
            orientation: Orientation::Hl,
            level,
            width: q.hl_w,
            height: q.ll_h,
            data: q.hl,
        });
        out.push(DecomposedSubband {
            orientation: Orientation::Lh,
            level,
            width: q.ll_w,
            height: q.lh_h,
            data: q.lh,
        });
        out.push(DecomposedSubband {
            orientation: Orientation::Hh,
            level,
            width: q.hl_w,
            height: q.lh_h,
            data: q.hh,
        });
        w = q.ll_w;
        h = q.ll_h;
        current = q.ll;
    }
    out.push(DecomposedSubband {
        orientation: Orientation::Ll,
        level: 0,
        width: w,
        height: h,
        data: current,
    });
    Ok(out)
}

/// Inverse of [`decompose_53`]: reconstructs the full-resolution plane from
/// the subband list, which must contain exactly one LL plus 3 detail bands
/// per level from 1 to `levels`.
pub fn reconstruct_53(
    subbands: &[DecomposedSubband],
    width: u32,
    height: u32,
    levels: u8,
) -> Result<Vec<i32>> {
    let find = |orientation: Orientation, level: u8| -> Result<&Vec<i32>> {
        subbands
            .iter()
            .find(|s| s.orientation == orientation && s.level == level)
            .map(|s| &s.data)
            .ok_or_else(|| J2kError::Tier1Corrupt("missing subband during reconstruction".into()))
    };

    let ll0 = find(Orientation::Ll, 0)?;
    let mut current = ll0.clone();
    let sizes = resolution_sizes(width, height, levels);

    for level in 1..=levels {
        let hl = find(Orientation::Hl, level)?;
        let lh = find(Orientation::Lh, level)?;
        let hh = find(Orientation::Hh, level)?;
        let (out_w, out_h) = sizes[level as usize];
        let mut out = vec![0i32; (out_w * out_h) as usize];
        Dwt53::inverse_2d(&current, hl, lh, hh, out_w, out_h, &mut out);
        current = out;
    }
    Ok(current)
}

/// As [`DecomposedSubband`], but holding the irreversible filter's
/// floating-point coefficients prior to quantisation.
pub struct DecomposedSubbandF {
    pub orientation: Orientation,
    pub level: u8,
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

/// As [`decompose_53`], for the 9/7 irreversible filter.
pub fn decompose_97(
    samples: &[f32],
    width: u32,
    height: u32,
    levels: u8,
) -> Result<Vec<DecomposedSubbandF>> {
    if levels > 32 {
        return Err(J2kError::invalid_geometry("decomposition levels must be <= 32"));
    }
    let mut out = Vec::new();
    let mut current = samples.to_vec();
    let (mut w, mut h) = (width, height);
    for level in (1..=levels).rev() {
        let q = Dwt97::forward_2d(&current, w, h);
        out.push(DecomposedSubbandF {
            orientation: Orientation::Hl,
            level,
            width: q.hl_w,
            height: q.ll_h,
            data: q.hl,
        });
        out.push(DecomposedSubbandF {
            orientation: Orientation::Lh,
            level,
            width: q.ll_w,
            height: q.lh_h,
            data: q.lh,
        });
        out.push(DecomposedSubbandF {
            orientation: Orientation::Hh,
            level,
            width: q.hl_w,
            height: q.lh_h,
            data: q.hh,
        });
        w = q.ll_w;
        h = q.ll_h;
        current = q.ll;
    }
    out.push(DecomposedSubbandF {
        orientation: Orientation::Ll,
        level: 0,
        width: w,
        height: h,
        data: current,
    });
    Ok(out)
}

/// As [`reconstruct_53`], for the 9/7 irreversible filter.
pub fn reconstruct_97(
    subbands: &[DecomposedSubbandF],
    width: u32,
    height: u32,
    levels: u8,
) -> Result<Vec<f32>> {
    let find = |orientation: Orientation, level: u8| -> Result<&Vec<f32>> {
        subbands
            .iter()
            .find(|s| s.orientation == orientation && s.level == level)
            .map(|s| &s.data)
            .ok_or_else(|| J2kError::Tier1Corrupt("missing subband during reconstruction".into()))
    };

    let ll0 = find(Orientation::Ll, 0)?;
    let mut current = ll0.clone();
    let sizes = resolution_sizes(width, height, levels);

    for level in 1..=levels {
        let hl = find(Orientation::Hl, level)?;
        let lh = find(Orientation::Lh, level)?;
        let hh = find(Orientation::Hh, level)?;
        let (out_w, out_h) = sizes[level as usize];
        let mut out = vec![0.0f32; (out_w * out_h) as usize];
        Dwt97::inverse_2d(&current, hl, lh, hh, out_w, out_h, &mut out);
        current = out;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dwt_53_roundtrip_even_length() {
        let input = [10, 20, 30, 40, 50, 60, 70, 80];
        let len = input.len();
        let mut l = vec![0i32; len.div_ceil(2)];
        let mut h = vec![0i32; len / 2];
        Dwt53::forward(&input, &mut l, &mut h);
        let mut output = vec![0i32; len];
        Dwt53::inverse(&l, &h, &mut output);
        assert_eq!(input.to_vec(), output);
    }

    #[test]
    fn dwt_53_roundtrip_odd_length() {
        let input = [10, 20, 30, 40, 50];
        let len = input.len();
        let mut l = vec![0i32; len.div_ceil(2)];
        let mut h = vec![0i32; len / 2];
        Dwt53::forward(&input, &mut l, &mut h);
        let mut output = vec![0i32; len];
        Dwt53::inverse(&l, &h, &mut output);
        assert_eq!(input.to_vec(), output);
    }

    #[test]
    fn dwt_97_roundtrip_within_epsilon() {
        let input = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0];
        let len = input.len();
        let mut l = vec![0.0f32; len.div_ceil(2)];
        let mut h = vec![0.0f32; len / 2];
        Dwt97::forward(&input, &mut l, &mut h);
        let mut output = vec![0.0f32; len];
        Dwt97::inverse(&l, &h, &mut output);
        for i in 0..len {
            assert!((input[i] - output[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn dwt_53_2d_roundtrip_8x8() {
        let input: Vec<i32> = (0..64).collect();
        let q = Dwt53::forward_2d(&input, 8, 8);
        let mut output = vec![0i32; 64];
        Dwt53::inverse_2d(&q.ll, &q.hl, &q.lh, &q.hh, 8, 8, &mut output);
        assert_eq!(input, output);
    }

    #[test]
    fn decompose_53_reconstructs_losslessly() {
        let width = 16u32;
        let height = 16u32;
        let input: Vec<i32> = (0..(width * height) as i32).map(|v| v % 97).collect();
        let levels = 2;
        let subbands = decompose_53(&input, width, height, levels).unwrap();
        let output = reconstruct_53(&subbands, width, height, levels).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn decompose_97_reconstructs_within_epsilon() {
        let width = 16u32;
        let height = 16u32;
        let input: Vec<f32> = (0..(width * height) as i32).map(|v| (v % 97) as f32).collect();
        let levels = 2;
        let subbands = decompose_97(&input, width, height, levels).unwrap();
        let output = reconstruct_97(&subbands, width, height, levels).unwrap();
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-2, "{a} vs {b}");
        }
    }

    #[test]
    fn decompose_53_reconstructs_losslessly_with_odd_dimensions() {
        // 10x10 is odd at the first LL halving (ceil(10/2)=5, ceil(5/2)=3),
        // so doubling back up from the coarsest size would not land on 10.
        let width = 10u32;
        let height = 10u32;
        let input: Vec<i32> = (0..(width * height) as i32).map(|v| v % 61).collect();
        let levels = 2;
        let subbands = decompose_53(&input, width, height, levels).unwrap();
        let output = reconstruct_53(&subbands, width, height, levels).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn decompose_97_reconstructs_within_epsilon_with_odd_dimensions() {
        let width = 11u32;
        let height = 9u32;
        let input: Vec<f32> = (0..(width * height) as i32).map(|v| (v % 53) as f32).collect();
        let levels = 3;
        let subbands = decompose_97(&input, width, height, levels).unwrap();
        let output = reconstruct_97(&subbands, width, height, levels).unwrap();
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-1, "{a} vs {b}");
        }
    }

    #[test]
    fn resolution_sizes_ceil_halves_top_down() {
        assert_eq!(
            resolution_sizes(10, 10, 2),
            vec![(3, 3), (5, 5), (10, 10)]
        );
        assert_eq!(resolution_sizes(7, 16, 1), vec![(4, 8), (7, 16)]);
    }
}

//! Per-code-block bit-plane coder: drives the [`MqCoder`] through the
//! significance propagation, magnitude refinement and cleanup passes for
//! every bit-plane from the most significant down to zero (§4.5.2). The
//! very first (most significant) bit-plane naturally runs cleanup only:
//! nothing is significant yet, so significance propagation's "has a
//! significant neighbour" gate and magnitude refinement's "already
//! significant" gate both reject every sample.

use crate::image::{CodeBlock, Orientation};
use crate::mq::MqCoder;
use crate::tier1::contexts::{
    axis_sign_contribution, magnitude_refinement_context, sign_coding_context,
    zero_coding_context, RUN_LENGTH_CONTEXT, UNIFORM_CONTEXT,
};

const SIG: u8 = 1 << 0;
const VISITED: u8 = 1 << 1;
const SIGN: u8 = 1 << 2;
const REFINED_BEFORE: u8 = 1 << 3;

/// Presets the RUN_LENGTH and UNIFORM contexts to their Table C-1 initial
/// states (confirmed against the preset-context round-trip test already
/// covering the MQ coder itself).
fn new_mq_coder() -> MqCoder {
    let mut mq = MqCoder::new();
    mq.init_contexts(crate::tier1::contexts::NUM_CONTEXTS);
    mq.set_context(RUN_LENGTH_CONTEXT, 3, 0);
    mq.set_context(UNIFORM_CONTEXT, 46, 0);
    mq
}

struct Neighbors {
    h: u8,
    v: u8,
    d: u8,
    h_sign: i8,
    v_sign: i8,
    sigma: u8,
}

fn neighbors(state: &[u8], signs: &[bool], width: u32, height: u32, x: u32, y: u32) -> Neighbors {
    let w = width as i32;
    let h = height as i32;
    let (ix, iy) = (x as i32, y as i32);
    let idx = |cx: i32, cy: i32| (cy * w + cx) as usize;
    let sig_at = |cx: i32, cy: i32| -> Option<bool> {
        if cx < 0 || cy < 0 || cx >= w || cy >= h {
            return None;
        }
        let i = idx(cx, cy);
        if state[i] & SIG != 0 {
            Some(signs[i])
        } else {
            None
        }
    };

    let west = sig_at(ix - 1, iy);
    let east = sig_at(ix + 1, iy);
    let north = sig_at(ix, iy - 1);
    let south = sig_at(ix, iy + 1);
    let nw = sig_at(ix - 1, iy - 1);
    let ne = sig_at(ix + 1, iy - 1);
    let sw = sig_at(ix - 1, iy + 1);
    let se = sig_at(ix + 1, iy + 1);

    let h_count = [west, east].iter().filter(|s| s.is_some()).count() as u8;
    let v_count = [north, south].iter().filter(|s| s.is_some()).count() as u8;
    let d_count = [nw, ne, sw, se].iter().filter(|s| s.is_some()).count() as u8;
    let sigma = h_count + v_count + d_count;

    Neighbors {
        h: h_count,
        v: v_count,
        d: d_count,
        h_sign: axis_sign_contribution(&[west, east]),
        v_sign: axis_sign_contribution(&[north, south]),
        sigma,
    }
}

/// Encodes every bit-plane of `cb.magnitudes`/`cb.signs` into `cb.coded_bytes`,
/// filling `cb.pass_lengths`/`cb.pass_distortion` for PCRD. `cb.mb` must
/// already be set to the subband's candidate bit-plane count.
pub fn encode_codeblock(cb: &mut CodeBlock, orientation: Orientation) {
    let (width, height) = (cb.width, cb.height);
    let area = (width * height) as usize;
    let mut state = vec![0u8; area];
    let mut mq = new_mq_coder();

    cb.pass_lengths.clear();
    cb.pass_distortion.clear();

    if cb.mb == 0 {
        cb.coded_bytes.clear();
        return;
    }

    let msb = cb.mb - 1;
    for bp in (0..cb.mb).rev() {
        for s in state.iter_mut() {
            *s &= !VISITED;
        }

        // The most significant bit-plane has no already-significant or
        // already-visited samples to propagate/refine, so it runs cleanup
        // only (§4.5.2's 3*Mb-2 pass-count invariant).
        if bp != msb {
            significance_propagation_encode(
                &mut mq, &mut state, cb, orientation, width, height, bp,
            );
            record_pass(&mut mq, cb, bp);

            magnitude_refinement_encode(&mut mq, &mut state, cb, width, height, bp);
            record_pass(&mut mq, cb, bp);
        }

        cleanup_encode(&mut mq, &mut state, cb, orientation, width, height, bp);
        record_pass(&mut mq, cb, bp);
    }

    let mut probe = mq.clone();
    probe.flush();
    cb.coded_bytes = probe.get_buffer().to_vec();
}

/// Snapshots the coder's length if flushed right now, without mutating the
/// live encoder. Cheap: [`MqCoder`]'s state is a handful of integers plus
/// the output buffer.
fn record_pass(mq: &mut MqCoder, cb: &mut CodeBlock, bit_plane: u8) {
    let mut probe = mq.clone();
    probe.flush();
    cb.pass_lengths.push(probe.byte_len() as u32);
    // Distortion reduction from coding this pass: every coefficient whose
    // magnitude bit at this plane was just resolved reduces the worst-case
    // reconstruction error by roughly 2^bit_plane per occurrence; Tier-2's
    // PCRD only needs the *relative* ordering of (delta distortion, delta
    // length) pairs, so a per-pass constant scaled by the plane weight is
    // sufficient here.
    let weight = 2f64.powi(bit_plane as i32);
    cb.pass_distortion.push(weight * weight);
}

#[allow(clippy::too_many_arguments)]
fn significance_propagation_encode(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &CodeBlock,
    orientation: Orientation,
    width: u32,
    height: u32,
    bit_plane: u8,
) {
    for_each_stripe_column(width, height, |x, y| {
        let idx = (y * width + x) as usize;
        if state[idx] & (SIG | VISITED) != 0 {
            return;
        }
        let n = neighbors(state, &cb.signs, width, height, x, y);
        if n.h == 0 && n.v == 0 && n.d == 0 {
            return;
        }
        let cx = zero_coding_context(orientation, n.h, n.v, n.d);
        let bit = (cb.magnitudes[idx] >> bit_plane) & 1;
        mq.encode(bit as u8, cx);
        state[idx] |= VISITED;
        if bit == 1 {
            state[idx] |= SIG;
            if cb.signs[idx] {
                state[idx] |= SIGN;
            }
            let (sc_cx, xor) = sign_coding_context(n.h_sign, n.v_sign);
            let raw_sign = cb.signs[idx] as u8;
            mq.encode(raw_sign ^ xor, sc_cx);
        }
    });
}

fn magnitude_refinement_encode(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &CodeBlock,
    width: u32,
    height: u32,
    bit_plane: u8,
) {
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if state[idx] & SIG == 0 || state[idx] & VISITED != 0 {
                continue;
            }
            let n = neighbors(state, &cb.signs, width, height, x, y);
            let first = state[idx] & REFINED_BEFORE == 0;
            let cx = magnitude_refinement_context(first, n.sigma);
            let bit = (cb.magnitudes[idx] >> bit_plane) & 1;
            mq.encode(bit as u8, cx);
            state[idx] |= VISITED | REFINED_BEFORE;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cleanup_encode(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &CodeBlock,
    orientation: Orientation,
    width: u32,
    height: u32,
    bit_plane: u8,
) {
    for_each_stripe_column_group(width, height, |xs| {
        // Attempt run-length coding when all four samples in this column
        // group are still unvisited and isolated (no significant
        // neighbours at all, so their ZC context would be 0 regardless of
        // orientation).
        let eligible = xs.len() == 4
            && xs.iter().all(|&(x, y)| {
                let idx = (y * width + x) as usize;
                if state[idx] & VISITED != 0 {
                    return false;
                }
                let n = neighbors(state, &cb.signs, width, height, x, y);
                n.h == 0 && n.v == 0 && n.d == 0
            });

        if eligible {
            let bits: Vec<u32> = xs
                .iter()
                .map(|&(x, y)| {
                    let idx = (y * width + x) as usize;
                    (cb.magnitudes[idx] >> bit_plane) & 1
                })
                .collect();
            let any_significant = bits.iter().any(|&b| b == 1);
            mq.encode(any_significant as u8, RUN_LENGTH_CONTEXT);
            if !any_significant {
                for &(x, y) in xs {
                    state[(y * width + x) as usize] |= VISITED;
                }
                return;
            }
            let first_one = bits.iter().position(|&b| b == 1).unwrap() as u32;
            mq.encode((first_one >> 1) & 1, UNIFORM_CONTEXT);
            mq.encode(first_one & 1, UNIFORM_CONTEXT);
            for (i, &(x, y)) in xs.iter().enumerate() {
                let idx = (y * width + x) as usize;
                if (i as u32) < first_one {
                    state[idx] |= VISITED;
                    continue;
                }
                if i as u32 == first_one {
                    state[idx] |= SIG | VISITED;
                    if cb.signs[idx] {
                        state[idx] |= SIGN;
                    }
                    let n = neighbors(state, &cb.signs, width, height, x, y);
                    let (sc_cx, xor) = sign_coding_context(n.h_sign, n.v_sign);
                    mq.encode((cb.signs[idx] as u8) ^ xor, sc_cx);
                } else {
                    cleanup_single(mq, state, cb, orientation, width, height, bit_plane, x, y);
                }
            }
        } else {
            for &(x, y) in xs {
                cleanup_single(mq, state, cb, orientation, width, height, bit_plane, x, y);
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn cleanup_single(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &CodeBlock,
    orientation: Orientation,
    width: u32,
    height: u32,
    bit_plane: u8,
    x: u32,
    y: u32,
) {
    let idx = (y * width + x) as usize;
    if state[idx] & VISITED != 0 {
        return;
    }
    let n = neighbors(state, &cb.signs, width, height, x, y);
    let cx = zero_coding_context(orientation, n.h, n.v, n.d);
    let bit = (cb.magnitudes[idx] >> bit_plane) & 1;
    mq.encode(bit as u8, cx);
    state[idx] |= VISITED;
    if bit == 1 {
        state[idx] |= SIG;
        if cb.signs[idx] {
            state[idx] |= SIGN;
        }
        let (sc_cx, xor) = sign_coding_context(n.h_sign, n.v_sign);
        mq.encode((cb.signs[idx] as u8) ^ xor, sc_cx);
    }
}

/// Visits samples in J2K's stripe-column scan order: the block is divided
/// into 4-row stripes; within a stripe each column is visited in turn,
/// top-to-bottom.
fn for_each_stripe_column(width: u32, height: u32, mut f: impl FnMut(u32, u32)) {
    for_each_stripe_column_group(width, height, |xs| {
        for &(x, y) in xs {
            f(x, y);
        }
    });
}

/// As [`for_each_stripe_column`], but passes whole (up to 4-sample) column
/// groups at once so the cleanup pass can attempt run-length coding.
fn for_each_stripe_column_group(width: u32, height: u32, mut f: impl FnMut(&[(u32, u32)])) {
    let mut y_stripe = 0;
    while y_stripe < height {
        let stripe_h = 4.min(height - y_stripe);
        for x in 0..width {
            let xs: Vec<(u32, u32)> = (0..stripe_h).map(|dy| (x, y_stripe + dy)).collect();
            f(&xs);
        }
        y_stripe += 4;
    }
}

/// Decodes `data` back into `cb.magnitudes`/`cb.signs`, given the subband's
/// bit-plane count and the number of coding passes actually present
/// (Tier-2 truncates the pass stream independently per code-block).
pub fn decode_codeblock(
    cb: &mut CodeBlock,
    orientation: Orientation,
    data: &[u8],
    included_passes: u32,
) {
    let (width, height) = (cb.width, cb.height);
    let area = (width * height) as usize;
    cb.magnitudes = vec![0u32; area];
    cb.signs = vec![false; area];
    if cb.mb == 0 || included_passes == 0 {
        return;
    }

    let mut state = vec![0u8; area];
    let mut mq = new_mq_coder();
    mq.init_decoder(data);

    let msb = cb.mb - 1;
    let mut passes_done = 0u32;
    'planes: for bp in (0..cb.mb).rev() {
        for s in state.iter_mut() {
            *s &= !VISITED;
        }

        if bp != msb {
            if passes_done >= included_passes {
                break 'planes;
            }
            significance_propagation_decode(
                &mut mq, &mut state, cb, orientation, width, height, bp,
            );
            passes_done += 1;
            if passes_done >= included_passes {
                break 'planes;
            }

            magnitude_refinement_decode(&mut mq, &mut state, cb, width, height, bp);
            passes_done += 1;
            if passes_done >= included_passes {
                break 'planes;
            }
        } else if passes_done >= included_passes {
            break 'planes;
        }

        cleanup_decode(&mut mq, &mut state, cb, orientation, width, height, bp);
        passes_done += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn significance_propagation_decode(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &mut CodeBlock,
    orientation: Orientation,
    width: u32,
    height: u32,
    bit_plane: u8,
) {
    for_each_stripe_column(width, height, |x, y| {
        let idx = (y * width + x) as usize;
        if state[idx] & (SIG | VISITED) != 0 {
            return;
        }
        let n = neighbors(state, &cb.signs, width, height, x, y);
        if n.h == 0 && n.v == 0 && n.d == 0 {
            return;
        }
        let cx = zero_coding_context(orientation, n.h, n.v, n.d);
        let bit = mq.decode_bit(cx);
        state[idx] |= VISITED;
        if bit == 1 {
            state[idx] |= SIG;
            let (sc_cx, xor) = sign_coding_context(n.h_sign, n.v_sign);
            let raw = mq.decode_bit(sc_cx) ^ xor;
            cb.signs[idx] = raw != 0;
            if cb.signs[idx] {
                state[idx] |= SIGN;
            }
            cb.magnitudes[idx] |= 1 << bit_plane;
        }
    });
}

fn magnitude_refinement_decode(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &mut CodeBlock,
    width: u32,
    height: u32,
    bit_plane: u8,
) {
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if state[idx] & SIG == 0 || state[idx] & VISITED != 0 {
                continue;
            }
            let n = neighbors(state, &cb.signs, width, height, x, y);
            let first = state[idx] & REFINED_BEFORE == 0;
            let cx = magnitude_refinement_context(first, n.sigma);
            let bit = mq.decode_bit(cx);
            if bit == 1 {
                cb.magnitudes[idx] |= 1 << bit_plane;
            }
            state[idx] |= VISITED | REFINED_BEFORE;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cleanup_decode(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &mut CodeBlock,
    orientation: Orientation,
    width: u32,
    height: u32,
    bit_plane: u8,
) {
    for_each_stripe_column_group(width, height, |xs| {
        let eligible = xs.len() == 4
            && xs.iter().all(|&(x, y)| {
                let idx = (y * width + x) as usize;
                if state[idx] & VISITED != 0 {
                    return false;
                }
                let n = neighbors(state, &cb.signs, width, height, x, y);
                n.h == 0 && n.v == 0 && n.d == 0
            });

        if eligible {
            let any_significant = mq.decode_bit(RUN_LENGTH_CONTEXT) == 1;
            if !any_significant {
                for &(x, y) in xs {
                    state[(y * width + x) as usize] |= VISITED;
                }
                return;
            }
            let hi = mq.decode_bit(UNIFORM_CONTEXT);
            let lo = mq.decode_bit(UNIFORM_CONTEXT);
            let first_one = (hi << 1) | lo;

            for (i, &(x, y)) in xs.iter().enumerate() {
                let idx = (y * width + x) as usize;
                if (i as u32) < first_one {
                    state[idx] |= VISITED;
                    continue;
                }
                if i as u32 == first_one {
                    state[idx] |= SIG | VISITED;
                    cb.magnitudes[idx] |= 1 << bit_plane;
                    let n = neighbors(state, &cb.signs, width, height, x, y);
                    let (sc_cx, xor) = sign_coding_context(n.h_sign, n.v_sign);
                    let raw = mq.decode_bit(sc_cx) ^ xor;
                    cb.signs[idx] = raw != 0;
                    if cb.signs[idx] {
                        state[idx] |= SIGN;
                    }
                } else {
                    cleanup_single_decode(
                        mq, state, cb, orientation, width, height, bit_plane, x, y,
                    );
                }
            }
        } else {
            for &(x, y) in xs {
                cleanup_single_decode(mq, state, cb, orientation, width, height, bit_plane, x, y);
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn cleanup_single_decode(
    mq: &mut MqCoder,
    state: &mut [u8],
    cb: &mut CodeBlock,
    orientation: Orientation,
    width: u32,
    height: u32,
    bit_plane: u8,
    x: u32,
    y: u32,
) {
    let idx = (y * width + x) as usize;
    if state[idx] & VISITED != 0 {
        return;
    }
    let n = neighbors(state, &cb.signs, width, height, x, y);
    let cx = zero_coding_context(orientation, n.h, n.v, n.d);
    let bit = mq.decode_bit(cx);
    state[idx] |= VISITED;
    if bit == 1 {
        state[idx] |= SIG;
        cb.magnitudes[idx] |= 1 << bit_plane;
        let (sc_cx, xor) = sign_coding_context(n.h_sign, n.v_sign);
        let raw = mq.decode_bit(sc_cx) ^ xor;
        cb.signs[idx] = raw != 0;
        if cb.signs[idx] {
            state[idx] |= SIGN;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_block(width: u32, height: u32, values: &[i32]) -> CodeBlock {
        let mut cb = CodeBlock::new(0, 0, width, height);
        let max = values.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
        cb.mb = if max == 0 { 0 } else { 32 - max.leading_zeros() } as u8;
        for (i, &v) in values.iter().enumerate() {
            cb.magnitudes[i] = v.unsigned_abs();
            cb.signs[i] = v < 0;
        }
        cb
    }

    #[test]
    fn encode_decode_round_trips_sparse_block() {
        #[rustfmt::skip]
        let values = [
            10, 0, 0, 0,
             0, 5, 0, 0,
             0, 0, -3, 0,
             0, 0, 0, 1,
        ];
        let mut cb = make_block(4, 4, &values);
        encode_codeblock(&mut cb, Orientation::Ll);
        let coded = cb.coded_bytes.clone();
        let total_passes = cb.max_coding_passes();

        let mut decoded = make_block(4, 4, &[0; 16]);
        decoded.mb = cb.mb;
        decode_codeblock(&mut decoded, Orientation::Ll, &coded, total_passes);

        for i in 0..16 {
            let expected = values[i];
            let sign = if decoded.signs[i] { -1 } else { 1 };
            assert_eq!(sign * decoded.magnitudes[i] as i32, expected, "index {i}");
        }
    }

    #[test]
    fn truncating_passes_keeps_only_coarser_bitplanes_significant() {
        #[rustfmt::skip]
        let values = [
            -20, 0, 0, 0,
              0, 9, 0, 0,
              0, 0, 0, 0,
              0, 0, 0, 3,
        ];
        let mut cb = make_block(4, 4, &values);
        encode_codeblock(&mut cb, Orientation::Hl);
        let coded = cb.coded_bytes.clone();

        let mut decoded = make_block(4, 4, &[0; 16]);
        decoded.mb = cb.mb;
        // Only the first pass (MSB significance propagation).
        decode_codeblock(&mut decoded, Orientation::Hl, &coded, 1);
        assert!(decoded.magnitudes[0] > 0, "largest coefficient resolves first");
    }

    #[test]
    fn all_zero_block_produces_no_coding_passes() {
        let mut cb = make_block(2, 2, &[0, 0, 0, 0]);
        encode_codeblock(&mut cb, Orientation::Lh);
        assert_eq!(cb.mb, 0);
        assert!(cb.pass_lengths.is_empty());
    }
}

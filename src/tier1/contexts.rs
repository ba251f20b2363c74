//! Context assignment rules for EBCOT Tier-1 (Annex D): zero coding (ZC,
//! contexts 0-8), sign coding (SC, contexts 9-13), magnitude refinement
//! (MR, contexts 14-16), run-length (17) and the uniform context (18) used
//! for the raw run-length count in the cleanup pass.

use crate::image::Orientation;

pub const RUN_LENGTH_CONTEXT: usize = 17;
pub const UNIFORM_CONTEXT: usize = 18;
pub const NUM_CONTEXTS: usize = 19;

/// Zero-coding context (Table D.1 for LL/LH/HL, Table D.3 for HH), from the
/// count of significant horizontal, vertical and diagonal neighbours.
pub fn zero_coding_context(orientation: Orientation, h: u8, v: u8, d: u8) -> usize {
    match orientation {
        Orientation::Ll | Orientation::Lh => zc_hv_table(h, v, d),
        Orientation::Hl => zc_hv_table(v, h, d),
        Orientation::Hh => zc_hh_table(h + v, d),
    }
}

/// Table D.1: primary axis count `h`, secondary axis count `v`, diagonal
/// count `d`. HL subbands call this with h/v swapped (Table D.1 note).
fn zc_hv_table(h: u8, v: u8, d: u8) -> usize {
    match (h, v, d) {
        (2, _, _) => 8,
        (1, v, _) if v >= 1 => 7,
        (1, 0, d) if d >= 1 => 6,
        (1, 0, 0) => 5,
        (0, 2, _) => 4,
        (0, 1, _) => 3,
        (0, 0, d) if d >= 2 => 2,
        (0, 0, 1) => 1,
        _ => 0,
    }
}

/// Table D.3: HH subbands weight the diagonal neighbours above H+V.
fn zc_hh_table(hv_sum: u8, d: u8) -> usize {
    match (d, hv_sum) {
        (0, 0) => 0,
        (0, 1) => 1,
        (0, _) => 2,
        (1, 0) => 3,
        (1, 1) => 4,
        (1, _) => 5,
        (2, 0) => 6,
        (2, _) => 7,
        _ => 8,
    }
}

/// Sign-coding context and XOR bit (Table D.2). `h_sign`/`v_sign` are each
/// in `{-1, 0, 1}`: the signed sum of significant neighbours along that
/// axis (two neighbours of opposing sign cancel to 0).
pub fn sign_coding_context(h_sign: i8, v_sign: i8) -> (usize, u8) {
    match (h_sign, v_sign) {
        (1, 1) => (13, 0),
        (1, 0) => (12, 0),
        (1, -1) => (11, 0),
        (0, 1) => (10, 0),
        (0, 0) => (9, 0),
        (0, -1) => (10, 1),
        (-1, 1) => (11, 1),
        (-1, 0) => (12, 1),
        (-1, -1) => (13, 1),
        _ => unreachable!("axis contribution must be in {{-1, 0, 1}}"),
    }
}

/// Signed contribution of one axis's two neighbours: +1 if net positive
/// significant, -1 if net negative, 0 if absent or cancelling.
pub fn axis_sign_contribution(neighbor_signs: &[Option<bool>]) -> i8 {
    let mut total = 0i8;
    for sign in neighbor_signs.iter().flatten() {
        total += if *sign { -1 } else { 1 };
    }
    total.clamp(-1, 1)
}

/// Magnitude-refinement context (Table D.4). `first_refinement` is true
/// only for the bit-plane immediately after the sample became significant;
/// `sigma` is the count of significant 8-neighbours at that time.
pub fn magnitude_refinement_context(first_refinement: bool, sigma: u8) -> usize {
    if first_refinement {
        if sigma == 0 {
            14
        } else {
            15
        }
    } else {
        16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zc_table_matches_known_corner_cases() {
        assert_eq!(zero_coding_context(Orientation::Ll, 0, 0, 0), 0);
        assert_eq!(zero_coding_context(Orientation::Ll, 2, 0, 0), 8);
        assert_eq!(zero_coding_context(Orientation::Hl, 0, 2, 0), 8);
    }

    #[test]
    fn hh_table_weights_diagonal_over_axis_sum() {
        assert_eq!(zero_coding_context(Orientation::Hh, 0, 0, 0), 0);
        assert_eq!(zero_coding_context(Orientation::Hh, 0, 0, 3), 8);
        assert_eq!(zero_coding_context(Orientation::Hh, 1, 1, 1), 5);
    }

    #[test]
    fn sign_context_cancels_opposing_neighbors() {
        assert_eq!(sign_coding_context(0, 0), (9, 0));
        assert_eq!(sign_coding_context(1, 1), (13, 0));
        assert_eq!(sign_coding_context(-1, -1), (13, 1));
    }

    #[test]
    fn axis_contribution_clamps_and_cancels() {
        assert_eq!(axis_sign_contribution(&[Some(false), Some(true)]), 0);
        assert_eq!(axis_sign_contribution(&[Some(false), Some(false)]), 1);
        assert_eq!(axis_sign_contribution(&[None, Some(true)]), -1);
    }

    #[test]
    fn mr_context_distinguishes_first_refinement() {
        assert_eq!(magnitude_refinement_context(true, 0), 14);
        assert_eq!(magnitude_refinement_context(true, 3), 15);
        assert_eq!(magnitude_refinement_context(false, 0), 16);
    }
}

//! Packet header codec (Annex B.10): per-precinct code-block inclusion,
//! zero-bit-plane count, new-pass count and Lblock length signalling.
//! Packet headers are raw bit-packed (no MQ coding) and always end on a
//! byte boundary before the packet's coded data begins.

use crate::bitio::{BitReader, BitWriter};
use crate::error::{J2kError, Result};
use crate::tagtree::TagTree;

/// Per-precinct state that must persist across every layer's packet for
/// that precinct: which code-blocks have ever been included, their
/// current Lblock value, and the two tag trees used for first-inclusion
/// signalling.
pub struct PrecinctState {
    width: usize,
    height: usize,
    inclusion_tree: TagTree,
    zero_bp_tree: TagTree,
    ever_included: Vec<bool>,
    lblock: Vec<u8>,
}

const INITIAL_LBLOCK: u8 = 3;

impl PrecinctState {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            inclusion_tree: TagTree::new(width, height),
            zero_bp_tree: TagTree::new(width, height),
            ever_included: vec![false; width * height],
            lblock: vec![INITIAL_LBLOCK; width * height],
        }
    }

    /// Rebuilds the inclusion tree from each code-block's known
    /// first-inclusion layer (encoder side: PCRD has already decided, for
    /// every code-block, which layer first contributes a segment).
    pub fn set_first_inclusion_layers(&mut self, first_layer: &[u32]) {
        assert_eq!(first_layer.len(), self.width * self.height);
        self.inclusion_tree = TagTree::from_leaf_values(self.width, self.height, first_layer);
    }

    /// Rebuilds the zero-bit-plane tree from each code-block's actual
    /// zero-bit-plane count (encoder side).
    pub fn set_zero_bit_planes(&mut self, zero_bit_planes: &[u32]) {
        assert_eq!(zero_bit_planes.len(), self.width * self.height);
        self.zero_bp_tree = TagTree::from_leaf_values(self.width, self.height, zero_bit_planes);
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

/// What a packet header communicates about one code-block for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockContribution {
    pub included: bool,
    /// Only meaningful when this is the code-block's first inclusion.
    pub zero_bit_planes: u32,
    pub new_passes: u32,
    pub segment_len: u32,
}

/// Encodes one packet's header (for every code-block in raster order over
/// the precinct's code-block grid) and returns the byte-aligned header
/// bytes, ready to be followed immediately by the concatenated code-block
/// segments.
pub fn encode_packet_header(
    state: &mut PrecinctState,
    layer: u32,
    contributions: &[CodeBlockContribution],
) -> Vec<u8> {
    assert_eq!(contributions.len(), state.width * state.height);
    let mut writer = BitWriter::new();

    let any_included = contributions.iter().any(|c| c.included);
    writer.write_bit(any_included as u32);
    if !any_included {
        return writer.finish();
    }

    for y in 0..state.height {
        for x in 0..state.width {
            let idx = state.index(x, y);
            let contribution = contributions[idx];

            if state.ever_included[idx] {
                writer.write_bit(contribution.included as u32);
            } else {
                state
                    .inclusion_tree
                    .encode(&mut writer, x, y, layer + 1);
            }

            if !contribution.included {
                continue;
            }

            if !state.ever_included[idx] {
                encode_tag_tree_value(
                    &mut state.zero_bp_tree,
                    &mut writer,
                    x,
                    y,
                    contribution.zero_bit_planes,
                );
                state.ever_included[idx] = true;
            }

            encode_num_passes(&mut writer, contribution.new_passes);

            let needed_bits = lblock_bits_needed(state.lblock[idx], contribution.new_passes, contribution.segment_len);
            let increase = needed_bits.saturating_sub(
                state.lblock[idx] as u32 + floor_log2(contribution.new_passes),
            );
            encode_lblock_increase(&mut writer, increase as u8);
            state.lblock[idx] += increase as u8;

            let length_bits = state.lblock[idx] as u32 + floor_log2(contribution.new_passes);
            writer.write_bits(contribution.segment_len, length_bits as u8);
        }
    }

    writer.finish()
}

/// Decodes one packet's header, returning each code-block's contribution
/// for this layer plus the number of header bytes consumed (the data that
/// follows starts at this offset, byte-aligned).
pub fn decode_packet_header(
    state: &mut PrecinctState,
    reader_data: &[u8],
    layer: u32,
) -> Result<(Vec<CodeBlockContribution>, usize)> {
    let mut reader = BitReader::new(reader_data);
    let mut out = vec![
        CodeBlockContribution {
            included: false,
            zero_bit_planes: 0,
            new_passes: 0,
            segment_len: 0,
        };
        state.width * state.height
    ];

    let any_included = reader.read_bit()? == 1;
    if !any_included {
        reader.align_to_byte();
        return Ok((out, reader.byte_position()));
    }

    for y in 0..state.height {
        for x in 0..state.width {
            let idx = state.index(x, y);

            let included = if state.ever_included[idx] {
                reader.read_bit()? == 1
            } else {
                state.inclusion_tree.decode(&mut reader, x, y, layer + 1)?
            };
            out[idx].included = included;
            if !included {
                continue;
            }

            if !state.ever_included[idx] {
                let zbp = decode_tag_tree_value(&mut state.zero_bp_tree, &mut reader, x, y)?;
                out[idx].zero_bit_planes = zbp;
                state.ever_included[idx] = true;
            }

            let new_passes = decode_num_passes(&mut reader)?;
            out[idx].new_passes = new_passes;

            let increase = decode_lblock_increase(&mut reader)?;
            state.lblock[idx] += increase;

            let length_bits = state.lblock[idx] as u32 + floor_log2(new_passes);
            out[idx].segment_len = reader.read_bits(length_bits as u8)?;
        }
    }

    reader.align_to_byte();
    Ok((out, reader.byte_position()))
}

fn floor_log2(v: u32) -> u32 {
    debug_assert!(v >= 1);
    31 - v.leading_zeros()
}

/// Smallest Lblock (>= the precinct's current value) whose length field
/// can represent `segment_len` given `new_passes`.
fn lblock_bits_needed(current_lblock: u8, new_passes: u32, segment_len: u32) -> u32 {
    let base = floor_log2(new_passes.max(1));
    let mut bits = current_lblock as u32 + base;
    while segment_len >= (1u32 << bits) {
        bits += 1;
    }
    bits
}

fn encode_num_passes(writer: &mut BitWriter, n: u32) {
    if n == 1 {
        writer.write_bit(0);
        return;
    }
    writer.write_bit(1);
    if n == 2 {
        writer.write_bit(0);
        return;
    }
    writer.write_bit(1);
    if n <= 4 {
        writer.write_bits(0b00, 2);
        writer.write_bits(n - 3, 1);
    } else if n <= 36 {
        writer.write_bits(0b01, 2);
        writer.write_bits(n - 5, 5);
    } else {
        writer.write_bits(0b10, 2);
        writer.write_bits(n - 37, 7);
    }
}

fn decode_num_passes(reader: &mut BitReader<'_>) -> Result<u32> {
    if reader.read_bit()? == 0 {
        return Ok(1);
    }
    if reader.read_bit()? == 0 {
        return Ok(2);
    }
    let b3 = reader.read_bit()?;
    let b4 = reader.read_bit()?;
    match (b3, b4) {
        (0, 0) => Ok(3 + reader.read_bits(1)?),
        (0, 1) => Ok(5 + reader.read_bits(5)?),
        (1, 0) => Ok(37 + reader.read_bits(7)?),
        _ => Err(J2kError::Tier1Corrupt(
            "invalid coding-pass count prefix".into(),
        )),
    }
}

fn encode_lblock_increase(writer: &mut BitWriter, increase: u8) {
    for _ in 0..increase {
        writer.write_bit(1);
    }
    writer.write_bit(0);
}

fn decode_lblock_increase(reader: &mut BitReader<'_>) -> Result<u8> {
    let mut increase = 0u8;
    loop {
        if reader.read_bit()? == 0 {
            return Ok(increase);
        }
        increase += 1;
        if increase > 32 {
            return Err(J2kError::Tier1Corrupt(
                "Lblock increase exceeds sane bound".into(),
            ));
        }
    }
}

fn encode_tag_tree_value(tree: &mut TagTree, writer: &mut BitWriter, x: usize, y: usize, value: u32) {
    for threshold in 1..=(value + 1) {
        tree.encode(writer, x, y, threshold);
    }
}

fn decode_tag_tree_value(
    tree: &mut TagTree,
    reader: &mut BitReader<'_>,
    x: usize,
    y: usize,
) -> Result<u32> {
    let mut threshold = 1u32;
    loop {
        if tree.decode(reader, x, y, threshold)? {
            return Ok(threshold - 1);
        }
        threshold += 1;
        if threshold > 10_000 {
            return Err(J2kError::Tier1Corrupt(
                "tag tree value search exceeded sane bound".into(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_packet_round_trips() {
        let mut enc_state = PrecinctState::new(2, 2);
        enc_state.set_first_inclusion_layers(&[5, 5, 5, 5]);
        enc_state.set_zero_bit_planes(&[0, 0, 0, 0]);
        let contributions = vec![
            CodeBlockContribution {
                included: false,
                zero_bit_planes: 0,
                new_passes: 0,
                segment_len: 0,
            };
            4
        ];
        let bytes = encode_packet_header(&mut enc_state, 0, &contributions);

        let mut dec_state = PrecinctState::new(2, 2);
        dec_state.set_first_inclusion_layers(&[5, 5, 5, 5]);
        dec_state.set_zero_bit_planes(&[0, 0, 0, 0]);
        let (decoded, consumed) = decode_packet_header(&mut dec_state, &bytes, 0).unwrap();
        assert!(decoded.iter().all(|c| !c.included));
        assert!(consumed <= bytes.len());
    }

    #[test]
    fn single_codeblock_first_inclusion_round_trips() {
        let first_layer = [0u32, 9, 9, 9];
        let zero_bp = [2u32, 0, 0, 0];
        let mut enc_state = PrecinctState::new(2, 2);
        enc_state.set_first_inclusion_layers(&first_layer);
        enc_state.set_zero_bit_planes(&zero_bp);

        let contributions = vec![
            CodeBlockContribution {
                included: true,
                zero_bit_planes: 2,
                new_passes: 4,
                segment_len: 37,
            },
            CodeBlockContribution {
                included: false,
                zero_bit_planes: 0,
                new_passes: 0,
                segment_len: 0,
            },
            CodeBlockContribution {
                included: false,
                zero_bit_planes: 0,
                new_passes: 0,
                segment_len: 0,
            },
            CodeBlockContribution {
                included: false,
                zero_bit_planes: 0,
                new_passes: 0,
                segment_len: 0,
            },
        ];
        let bytes = encode_packet_header(&mut enc_state, 0, &contributions);

        let mut dec_state = PrecinctState::new(2, 2);
        dec_state.set_first_inclusion_layers(&first_layer);
        dec_state.set_zero_bit_planes(&zero_bp);
        let (decoded, _) = decode_packet_header(&mut dec_state, &bytes, 0).unwrap();

        assert!(decoded[0].included);
        assert_eq!(decoded[0].zero_bit_planes, 2);
        assert_eq!(decoded[0].new_passes, 4);
        assert_eq!(decoded[0].segment_len, 37);
        assert!(!decoded[1].included);
    }

    #[test]
    fn already_included_codeblock_uses_single_bit_next_layer() {
        let mut enc_state = PrecinctState::new(1, 1);
        enc_state.set_first_inclusion_layers(&[0]);
        enc_state.set_zero_bit_planes(&[0]);
        let mut dec_state = PrecinctState::new(1, 1);
        dec_state.set_first_inclusion_layers(&[0]);
        dec_state.set_zero_bit_planes(&[0]);

        let layer0 = vec![CodeBlockContribution {
            included: true,
            zero_bit_planes: 0,
            new_passes: 1,
            segment_len: 1,
        }];
        let bytes0 = encode_packet_header(&mut enc_state, 0, &layer0);
        decode_packet_header(&mut dec_state, &bytes0, 0).unwrap();
        assert!(dec_state.ever_included[0]);

        let layer1 = vec![CodeBlockContribution {
            included: true,
            zero_bit_planes: 0,
            new_passes: 2,
            segment_len: 3,
        }];
        let bytes1 = encode_packet_header(&mut enc_state, 1, &layer1);
        let (decoded, _) = decode_packet_header(&mut dec_state, &bytes1, 1).unwrap();

        assert!(decoded[0].included);
        assert_eq!(decoded[0].new_passes, 2);
        assert_eq!(decoded[0].segment_len, 3);
    }
}

//! Codestream marker-segment serialiser, the mirror of `reader`.

use crate::bitio::ByteWriter;
use crate::config::{EncoderOptions, Filter};
use crate::image::RoiStyle;
use crate::marker::Marker;
use crate::quant::StepSizeSpec;

use super::segments::*;

pub struct CodestreamWriter<'a> {
    writer: ByteWriter<'a>,
}

impl<'a> CodestreamWriter<'a> {
    pub fn new(destination: &'a mut Vec<u8>) -> Self {
        Self {
            writer: ByteWriter::new(destination),
        }
    }

    pub fn len(&self) -> usize {
        self.writer.len()
    }

    pub fn write_soc(&mut self) {
        self.writer.write_marker(Marker::Soc);
    }

    pub fn write_eoc(&mut self) {
        self.writer.write_marker(Marker::Eoc);
    }

    pub fn write_siz(&mut self, siz: &SizSegment) {
        self.writer.write_marker(Marker::Siz);
        let length = 38 + 3 * siz.components.len() as u16;
        self.writer.write_u16(length);
        self.writer.write_u16(siz.rsiz);
        self.writer.write_u32(siz.width);
        self.writer.write_u32(siz.height);
        self.writer.write_u32(siz.x_origin);
        self.writer.write_u32(siz.y_origin);
        self.writer.write_u32(siz.xt_siz);
        self.writer.write_u32(siz.yt_siz);
        self.writer.write_u32(siz.xt_offset);
        self.writer.write_u32(siz.yt_offset);
        self.writer.write_u16(siz.components.len() as u16);
        for component in &siz.components {
            let ssiz = (component.bit_depth - 1) | if component.signed { 0x80 } else { 0 };
            self.writer.write_u8(ssiz);
            self.writer.write_u8(component.x_sub);
            self.writer.write_u8(component.y_sub);
        }
    }

    fn cod_body_len(has_precincts: bool, decomposition_levels: u8) -> u16 {
        let fixed = 5u16; // decomp + cbw + cbh + style + transform
        let precincts = if has_precincts {
            decomposition_levels as u16 + 1
        } else {
            0
        };
        fixed + precincts
    }

    fn write_cod_body(
        &mut self,
        decomposition_levels: u8,
        cbw_exp: u8,
        cbh_exp: u8,
        style: u8,
        filter: Filter,
        precinct_sizes: &[(u8, u8)],
    ) {
        self.writer.write_u8(decomposition_levels);
        self.writer.write_u8(cbw_exp);
        self.writer.write_u8(cbh_exp);
        self.writer.write_u8(style);
        self.writer.write_u8(match filter {
            Filter::W5x3 => 1,
            Filter::W9x7 => 0,
        });
        for &(ppx, ppy) in precinct_sizes {
            self.writer.write_u8((ppy << 4) | (ppx & 0x0F));
        }
    }

    pub fn write_cod(&mut self, cod: &CodSegment) {
        self.writer.write_marker(Marker::Cod);
        let has_precincts = cod.scod & SCOD_PRECINCTS_DEFINED != 0;
        let length = 2 + 1 + 4 + Self::cod_body_len(has_precincts, cod.decomposition_levels);
        self.writer.write_u16(length);
        self.writer.write_u8(cod.scod);
        self.writer.write_u8(cod.progression.code());
        self.writer.write_u16(cod.num_layers);
        self.writer.write_u8(cod.mct);
        self.write_cod_body(
            cod.decomposition_levels,
            cod.code_block_width_exp,
            cod.code_block_height_exp,
            cod.code_block_style,
            cod.filter,
            &cod.precinct_sizes,
        );
    }

    pub fn write_coc(&mut self, coc: &CocSegment) {
        self.writer.write_marker(Marker::Coc);
        let has_precincts = coc.scoc & SCOD_PRECINCTS_DEFINED != 0;
        let length = 2 + 1 + 1 + Self::cod_body_len(has_precincts, coc.decomposition_levels);
        self.writer.write_u16(length);
        self.writer.write_u8(coc.component as u8);
        self.writer.write_u8(coc.scoc);
        self.write_cod_body(
            coc.decomposition_levels,
            coc.code_block_width_exp,
            coc.code_block_height_exp,
            coc.code_block_style,
            coc.filter,
            &coc.precinct_sizes,
        );
    }

    fn write_step_sizes(&mut self, sqcd: u8, step_sizes: &[StepSizeSpec]) {
        let is_reversible = sqcd & 0x1F == 0;
        for step in step_sizes {
            if is_reversible {
                self.writer.write_u8(step.exponent << 3);
            } else {
                self.writer.write_u16(((step.exponent as u16) << 11) | step.mantissa);
            }
        }
    }

    fn step_sizes_len(sqcd: u8, count: usize) -> u16 {
        let per_entry = if sqcd & 0x1F == 0 { 1 } else { 2 };
        (count * per_entry) as u16
    }

    pub fn write_qcd(&mut self, qcd: &QcdSegment) {
        self.writer.write_marker(Marker::Qcd);
        let length = 2 + 1 + Self::step_sizes_len(qcd.sqcd, qcd.step_sizes.len());
        self.writer.write_u16(length);
        self.writer.write_u8(qcd.sqcd);
        self.write_step_sizes(qcd.sqcd, &qcd.step_sizes);
    }

    pub fn write_qcc(&mut self, qcc: &QccSegment) {
        self.writer.write_marker(Marker::Qcc);
        let length = 2 + 1 + 1 + Self::step_sizes_len(qcc.sqcc, qcc.step_sizes.len());
        self.writer.write_u16(length);
        self.writer.write_u8(qcc.component as u8);
        self.writer.write_u8(qcc.sqcc);
        self.write_step_sizes(qcc.sqcc, &qcc.step_sizes);
    }

    pub fn write_rgn(&mut self, rgn: &RgnSegment) {
        self.writer.write_marker(Marker::Rgn);
        self.writer.write_u16(5);
        self.writer.write_u8(rgn.component as u8);
        let RoiStyle::MaxShift { shift } = rgn.style;
        self.writer.write_u8(0); // Srgn: 0 = max-shift, the only Part 1 style
        self.writer.write_u8(shift);
    }

    pub fn write_poc(&mut self, poc: &PocSegment) {
        self.writer.write_marker(Marker::Poc);
        let length = 2 + poc.changes.len() as u16 * 7;
        self.writer.write_u16(length);
        for change in &poc.changes {
            self.writer.write_u8(change.start_resolution);
            self.writer.write_u8(change.start_component as u8);
            self.writer.write_u16(change.end_layer as u16);
            self.writer.write_u8(change.end_resolution);
            self.writer.write_u8(change.end_component as u8);
            self.writer.write_u8(change.order.code());
        }
    }

    pub fn write_sop(&mut self, packet_sequence: u16) {
        self.writer.write_marker(Marker::Sop);
        self.writer.write_u16(4);
        self.writer.write_u16(packet_sequence);
    }

    pub fn write_eph(&mut self) {
        self.writer.write_marker(Marker::Eph);
    }

    pub fn write_com(&mut self, text: &[u8]) {
        self.writer.write_marker(Marker::Com);
        self.writer.write_u16(4 + text.len() as u16);
        self.writer.write_u16(1); // Rcom: 1 = ISO 8859-15 (Latin) text
        self.writer.write_bytes(text);
    }

    pub fn write_tlm(&mut self, tlm: &TlmSegment) {
        self.writer.write_marker(Marker::Tlm);
        let length = 2 + 1 + 1 + tlm.entries.len() as u16 * 6;
        self.writer.write_u16(length);
        self.writer.write_u8(tlm.ztlm);
        self.writer.write_u8(0x30); // Stlm: 1-byte tile index, 4-byte length
        for &(tile_index, tile_part_length) in &tlm.entries {
            self.writer.write_u8(tile_index as u8);
            self.writer.write_u32(tile_part_length);
        }
    }

    pub fn write_plt(&mut self, plt: &PltSegment) {
        self.writer.write_marker(Marker::Plt);
        let mut body = Vec::new();
        for &length in &plt.packet_lengths {
            encode_varint_base128(length, &mut body);
        }
        self.writer.write_u16(3 + body.len() as u16);
        self.writer.write_u8(plt.zplt);
        self.writer.write_bytes(&body);
    }

    pub fn write_sot(&mut self, sot: &SotSegment) -> usize {
        self.writer.write_marker(Marker::Sot);
        self.writer.write_u16(10);
        self.writer.write_u16(sot.tile_index);
        let psot_offset = self.writer.len();
        self.writer.write_u32(sot.psot);
        self.writer.write_u8(sot.tile_part_index);
        self.writer.write_u8(sot.num_tile_parts);
        psot_offset
    }

    pub fn patch_psot(&mut self, offset: usize, value: u32) {
        self.writer.patch_u32(offset, value);
    }

    pub fn write_sod(&mut self) {
        self.writer.write_marker(Marker::Sod);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.writer.write_bytes(data);
    }

    /// Builds an `EncoderOptions`-derived COD segment's Scod byte.
    pub fn scod_from_options(options: &EncoderOptions) -> u8 {
        let mut scod = 0u8;
        if !options.precinct_sizes.is_empty() {
            scod |= SCOD_PRECINCTS_DEFINED;
        }
        if options.sop {
            scod |= SCOD_SOP;
        }
        if options.eph {
            scod |= SCOD_EPH;
        }
        scod
    }
}

fn encode_varint_base128(mut value: u32, out: &mut Vec<u8>) {
    let mut bytes = Vec::new();
    loop {
        bytes.push((value & 0x7F) as u8);
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for (i, byte) in bytes.iter().rev().enumerate() {
        let continuation = if i + 1 < bytes.len() { 0x80 } else { 0x00 };
        out.push(byte | continuation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::reader::CodestreamReader;
    use crate::config::{DecoderOptions, Progression};
    use crate::image::ComponentInfo;

    #[test]
    fn write_then_read_main_header_round_trips() {
        let mut buf = Vec::new();
        let mut w = CodestreamWriter::new(&mut buf);
        w.write_soc();
        w.write_siz(&SizSegment {
            rsiz: 0,
            width: 64,
            height: 64,
            x_origin: 0,
            y_origin: 0,
            xt_siz: 64,
            yt_siz: 64,
            xt_offset: 0,
            yt_offset: 0,
            components: vec![ComponentInfo {
                index: 0,
                bit_depth: 8,
                signed: false,
                x_sub: 1,
                y_sub: 1,
            }],
        });
        w.write_cod(&CodSegment {
            scod: 0,
            progression: Progression::Lrcp,
            num_layers: 1,
            mct: 0,
            decomposition_levels: 3,
            code_block_width_exp: 4,
            code_block_height_exp: 4,
            code_block_style: 0,
            filter: Filter::W5x3,
            precinct_sizes: Vec::new(),
        });
        w.write_qcd(&QcdSegment {
            sqcd: 0,
            step_sizes: vec![StepSizeSpec {
                exponent: 8,
                mantissa: 0,
            }],
        });
        let sot_offset = w.write_sot(&SotSegment {
            tile_index: 0,
            psot: 0,
            tile_part_index: 0,
            num_tile_parts: 1,
        });
        w.write_sod();
        w.write_bytes(&[0xAA, 0xBB]);
        let marker_start = sot_offset - 6;
        let psot = (w.len() - marker_start) as u32;
        w.patch_psot(sot_offset, psot);
        w.write_eoc();

        let parsed = CodestreamReader::new(&buf, DecoderOptions::default())
            .parse()
            .unwrap();
        let siz = parsed.siz.unwrap();
        assert_eq!(siz.width, 64);
        assert_eq!(parsed.cod.unwrap().decomposition_levels, 3);
        assert_eq!(parsed.tile_parts.len(), 1);
        assert_eq!(parsed.tile_parts[0].data, vec![0xAA, 0xBB]);
    }
}

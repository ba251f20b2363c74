//! Decode pipeline orchestration (§4, §6): codestream parsing, Tier-2
//! packet disassembly, Tier-1 bit-plane decoding, inverse quantisation,
//! inverse DWT, inverse MCT and inverse DC level shift, wired into one
//! codestream-to-raster pass. Mirrors `encoder.rs` stage-for-stage so a
//! stream this crate produced decodes back exactly; third-party streams
//! using per-tile COC/QCC/POC overrides are read (`codestream/reader.rs`
//! parses them) but not honoured — see `DESIGN.md`.

use std::collections::HashMap;

use log::{debug, trace};

use crate::codestream::reader::CodestreamReader;
use crate::codestream::segments::{CodSegment, QcdSegment, SCOD_EPH, SCOD_SOP};
use crate::config::{DecoderOptions, Filter};
use crate::dwt::{reconstruct_53, reconstruct_97, DecomposedSubband, DecomposedSubbandF};
use crate::encoder::{apply_inverse_ict, apply_inverse_rct};
use crate::error::{J2kError, Result};
use crate::image::{
    div_ceil, Canvas, CodeBlock, ComponentInfo, Orientation, RoiStyle, Subband, Tile,
    TileComponent, TileLayout,
};
use crate::jp2::Jp2Reader;
use crate::quant::{
    derived_step_size, dequantize, nominal_range_bits, subband_mb_max, subband_order,
    undo_max_shift_implicit, StepSizeSpec,
};
use crate::raster::RasterSink;
use crate::tier1::coder::decode_codeblock;
use crate::tier2::packet::{decode_packet_header, PrecinctState};
use crate::tier2::progression::{enumerate, PacketCoord, TileExtent};

pub struct Decoder {
    options: DecoderOptions,
}

impl Decoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self { options }
    }

    /// Decodes a raw codestream or JP2 file, writing every tile's samples
    /// to `sink` as they are reconstructed. Returns the canvas and
    /// component layout read from SIZ.
    pub fn decode<S: RasterSink>(
        &self,
        data: &[u8],
        sink: &mut S,
    ) -> Result<(Canvas, Vec<ComponentInfo>)> {
        let codestream = unwrap_container(data)?;
        let parsed = CodestreamReader::new(codestream, self.options).parse()?;

        let siz = parsed.siz.ok_or_else(|| J2kError::missing_marker("SIZ"))?;
        let cod = parsed.cod.ok_or_else(|| J2kError::missing_marker("COD"))?;
        let qcd = parsed.qcd.ok_or_else(|| J2kError::missing_marker("QCD"))?;
        let components = siz.components.clone();

        let canvas = Canvas {
            width: siz.width - siz.x_origin,
            height: siz.height - siz.y_origin,
            x_origin: siz.x_origin,
            y_origin: siz.y_origin,
        };
        let layout = TileLayout {
            xt_siz: siz.xt_siz,
            yt_siz: siz.yt_siz,
            xt_offset: siz.xt_offset,
            yt_offset: siz.yt_offset,
        };
        let (tiles_x, tiles_y) = layout.grid_dims(&canvas);
        debug!(
            "decoding {tiles_x}x{tiles_y} tile grid, {} components",
            components.len()
        );

        let mut roi_shift: HashMap<u16, u8> = HashMap::new();
        for rgn in &parsed.rgn {
            let RoiStyle::MaxShift { shift } = rgn.style;
            roi_shift.insert(rgn.component, shift);
        }

        // Group tile-parts by tile index, ordering each tile's parts by
        // `tile_part_index` before concatenating their raw packet bytes —
        // the encoder always emits exactly one tile-part per tile, but a
        // third-party stream may split a tile across several.
        let mut tile_parts: HashMap<u16, Vec<(u8, &[u8])>> = HashMap::new();
        for tp in &parsed.tile_parts {
            tile_parts
                .entry(tp.sot.tile_index)
                .or_default()
                .push((tp.sot.tile_part_index, &tp.data));
        }

        for (&tile_index, parts) in tile_parts.iter_mut() {
            parts.sort_by_key(|(idx, _)| *idx);
            let mut body = Vec::new();
            for (_, d) in parts.iter() {
                body.extend_from_slice(d);
            }

            let tx = tile_index as u32 % tiles_x;
            let ty = tile_index as u32 / tiles_x;
            let (x0, y0, x1, y1) = layout.tile_rect(&canvas, tx, ty);
            trace!("tile {tile_index}: ({x0},{y0})-({x1},{y1})");

            self.decode_tile(
                tile_index as u32,
                x0,
                y0,
                x1,
                y1,
                &cod,
                &qcd,
                &components,
                &roi_shift,
                &body,
                sink,
            )?;
        }

        Ok((canvas, components))
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_tile<S: RasterSink>(
        &self,
        tile_index: u32,
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
        cod: &CodSegment,
        qcd: &QcdSegment,
        components: &[ComponentInfo],
        roi_shift: &HashMap<u16, u8>,
        body: &[u8],
        sink: &mut S,
    ) -> Result<()> {
        let levels = cod.decomposition_levels;
        let cb_w = 1u32 << (cod.code_block_width_exp as u32 + 2);
        let cb_h = 1u32 << (cod.code_block_height_exp as u32 + 2);
        let num_layers = cod.num_layers.max(1) as u32;

        let mut tile_components = Vec::with_capacity(components.len());
        for comp in components {
            let cw = div_ceil(x1 - x0, comp.x_sub as u32);
            let ch = div_ceil(y1 - y0, comp.y_sub as u32);
            tile_components.push(build_skeleton(comp, cw, ch, levels, qcd, cb_w, cb_h));
        }

        let mut tile = Tile {
            index: tile_index,
            x0,
            y0,
            x1,
            y1,
            components: tile_components,
        };

        let mut precinct_states: HashMap<(u16, u8, Orientation), PrecinctState> = HashMap::new();
        for tc in &tile.components {
            for sb in &tc.subbands {
                let (gx, gy) = sb.codeblock_grid_dims();
                precinct_states.insert(
                    (tc.component_index, sb.level, sb.orientation),
                    PrecinctState::new(gx as usize, gy as usize),
                );
            }
        }

        let extent = TileExtent {
            num_layers,
            num_resolutions: levels as u8 + 1,
            num_components: components.len() as u16,
            num_precincts: 1,
        };
        let coords = enumerate(cod.progression, extent);

        let sop = cod.scod & SCOD_SOP != 0;
        let eph = cod.scod & SCOD_EPH != 0;

        // Mirrors `encode_tile_body`'s explicit layer-major re-filtering:
        // a precinct's tag trees and Lblock state only make sense read in
        // ascending layer order, regardless of what order `enumerate`
        // itself nests its loops in.
        let mut cursor = 0usize;
        for layer in 0..num_layers {
            for coord in coords.iter().filter(|c| c.layer == layer) {
                cursor = self.decode_packet(
                    &mut tile,
                    coord,
                    &mut precinct_states,
                    body,
                    cursor,
                    sop,
                    eph,
                )?;
            }
        }

        self.finish_tile(&mut tile, components, cod, qcd, roi_shift, sink)
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_packet(
        &self,
        tile: &mut Tile,
        coord: &PacketCoord,
        precinct_states: &mut HashMap<(u16, u8, Orientation), PrecinctState>,
        body: &[u8],
        mut cursor: usize,
        sop: bool,
        eph: bool,
    ) -> Result<usize> {
        if sop && body.len() >= cursor + 6 && body[cursor] == 0xFF && body[cursor + 1] == 0x91 {
            cursor += 6;
        }

        let tc = &tile.components[coord.component as usize];
        let sb_keys: Vec<(u8, Orientation)> = tc
            .resolution_subbands(coord.resolution)
            .iter()
            .map(|s| (s.level, s.orientation))
            .collect();

        let mut per_subband = Vec::with_capacity(sb_keys.len());
        for (level, orientation) in sb_keys {
            let key = (coord.component, level, orientation);
            let state = precinct_states
                .get_mut(&key)
                .expect("precinct state built for every subband");
            let (contributions, consumed) = decode_packet_header(state, &body[cursor..], coord.layer)?;
            cursor += consumed;
            per_subband.push((level, orientation, contributions));
        }

        if eph && body.len() >= cursor + 2 && body[cursor] == 0xFF && body[cursor + 1] == 0x92 {
            cursor += 2;
        }

        let tc = &mut tile.components[coord.component as usize];
        for (level, orientation, contributions) in per_subband {
            let sb = tc
                .subbands
                .iter_mut()
                .find(|s| s.level == level && s.orientation == orientation)
                .expect("subband built for every packet header entry");
            for (i, contribution) in contributions.iter().enumerate() {
                if !contribution.included {
                    continue;
                }
                let cb = &mut sb.codeblocks[i];
                if cb.included_passes == 0 {
                    cb.zero_bit_planes = contribution.zero_bit_planes as u8;
                }
                cb.included_passes += contribution.new_passes;
                let len = contribution.segment_len as usize;
                cb.coded_bytes.extend_from_slice(&body[cursor..cursor + len]);
                cursor += len;
            }
        }

        Ok(cursor)
    }

    /// Runs Tier-1 decode over every accumulated code-block, dequantises,
    /// inverse-transforms, undoes ROI max-shift and MCT, reverses the DC
    /// level shift and hands the finished tile to `sink`.
    fn finish_tile<S: RasterSink>(
        &self,
        tile: &mut Tile,
        components: &[ComponentInfo],
        cod: &CodSegment,
        qcd: &QcdSegment,
        roi_shift: &HashMap<u16, u8>,
        sink: &mut S,
    ) -> Result<()> {
        let guard_bits = qcd.sqcd >> 5;
        let levels = cod.decomposition_levels;
        let mct = cod.mct != 0 && components.len() >= 3;

        match cod.filter {
            Filter::W5x3 => {
                let mut planes = Vec::with_capacity(components.len());
                for (ci, comp) in components.iter().enumerate() {
                    let tc = &mut tile.components[ci];
                    let shift = roi_shift.get(&comp.index).copied().unwrap_or(0);
                    let decomposed = decode_subbands_int(tc, guard_bits, shift);
                    planes.push(reconstruct_53(&decomposed, tc.width, tc.height, levels)?);
                }

                if mct {
                    let (a, rest) = planes.split_at_mut(1);
                    let (b, c) = rest.split_at_mut(1);
                    apply_inverse_rct(&mut a[0], &mut b[0], &mut c[0]);
                }

                for (ci, comp) in components.iter().enumerate() {
                    let dc_shift = comp.dc_shift();
                    for v in planes[ci].iter_mut() {
                        *v += dc_shift;
                    }
                    let cw = tile.components[ci].width;
                    let ch = tile.components[ci].height;
                    sink.write_region(
                        comp.index,
                        tile.x0 / comp.x_sub as u32,
                        tile.y0 / comp.y_sub as u32,
                        cw,
                        ch,
                        &planes[ci],
                    )?;
                }
            }
            Filter::W9x7 => {
                let mut float_planes = Vec::with_capacity(components.len());
                for (ci, comp) in components.iter().enumerate() {
                    let tc = &mut tile.components[ci];
                    let shift = roi_shift.get(&comp.index).copied().unwrap_or(0);
                    let decomposed = decode_subbands_float(tc, guard_bits, shift);
                    float_planes.push(reconstruct_97(&decomposed, tc.width, tc.height, levels)?);
                }

                if mct {
                    let (a, rest) = float_planes.split_at_mut(1);
                    let (b, c) = rest.split_at_mut(1);
                    apply_inverse_ict(&mut a[0], &mut b[0], &mut c[0]);
                }

                for (ci, comp) in components.iter().enumerate() {
                    let dc_shift = comp.dc_shift() as f32;
                    let cw = tile.components[ci].width;
                    let ch = tile.components[ci].height;
                    let samples: Vec<i32> = float_planes[ci]
                        .iter()
                        .map(|&v| (v + dc_shift).round() as i32)
                        .collect();
                    sink.write_region(
                        comp.index,
                        tile.x0 / comp.x_sub as u32,
                        tile.y0 / comp.y_sub as u32,
                        cw,
                        ch,
                        &samples,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Strips a JP2 box container down to its embedded codestream; raw
/// codestreams (starting with SOC) pass through unchanged.
fn unwrap_container(data: &[u8]) -> Result<&[u8]> {
    if Jp2Reader::is_jp2(data) {
        Jp2Reader::new(data)
            .find_codestream()?
            .ok_or_else(|| J2kError::missing_marker("JP2C"))
    } else {
        Ok(data)
    }
}

/// Derives a subband's step size from the main header's QCD (Table A.29's
/// SQcd style field), matching `encoder.rs::effective_step_size`'s
/// branches exactly so the same wire bytes dequantise to the values the
/// encoder quantised.
fn subband_step_size(qcd: &QcdSegment, bit_depth: u8, orientation: Orientation, level: u8, levels: u8) -> f64 {
    match qcd.sqcd & 0x1F {
        0 => 1.0,
        1 => {
            let base = qcd.step_sizes.first().copied().unwrap_or(StepSizeSpec {
                exponent: 0,
                mantissa: 0,
            });
            let base_range = nominal_range_bits(bit_depth, Orientation::Ll);
            derived_step_size(base, base_range, nominal_range_bits(bit_depth, orientation))
        }
        _ => {
            let order = subband_order(levels);
            let idx = order
                .iter()
                .position(|&(o, l)| o == orientation && l == level)
                .unwrap_or(0);
            let spec = qcd.step_sizes.get(idx).copied().unwrap_or(StepSizeSpec {
                exponent: 0,
                mantissa: 0,
            });
            spec.step_size(nominal_range_bits(bit_depth, orientation))
        }
    }
}

/// Builds the subband/code-block skeleton for one tile-component before
/// any packet data is available, replicating `dwt.rs`'s internal
/// dimension-halving recursion (there is no dimension-only accessor) so
/// the decoder's resolution/level layout matches what the encoder built.
fn build_skeleton(
    comp: &ComponentInfo,
    full_width: u32,
    full_height: u32,
    levels: u8,
    qcd: &QcdSegment,
    cb_w: u32,
    cb_h: u32,
) -> TileComponent {
    let mut subbands = Vec::new();
    let (mut w, mut h) = (full_width, full_height);
    for level in (1..=levels).rev() {
        let ll_w = (w + 1) / 2;
        let hl_w = w / 2;
        let ll_h = (h + 1) / 2;
        let lh_h = h / 2;
        subbands.push(make_subband(Orientation::Hl, level, hl_w, ll_h, comp, qcd, levels, cb_w, cb_h));
        subbands.push(make_subband(Orientation::Lh, level, ll_w, lh_h, comp, qcd, levels, cb_w, cb_h));
        subbands.push(make_subband(Orientation::Hh, level, hl_w, lh_h, comp, qcd, levels, cb_w, cb_h));
        w = ll_w;
        h = ll_h;
    }
    subbands.push(make_subband(Orientation::Ll, 0, w, h, comp, qcd, levels, cb_w, cb_h));

    TileComponent {
        component_index: comp.index,
        width: full_width,
        height: full_height,
        decomposition_levels: levels,
        subbands,
    }
}

#[allow(clippy::too_many_arguments)]
fn make_subband(
    orientation: Orientation,
    level: u8,
    width: u32,
    height: u32,
    comp: &ComponentInfo,
    qcd: &QcdSegment,
    levels: u8,
    cb_w: u32,
    cb_h: u32,
) -> Subband {
    let range_bits = nominal_range_bits(comp.bit_depth, orientation);
    let step_size = subband_step_size(qcd, comp.bit_depth, orientation, level, levels);
    let (gx, gy) = (div_ceil(width, cb_w), div_ceil(height, cb_h));
    let mut codeblocks = Vec::with_capacity((gx * gy) as usize);
    for by in 0..gy {
        for bx in 0..gx {
            let x = bx * cb_w;
            let y = by * cb_h;
            let w = cb_w.min(width - x);
            let h = cb_h.min(height - y);
            codeblocks.push(CodeBlock::new(x, y, w, h));
        }
    }
    Subband {
        orientation,
        level,
        width,
        height,
        step_size,
        range_bits,
        coefficients: Vec::new(),
        codeblocks,
        codeblock_w: cb_w,
        codeblock_h: cb_h,
    }
}

/// Runs Tier-1 decode over every code-block of every subband in an
/// integer (5/3) tile-component and reassembles them into per-subband
/// coefficient planes, undoing ROI max-shift along the way.
fn decode_subbands_int(tc: &mut TileComponent, guard_bits: u8, roi_shift: u8) -> Vec<DecomposedSubband> {
    let mut out = Vec::with_capacity(tc.subbands.len());
    for sb in &mut tc.subbands {
        let mb_max = subband_mb_max(sb.range_bits, guard_bits);
        let mut data = vec![0i32; (sb.width * sb.height) as usize];
        for cb in &mut sb.codeblocks {
            cb.mb = mb_max.saturating_sub(cb.zero_bit_planes);
            let coded = std::mem::take(&mut cb.coded_bytes);
            decode_codeblock(cb, sb.orientation, &coded, cb.included_passes);
            for row in 0..cb.height {
                for col in 0..cb.width {
                    let idx = (row * cb.width + col) as usize;
                    let mut mag = cb.magnitudes[idx];
                    if roi_shift > 0 {
                        mag = undo_max_shift_implicit(mag, roi_shift);
                    }
                    let value = if cb.signs[idx] { -(mag as i32) } else { mag as i32 };
                    data[((cb.y + row) * sb.width + (cb.x + col)) as usize] = value;
                }
            }
        }
        out.push(DecomposedSubband {
            orientation: sb.orientation,
            level: sb.level,
            width: sb.width,
            height: sb.height,
            data,
        });
    }
    out
}

/// As [`decode_subbands_int`], for the 9/7 irreversible filter: magnitudes
/// are dequantised to floats instead of passed through bit-exact.
fn decode_subbands_float(tc: &mut TileComponent, guard_bits: u8, roi_shift: u8) -> Vec<DecomposedSubbandF> {
    let mut out = Vec::with_capacity(tc.subbands.len());
    for sb in &mut tc.subbands {
        let mb_max = subband_mb_max(sb.range_bits, guard_bits);
        let mut data = vec![0.0f32; (sb.width * sb.height) as usize];
        for cb in &mut sb.codeblocks {
            cb.mb = mb_max.saturating_sub(cb.zero_bit_planes);
            let coded = std::mem::take(&mut cb.coded_bytes);
            decode_codeblock(cb, sb.orientation, &coded, cb.included_passes);
            for row in 0..cb.height {
                for col in 0..cb.width {
                    let idx = (row * cb.width + col) as usize;
                    let mut mag = cb.magnitudes[idx];
                    if roi_shift > 0 {
                        mag = undo_max_shift_implicit(mag, roi_shift);
                    }
                    let q = if cb.signs[idx] { -(mag as i32) } else { mag as i32 };
                    let value = dequantize(q, sb.step_size) as f32;
                    data[((cb.y + row) * sb.width + (cb.x + col)) as usize] = value;
                }
            }
        }
        out.push(DecomposedSubbandF {
            orientation: sb.orientation,
            level: sb.level,
            width: sb.width,
            height: sb.height,
            data,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderOptions;
    use crate::encoder::Encoder;
    use crate::raster::RasterSource;

    struct RampSource {
        width: u32,
        height: u32,
    }

    impl RasterSource for RampSource {
        fn read_region(
            &self,
            _component: u16,
            x0: u32,
            y0: u32,
            width: u32,
            height: u32,
            out: &mut [i32],
        ) -> Result<()> {
            for row in 0..height {
                for col in 0..width {
                    let x = x0 + col;
                    let y = y0 + row;
                    out[(row * width + col) as usize] = ((x + y) % 251) as i32;
                }
            }
            Ok(())
        }
    }

    struct CapturingSink {
        width: u32,
        height: u32,
        samples: Vec<i32>,
    }

    impl CapturingSink {
        fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                samples: vec![0; (width * height) as usize],
            }
        }
    }

    impl RasterSink for CapturingSink {
        fn write_region(
            &mut self,
            _component: u16,
            x0: u32,
            y0: u32,
            width: u32,
            height: u32,
            samples: &[i32],
        ) -> Result<()> {
            for row in 0..height {
                for col in 0..width {
                    let x = x0 + col;
                    let y = y0 + row;
                    self.samples[(y * self.width + x) as usize] = samples[(row * width + col) as usize];
                }
            }
            Ok(())
        }
    }

    #[test]
    fn lossless_round_trip_reconstructs_exactly() {
        let width = 48u32;
        let height = 32u32;
        let source = RampSource { width, height };
        let canvas = Canvas {
            width,
            height,
            x_origin: 0,
            y_origin: 0,
        };
        let components = vec![ComponentInfo {
            index: 0,
            bit_depth: 8,
            signed: false,
            x_sub: 1,
            y_sub: 1,
        }];

        let mut options = EncoderOptions::lossless();
        options.decomposition_levels = 3;
        options.code_block = crate::config::CodeBlockSize { width: 16, height: 16 };
        let encoder = Encoder::new(options).unwrap();
        let bytes = encoder.encode(&source, canvas, &components).unwrap();

        let decoder = Decoder::new(DecoderOptions::default());
        let mut sink = CapturingSink::new(width, height);
        let (decoded_canvas, decoded_components) = decoder.decode(&bytes, &mut sink).unwrap();

        assert_eq!(decoded_canvas, canvas);
        assert_eq!(decoded_components, components);

        let mut expected = vec![0i32; (width * height) as usize];
        source.read_region(0, 0, 0, width, height, &mut expected).unwrap();
        assert_eq!(sink.samples, expected);
    }

    #[test]
    fn jp2_wrapped_stream_round_trips() {
        let width = 16u32;
        let height = 16u32;
        let source = RampSource { width, height };
        let canvas = Canvas {
            width,
            height,
            x_origin: 0,
            y_origin: 0,
        };
        let components = vec![ComponentInfo {
            index: 0,
            bit_depth: 8,
            signed: false,
            x_sub: 1,
            y_sub: 1,
        }];
        let mut options = EncoderOptions::lossless();
        options.decomposition_levels = 1;
        options.container = crate::config::Container::Jp2;
        let encoder = Encoder::new(options).unwrap();
        let bytes = encoder.encode(&source, canvas, &components).unwrap();
        assert!(Jp2Reader::is_jp2(&bytes));

        let decoder = Decoder::new(DecoderOptions::default());
        let mut sink = CapturingSink::new(width, height);
        decoder.decode(&bytes, &mut sink).unwrap();

        let mut expected = vec![0i32; (width * height) as usize];
        source.read_region(0, 0, 0, width, height, &mut expected).unwrap();
        assert_eq!(sink.samples, expected);
    }

    #[test]
    fn undo_max_shift_implicit_infers_background_from_magnitude() {
        assert_eq!(undo_max_shift_implicit(3, 4), 48);
        assert_eq!(undo_max_shift_implicit(20, 4), 20);
        assert_eq!(undo_max_shift_implicit(5, 0), 5);
    }

    #[test]
    fn subband_step_size_matches_encoder_for_expounded_quantisation() {
        let qcd = QcdSegment {
            sqcd: 2,
            step_sizes: subband_order(1)
                .into_iter()
                .map(|(o, _)| StepSizeSpec {
                    exponent: nominal_range_bits(8, o),
                    mantissa: 0,
                })
                .collect(),
        };
        let step = subband_step_size(&qcd, 8, Orientation::Hl, 1, 1);
        assert!((step - 1.0).abs() < 1e-9);
    }
}

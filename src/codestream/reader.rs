//! Codestream marker-segment parser (§4.7 state machine: `Init` ->
//! `ExpectSiz` -> `MainHeader` -> `TileHeader` -> `TileData` -> `End`).

use crate::bitio::ByteReader;
use crate::config::{DecoderOptions, Filter, Progression};
use crate::error::{J2kError, MalformedCodestream, Result};
use crate::image::{ComponentInfo, RoiStyle};
use crate::marker::Marker;
use crate::quant::StepSizeSpec;
use crate::tier2::progression::PocRange;

use super::segments::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    ExpectSiz,
    MainHeader,
    TileHeader,
    TileData,
    End,
}

/// One tile-part's parsed header plus the raw packet bytes that follow it
/// up to (but not including) the next SOT/EOC.
#[derive(Debug, Clone)]
pub struct TilePart {
    pub sot: SotSegment,
    pub cod_overrides: Vec<CocSegment>,
    pub qcd_overrides: Vec<QccSegment>,
    pub poc: Option<PocSegment>,
    pub ppt: Vec<PptSegment>,
    pub data: Vec<u8>,
}

/// Everything the marker layer extracts from a codestream: the main
/// header's parameters plus every tile-part's header and data.
#[derive(Debug, Clone, Default)]
pub struct ParsedCodestream {
    pub siz: Option<SizSegment>,
    pub cod: Option<CodSegment>,
    pub qcd: Option<QcdSegment>,
    pub coc: Vec<CocSegment>,
    pub qcc: Vec<QccSegment>,
    pub rgn: Vec<RgnSegment>,
    pub poc: Option<PocSegment>,
    pub tlm: Vec<TlmSegment>,
    pub plt: Vec<PltSegment>,
    pub ppm: Vec<PpmSegment>,
    pub comments: Vec<Vec<u8>>,
    pub tile_parts: Vec<TilePart>,
}

pub struct CodestreamReader<'a> {
    reader: ByteReader<'a>,
    options: DecoderOptions,
    state: State,
}

impl<'a> CodestreamReader<'a> {
    pub fn new(data: &'a [u8], options: DecoderOptions) -> Self {
        Self {
            reader: ByteReader::new(data),
            options,
            state: State::Init,
        }
    }

    pub fn parse(mut self) -> Result<ParsedCodestream> {
        let mut out = ParsedCodestream::default();
        self.expect_soc()?;
        self.parse_main_header(&mut out)?;
        self.parse_tiles(&mut out)?;
        Ok(out)
    }

    fn expect_soc(&mut self) -> Result<()> {
        assert_eq!(self.state, State::Init);
        let marker = self.reader.read_marker()?;
        if marker != Marker::Soc {
            return Err(J2kError::bad_marker_order("SOC", marker.name()));
        }
        self.state = State::ExpectSiz;
        Ok(())
    }

    fn parse_main_header(&mut self, out: &mut ParsedCodestream) -> Result<()> {
        loop {
            let marker = self.reader.read_marker()?;
            if self.state == State::ExpectSiz && marker != Marker::Siz {
                return Err(J2kError::bad_marker_order("SIZ", marker.name()));
            }
            match marker {
                Marker::Siz => {
                    out.siz = Some(self.parse_siz()?);
                    self.state = State::MainHeader;
                }
                Marker::Cod => {
                    self.reject_duplicate(out.cod.is_some(), "COD")?;
                    out.cod = Some(self.parse_cod()?);
                }
                Marker::Coc => out.coc.push(self.parse_coc()?),
                Marker::Qcd => {
                    self.reject_duplicate(out.qcd.is_some(), "QCD")?;
                    out.qcd = Some(self.parse_qcd()?);
                }
                Marker::Qcc => out.qcc.push(self.parse_qcc()?),
                Marker::Rgn => out.rgn.push(self.parse_rgn()?),
                Marker::Poc => out.poc = Some(self.parse_poc()?),
                Marker::Tlm => out.tlm.push(self.parse_tlm()?),
                Marker::Plm => {
                    self.skip_segment()?;
                }
                Marker::Ppm => {
                    let ppm = self.parse_ppm()?;
                    out.ppm.push(ppm);
                }
                Marker::Com => out.comments.push(self.parse_com()?),
                Marker::Crg => {
                    self.skip_segment()?;
                }
                Marker::Sot => {
                    self.state = State::TileHeader;
                    self.unread_marker();
                    return Ok(());
                }
                other => {
                    if self.options.strict {
                        return Err(J2kError::MalformedCodestream(
                            MalformedCodestream::UnknownMarker(other.code()),
                        ));
                    }
                    log::warn!("skipping unexpected marker {} in main header", other.name());
                    self.skip_segment()?;
                }
            }
        }
    }

    fn reject_duplicate(&self, already_present: bool, name: &'static str) -> Result<()> {
        if !already_present {
            return Ok(());
        }
        if self.options.strict {
            Err(J2kError::MalformedCodestream(
                MalformedCodestream::BadMarkerOrder {
                    expected: "at most one",
                    found: name.to_string(),
                },
            ))
        } else {
            log::warn!("duplicate {name} marker in main header, keeping the last one");
            Ok(())
        }
    }

    /// Steps the cursor back two bytes so a marker can be re-read by the
    /// next parsing stage; only ever called right after `read_marker`.
    fn unread_marker(&mut self) {
        let pos = self.reader.position();
        self.reader.seek(pos - 2).expect("just read 2 bytes");
    }

    fn parse_siz(&mut self) -> Result<SizSegment> {
        let _len = self.reader.read_u16()?;
        let rsiz = self.reader.read_u16()?;
        let width = self.reader.read_u32()?;
        let height = self.reader.read_u32()?;
        let x_origin = self.reader.read_u32()?;
        let y_origin = self.reader.read_u32()?;
        let xt_siz = self.reader.read_u32()?;
        let yt_siz = self.reader.read_u32()?;
        let xt_offset = self.reader.read_u32()?;
        let yt_offset = self.reader.read_u32()?;
        let csiz = self.reader.read_u16()?;
        let mut components = Vec::with_capacity(csiz as usize);
        for index in 0..csiz {
            let ssiz = self.reader.read_u8()?;
            let x_sub = self.reader.read_u8()?;
            let y_sub = self.reader.read_u8()?;
            components.push(ComponentInfo {
                index,
                bit_depth: (ssiz & 0x7F) + 1,
                signed: ssiz & 0x80 != 0,
                x_sub,
                y_sub,
            });
        }
        Ok(SizSegment {
            rsiz,
            width,
            height,
            x_origin,
            y_origin,
            xt_siz,
            yt_siz,
            xt_offset,
            yt_offset,
            components,
        })
    }

    /// Shared body for COD/COC: decomposition levels, code-block sizing,
    /// style bits, filter, and precinct size list (Table A.15/A.16).
    fn parse_cod_body(&mut self, has_precincts: bool) -> Result<(u8, u8, u8, u8, u8, Filter, Vec<(u8, u8)>)> {
        let decomposition_levels = self.reader.read_u8()?;
        let cbw_exp = self.reader.read_u8()?;
        let cbh_exp = self.reader.read_u8()?;
        let code_block_style = self.reader.read_u8()?;
        let transform = self.reader.read_u8()?;
        let filter = if transform == 1 {
            Filter::W5x3
        } else {
            Filter::W9x7
        };
        let mut precinct_sizes = Vec::new();
        if has_precincts {
            for _ in 0..=decomposition_levels {
                let byte = self.reader.read_u8()?;
                precinct_sizes.push((byte & 0x0F, (byte >> 4) & 0x0F));
            }
        }
        Ok((
            decomposition_levels,
            cbw_exp,
            cbh_exp,
            code_block_style,
            transform,
            filter,
            precinct_sizes,
        ))
    }

    fn parse_cod(&mut self) -> Result<CodSegment> {
        let _len = self.reader.read_u16()?;
        let scod = self.reader.read_u8()?;
        let progression_code = self.reader.read_u8()?;
        let num_layers = self.reader.read_u16()?;
        let mct = self.reader.read_u8()?;
        let has_precincts = scod & SCOD_PRECINCTS_DEFINED != 0;
        let (decomposition_levels, cbw, cbh, style, _transform, filter, precinct_sizes) =
            self.parse_cod_body(has_precincts)?;
        Ok(CodSegment {
            scod,
            progression: Progression::from_code(progression_code)?,
            num_layers,
            mct,
            decomposition_levels,
            code_block_width_exp: cbw,
            code_block_height_exp: cbh,
            code_block_style: style,
            filter,
            precinct_sizes,
        })
    }

    fn parse_coc(&mut self) -> Result<CocSegment> {
        let _len = self.reader.read_u16()?;
        let component = self.reader.read_u8()? as u16;
        let scoc = self.reader.read_u8()?;
        let has_precincts = scoc & SCOD_PRECINCTS_DEFINED != 0;
        let (decomposition_levels, cbw, cbh, style, _transform, filter, precinct_sizes) =
            self.parse_cod_body(has_precincts)?;
        Ok(CocSegment {
            component,
            scoc,
            decomposition_levels,
            code_block_width_exp: cbw,
            code_block_height_exp: cbh,
            code_block_style: style,
            filter,
            precinct_sizes,
        })
    }

    /// SPqcd/SPqcc entries (Table A.28): one byte per subband (exponent
    /// only, no mantissa) for reversible quantisation, two bytes
    /// (5-bit exponent + 11-bit mantissa) otherwise.
    fn parse_step_sizes(&mut self, sqcd: u8, bytes_left: &mut usize) -> Result<Vec<StepSizeSpec>> {
        let is_reversible = sqcd & 0x1F == 0;
        let mut step_sizes = Vec::new();
        if is_reversible {
            while *bytes_left >= 1 {
                let byte = self.reader.read_u8()?;
                *bytes_left -= 1;
                step_sizes.push(StepSizeSpec {
                    exponent: (byte >> 3) & 0x1F,
                    mantissa: 0,
                });
            }
        } else {
            while *bytes_left >= 2 {
                let raw = self.reader.read_u16()?;
                *bytes_left -= 2;
                step_sizes.push(StepSizeSpec {
                    exponent: ((raw >> 11) & 0x1F) as u8,
                    mantissa: raw & 0x7FF,
                });
            }
        }
        Ok(step_sizes)
    }

    fn parse_qcd(&mut self) -> Result<QcdSegment> {
        let len = self.reader.read_u16()?;
        let sqcd = self.reader.read_u8()?;
        let mut bytes_left = (len as usize).saturating_sub(3);
        let step_sizes = self.parse_step_sizes(sqcd, &mut bytes_left)?;
        if bytes_left > 0 {
            self.reader.advance(bytes_left)?;
        }
        Ok(QcdSegment { sqcd, step_sizes })
    }

    fn parse_qcc(&mut self) -> Result<QccSegment> {
        let len = self.reader.read_u16()?;
        let component = self.reader.read_u8()? as u16;
        let sqcc = self.reader.read_u8()?;
        let mut bytes_left = (len as usize).saturating_sub(4);
        let step_sizes = self.parse_step_sizes(sqcc, &mut bytes_left)?;
        if bytes_left > 0 {
            self.reader.advance(bytes_left)?;
        }
        Ok(QccSegment {
            component,
            sqcc,
            step_sizes,
        })
    }

    fn parse_rgn(&mut self) -> Result<RgnSegment> {
        let _len = self.reader.read_u16()?;
        let component = self.reader.read_u8()? as u16;
        let _style_byte = self.reader.read_u8()?; // always 0 (max-shift) in Part 1
        let shift = self.reader.read_u8()?;
        Ok(RgnSegment {
            component,
            style: RoiStyle::MaxShift { shift },
        })
    }

    fn parse_poc(&mut self) -> Result<PocSegment> {
        let len = self.reader.read_u16()?;
        let mut bytes_left = (len as usize).saturating_sub(2);
        let mut changes = Vec::new();
        // Each change is 7 or 9 bytes depending on whether component
        // indices need 16 bits (Csiz > 256); this core always uses the
        // single-byte form for RSpoc/CSpoc, consistent with Siz reading
        // Csiz as u16 but component counts in practice staying small.
        while bytes_left >= 7 {
            let start_resolution = self.reader.read_u8()?;
            let start_component = self.reader.read_u8()? as u16;
            let end_layer = self.reader.read_u16()? as u32;
            let end_resolution = self.reader.read_u8()?;
            let end_component = self.reader.read_u8()? as u16;
            let order_code = self.reader.read_u8()?;
            bytes_left -= 7;
            changes.push(PocRange {
                start_resolution,
                end_resolution,
                start_component,
                end_component,
                end_layer,
                order: Progression::from_code(order_code)?,
            });
        }
        if bytes_left > 0 {
            self.reader.advance(bytes_left)?;
        }
        Ok(PocSegment { changes })
    }

    fn parse_tlm(&mut self) -> Result<TlmSegment> {
        let len = self.reader.read_u16()?;
        let ztlm = self.reader.read_u8()?;
        let stlm = self.reader.read_u8()?;
        let tile_index_bytes = if stlm & 0x40 != 0 { 2 } else { 1 };
        let length_bytes = if stlm & 0x30 == 0x30 { 4 } else { 2 };
        let mut bytes_left = (len as usize).saturating_sub(3);
        let entry_size = tile_index_bytes + length_bytes;
        let mut entries = Vec::new();
        let mut previous_ttlm: Option<u16> = None;
        while bytes_left >= entry_size {
            let ttlm = if tile_index_bytes == 2 {
                self.reader.read_u16()?
            } else {
                self.reader.read_u8()? as u16
            };
            let ptlm = if length_bytes == 4 {
                self.reader.read_u32()?
            } else {
                self.reader.read_u16()? as u32
            };
            bytes_left -= entry_size;
            if let Some(prev) = previous_ttlm {
                if ttlm <= prev {
                    log::warn!("TLM Ztlm={ztlm} entries are not strictly increasing; disabling fast tile-part lookup for this marker");
                }
            }
            previous_ttlm = Some(ttlm);
            entries.push((ttlm, ptlm));
        }
        if bytes_left > 0 {
            self.reader.advance(bytes_left)?;
        }
        Ok(TlmSegment { ztlm, entries })
    }

    fn parse_plt(&mut self) -> Result<PltSegment> {
        let len = self.reader.read_u16()?;
        let zplt = self.reader.read_u8()?;
        let mut bytes_left = (len as usize).saturating_sub(3);
        let mut packet_lengths = Vec::new();
        while bytes_left > 0 {
            let mut value = 0u32;
            loop {
                let byte = self.reader.read_u8()?;
                bytes_left -= 1;
                value = (value << 7) | (byte & 0x7F) as u32;
                if byte & 0x80 == 0 {
                    break;
                }
            }
            packet_lengths.push(value);
        }
        Ok(PltSegment {
            zplt,
            packet_lengths,
        })
    }

    fn parse_ppm(&mut self) -> Result<PpmSegment> {
        let len = self.reader.read_u16()?;
        let zppm = self.reader.read_u8()?;
        let data = self.reader.read_bytes((len as usize).saturating_sub(3))?.to_vec();
        Ok(PpmSegment { zppm, data })
    }

    fn parse_ppt(&mut self) -> Result<PptSegment> {
        let len = self.reader.read_u16()?;
        let zppt = self.reader.read_u8()?;
        let data = self.reader.read_bytes((len as usize).saturating_sub(3))?.to_vec();
        Ok(PptSegment { zppt, data })
    }

    fn parse_com(&mut self) -> Result<Vec<u8>> {
        let len = self.reader.read_u16()?;
        let _registration = self.reader.read_u16()?;
        Ok(self.reader.read_bytes((len as usize).saturating_sub(4))?.to_vec())
    }

    fn skip_segment(&mut self) -> Result<()> {
        let len = self.reader.read_u16()?;
        if len < 2 {
            return Err(J2kError::MalformedCodestream(MalformedCodestream::BadLength));
        }
        self.reader.advance((len - 2) as usize)
    }

    fn parse_tiles(&mut self, out: &mut ParsedCodestream) -> Result<()> {
        loop {
            match self.state {
                State::TileHeader => {
                    let sot_marker_offset = self.reader.position();
                    let marker = self.reader.read_marker()?;
                    if marker != Marker::Sot {
                        return Err(J2kError::bad_marker_order("SOT", marker.name()));
                    }
                    let sot = self.parse_sot()?;
                    let mut cod_overrides = Vec::new();
                    let mut qcd_overrides = Vec::new();
                    let mut poc = None;
                    let mut ppt = Vec::new();
                    loop {
                        let marker = self.reader.read_marker()?;
                        match marker {
                            Marker::Cod => {
                                let cod = self.parse_cod()?;
                                cod_overrides.push(CocSegment {
                                    component: 0,
                                    scoc: cod.scod,
                                    decomposition_levels: cod.decomposition_levels,
                                    code_block_width_exp: cod.code_block_width_exp,
                                    code_block_height_exp: cod.code_block_height_exp,
                                    code_block_style: cod.code_block_style,
                                    filter: cod.filter,
                                    precinct_sizes: cod.precinct_sizes,
                                });
                            }
                            Marker::Coc => cod_overrides.push(self.parse_coc()?),
                            Marker::Qcd => {
                                let qcd = self.parse_qcd()?;
                                qcd_overrides.push(QccSegment {
                                    component: 0,
                                    sqcc: qcd.sqcd,
                                    step_sizes: qcd.step_sizes,
                                });
                            }
                            Marker::Qcc => qcd_overrides.push(self.parse_qcc()?),
                            Marker::Rgn => out.rgn.push(self.parse_rgn()?),
                            Marker::Poc => poc = Some(self.parse_poc()?),
                            Marker::Ppt => ppt.push(self.parse_ppt()?),
                            Marker::Plt => out.plt.push(self.parse_plt()?),
                            Marker::Sod => {
                                self.state = State::TileData;
                                break;
                            }
                            other => {
                                if self.options.strict {
                                    return Err(J2kError::bad_marker_order("SOD", other.name()));
                                }
                                log::warn!("skipping unexpected marker {} in tile-part header", other.name());
                                self.skip_segment()?;
                            }
                        }
                    }
                    let data = self.read_tile_part_data(&sot, sot_marker_offset)?;
                    out.tile_parts.push(TilePart {
                        sot,
                        cod_overrides,
                        qcd_overrides,
                        poc,
                        ppt,
                        data,
                    });
                    self.state = if self.reader.remaining().is_empty() {
                        State::End
                    } else {
                        State::TileHeader
                    };
                }
                State::TileData => unreachable!("read_tile_part_data leaves state at TileHeader/End"),
                State::End => return Ok(()),
                _ => unreachable!("parse_main_header exits only into TileHeader"),
            }
            if self.at_eoc()? {
                self.state = State::End;
                return Ok(());
            }
        }
    }

    fn at_eoc(&mut self) -> Result<bool> {
        if let Some((code, _)) = self.reader.peek_marker() {
            if code == Marker::Eoc.code() {
                self.reader.advance(2)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn parse_sot(&mut self) -> Result<SotSegment> {
        let _len = self.reader.read_u16()?;
        let tile_index = self.reader.read_u16()?;
        let psot = self.reader.read_u32()?;
        let tile_part_index = self.reader.read_u8()?;
        let num_tile_parts = self.reader.read_u8()?;
        Ok(SotSegment {
            tile_index,
            psot,
            tile_part_index,
            num_tile_parts,
        })
    }

    /// Reads the tile-part's packet data. When `Psot` is known the length
    /// is exact; when it is zero (last tile-part, Annex A.4.2) the data
    /// runs until the next SOT or EOC.
    ///
    /// `Psot` (Table A.10) counts from the first byte of the SOT marker
    /// itself, through the tile-part header (any COD/COC/QCD/QCC/RGN/POC/
    /// PPT overrides) and SOD, to the end of the tile-part's data — so the
    /// end offset is `sot_marker_offset + psot` regardless of how much
    /// header the tile-part carried, not a fixed constant past SOT.
    fn read_tile_part_data(&mut self, sot: &SotSegment, sot_marker_offset: usize) -> Result<Vec<u8>> {
        if sot.psot != 0 {
            let end = sot_marker_offset + sot.psot as usize;
            let remaining = end.saturating_sub(self.reader.position());
            return Ok(self.reader.read_bytes(remaining)?.to_vec());
        }
        let remaining = self.reader.remaining();
        let mut offset = 0usize;
        while offset + 1 < remaining.len() {
            if remaining[offset] == crate::marker::MARKER_START_BYTE
                && (remaining[offset + 1] == Marker::Sot.code()
                    || remaining[offset + 1] == Marker::Eoc.code())
            {
                break;
            }
            offset += 1;
        }
        if offset + 1 >= remaining.len() {
            offset = remaining.len();
        }
        self.reader.read_bytes(offset).map(|s| s.to_vec())
    }
}

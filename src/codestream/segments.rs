//! Marker segment payloads (Annex A). Each struct holds a parsed
//! segment's fields independent of the marker framing (length prefix,
//! marker code itself), which `reader`/`writer` handle.

use crate::config::{Filter, Progression};
use crate::image::{ComponentInfo, RoiStyle};
use crate::quant::StepSizeSpec;

#[derive(Debug, Clone, PartialEq)]
pub struct SizSegment {
    pub rsiz: u16,
    pub width: u32,
    pub height: u32,
    pub x_origin: u32,
    pub y_origin: u32,
    pub xt_siz: u32,
    pub yt_siz: u32,
    pub xt_offset: u32,
    pub yt_offset: u32,
    pub components: Vec<ComponentInfo>,
}

/// Scod flags (Table A.13).
pub const SCOD_PRECINCTS_DEFINED: u8 = 0x01;
pub const SCOD_SOP: u8 = 0x02;
pub const SCOD_EPH: u8 = 0x04;

#[derive(Debug, Clone, PartialEq)]
pub struct CodSegment {
    pub scod: u8,
    pub progression: Progression,
    pub num_layers: u16,
    /// Multiple component transform: 0 = none, 1 = RCT/ICT on the first
    /// three components (§4.3.1).
    pub mct: u8,
    pub decomposition_levels: u8,
    pub code_block_width_exp: u8,
    pub code_block_height_exp: u8,
    pub code_block_style: u8,
    pub filter: Filter,
    /// One `(PPx, PPy)` pair per resolution level when
    /// `scod & SCOD_PRECINCTS_DEFINED` is set, else empty (default 2^15).
    pub precinct_sizes: Vec<(u8, u8)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CocSegment {
    pub component: u16,
    pub scoc: u8,
    pub decomposition_levels: u8,
    pub code_block_width_exp: u8,
    pub code_block_height_exp: u8,
    pub code_block_style: u8,
    pub filter: Filter,
    pub precinct_sizes: Vec<(u8, u8)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QcdSegment {
    pub sqcd: u8,
    pub step_sizes: Vec<StepSizeSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QccSegment {
    pub component: u16,
    pub sqcc: u8,
    pub step_sizes: Vec<StepSizeSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgnSegment {
    pub component: u16,
    pub style: RoiStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PocSegment {
    pub changes: Vec<crate::tier2::progression::PocRange>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SotSegment {
    pub tile_index: u16,
    /// Length of this tile-part including the SOT segment itself, or 0
    /// when unknown (last tile-part in the codestream).
    pub psot: u32,
    pub tile_part_index: u8,
    pub num_tile_parts: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlmSegment {
    pub ztlm: u8,
    /// `(tile_index, tile_part_length)` pairs in stream order.
    pub entries: Vec<(u16, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PltSegment {
    pub zplt: u8,
    pub packet_lengths: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PpmSegment {
    pub zppm: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PptSegment {
    pub zppt: u8,
    pub data: Vec<u8>,
}

//! Unified data model: Canvas, Component, Tile, TileComponent, Subband,
//! CodeBlock (§3). Tile-components own an arena of subbands; subbands own
//! an arena of code-blocks, addressed by index rather than back-pointers
//! so a tile's working set can be dropped wholesale between tiles.

/// One of the four orientations a subband may have. The LL band at the
/// coarsest decomposition level is the only one with no detail content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Ll,
    Hl,
    Lh,
    Hh,
}

impl Orientation {
    /// Wavelet subband gain exponent used to weight distortion estimates
    /// and to derive per-subband step sizes (Annex E, Table E.1 uses the
    /// same values for both filters).
    pub fn gain_exponent(self) -> u8 {
        match self {
            Orientation::Ll => 0,
            Orientation::Hl | Orientation::Lh => 1,
            Orientation::Hh => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub x_origin: u32,
    pub y_origin: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub index: u16,
    pub bit_depth: u8,
    pub signed: bool,
    pub x_sub: u8,
    pub y_sub: u8,
}

impl ComponentInfo {
    pub fn dc_shift(&self) -> i32 {
        if self.signed {
            0
        } else {
            1 << (self.bit_depth - 1)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub xt_siz: u32,
    pub yt_siz: u32,
    pub xt_offset: u32,
    pub yt_offset: u32,
}

impl TileLayout {
    /// Number of tiles along each axis covering `canvas`.
    pub fn grid_dims(&self, canvas: &Canvas) -> (u32, u32) {
        let numx = div_ceil(canvas.x_origin + canvas.width - self.xt_offset, self.xt_siz);
        let numy = div_ceil(canvas.y_origin + canvas.height - self.yt_offset, self.yt_siz);
        (numx, numy)
    }

    /// Reference-grid rectangle (x0, y0, x1, y1) of tile `(tx, ty)`
    /// clipped to the canvas.
    pub fn tile_rect(&self, canvas: &Canvas, tx: u32, ty: u32) -> (u32, u32, u32, u32) {
        let x0 = (self.xt_offset + tx * self.xt_siz).max(canvas.x_origin);
        let y0 = (self.yt_offset + ty * self.yt_siz).max(canvas.y_origin);
        let x1 = (self.xt_offset + (tx + 1) * self.xt_siz).min(canvas.x_origin + canvas.width);
        let y1 = (self.yt_offset + (ty + 1) * self.yt_siz).min(canvas.y_origin + canvas.height);
        (x0, y0, x1, y1)
    }
}

pub fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

#[derive(Debug, Clone)]
pub struct CodeBlock {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Quantised coefficient magnitudes in row-major order, sign held
    /// separately (sign-magnitude representation, §4.4).
    pub magnitudes: Vec<u32>,
    pub signs: Vec<bool>,
    /// Most significant magnitude bit-plane, `Mb = ceil(log2(max_coeff))`.
    pub mb: u8,
    /// Per coding-pass cumulative byte length and distortion reduction,
    /// used by PCRD. Index `p` is the p-th coding pass across all
    /// bit-planes (`len == 3*mb - 2` once fully coded).
    pub pass_lengths: Vec<u32>,
    pub pass_distortion: Vec<f64>,
    /// The code-block's coded bytes, one terminated segment per
    /// termination point actually used.
    pub coded_bytes: Vec<u8>,
    /// Number of coding passes actually included, set by Tier-2 once a
    /// layer's contribution has been chosen.
    pub included_passes: u32,
    pub zero_bit_planes: u8,
}

impl CodeBlock {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        let area = (width * height) as usize;
        Self {
            x,
            y,
            width,
            height,
            magnitudes: vec![0; area],
            signs: vec![false; area],
            mb: 0,
            pass_lengths: Vec::new(),
            pass_distortion: Vec::new(),
            coded_bytes: Vec::new(),
            included_passes: 0,
            zero_bit_planes: 0,
        }
    }

    pub fn max_coding_passes(&self) -> u32 {
        if self.mb == 0 {
            0
        } else {
            3 * self.mb as u32 - 2
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subband {
    pub orientation: Orientation,
    /// Resolution level this subband belongs to (0 = LL at the coarsest
    /// level, increasing toward the full-resolution image).
    pub level: u8,
    pub width: u32,
    pub height: u32,
    pub step_size: f64,
    /// Nominal dynamic range in bits, used to derive the step size for
    /// derived quantisation.
    pub range_bits: u8,
    pub coefficients: Vec<i32>,
    pub codeblocks: Vec<CodeBlock>,
    pub codeblock_w: u32,
    pub codeblock_h: u32,
}

impl Subband {
    pub fn codeblock_grid_dims(&self) -> (u32, u32) {
        (
            div_ceil(self.width, self.codeblock_w),
            div_ceil(self.height, self.codeblock_h),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TileComponent {
    pub component_index: u16,
    pub width: u32,
    pub height: u32,
    pub decomposition_levels: u8,
    pub subbands: Vec<Subband>,
}

impl TileComponent {
    pub fn resolution_subbands(&self, level: u8) -> Vec<&Subband> {
        self.subbands.iter().filter(|s| s.level == level).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub index: u32,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub components: Vec<TileComponent>,
}

impl Tile {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }
    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoiStyle {
    MaxShift { shift: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub component: u16,
    pub style: RoiStyle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_grid_dims_covers_canvas_with_partial_last_tile() {
        let canvas = Canvas {
            width: 1000,
            height: 1000,
            x_origin: 0,
            y_origin: 0,
        };
        let layout = TileLayout {
            xt_siz: 256,
            yt_siz: 256,
            xt_offset: 0,
            yt_offset: 0,
        };
        assert_eq!(layout.grid_dims(&canvas), (4, 4));
        let (x0, y0, x1, y1) = layout.tile_rect(&canvas, 3, 3);
        assert_eq!((x0, y0, x1, y1), (768, 768, 1000, 1000));
    }

    #[test]
    fn unsigned_component_dc_shift_matches_half_range() {
        let c = ComponentInfo {
            index: 0,
            bit_depth: 8,
            signed: false,
            x_sub: 1,
            y_sub: 1,
        };
        assert_eq!(c.dc_shift(), 128);
    }

    #[test]
    fn max_coding_passes_follows_3mb_minus_2() {
        let mut cb = CodeBlock::new(0, 0, 4, 4);
        cb.mb = 5;
        assert_eq!(cb.max_coding_passes(), 13);
    }
}

//! Configuration surface for the codec core.
//!
//! Plain validated structs, not a fluent builder framework — the standard
//! option combinations a caller picks are enumerated here and checked once
//! in [`EncoderOptions::validate`], never mid-pipeline.

use crate::error::{J2kError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// 5/3 integer reversible lifting filter.
    W5x3,
    /// 9/7 irreversible lifting filter.
    W9x7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantisation {
    Reversible,
    Derived,
    Expounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mct {
    Auto,
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progression {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

impl Progression {
    pub fn code(self) -> u8 {
        match self {
            Progression::Lrcp => 0,
            Progression::Rlcp => 1,
            Progression::Rpcl => 2,
            Progression::Pcrl => 3,
            Progression::Cprl => 4,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Progression::Lrcp,
            1 => Progression::Rlcp,
            2 => Progression::Rpcl,
            3 => Progression::Pcrl,
            4 => Progression::Cprl,
            other => {
                return Err(J2kError::invalid_config(format!(
                    "unknown progression order code {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    RawCodestream,
    Jp2,
}

/// A single quality layer target, either an absolute byte budget or a
/// bits-per-pixel target resolved once the canvas size is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerTarget {
    pub bpp: f64,
}

/// Error-resilience switches (§6 `error_resilience` bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorResilience {
    pub segmentation_symbols: bool,
    pub reset_contexts: bool,
    pub terminate_per_pass: bool,
    pub vertically_causal: bool,
    pub predictable_termination: bool,
    pub bypass: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CodeBlockSize {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
        }
    }
}

impl CodeBlockSize {
    pub fn validate(self) -> Result<()> {
        if !self.width.is_power_of_two() || !self.height.is_power_of_two() {
            return Err(J2kError::invalid_config(
                "code-block dimensions must be powers of two",
            ));
        }
        if !(4..=1024).contains(&self.width) || !(4..=1024).contains(&self.height) {
            return Err(J2kError::invalid_config(
                "code-block dimensions must be in [4, 1024]",
            ));
        }
        if self.width as u64 * self.height as u64 > 4096 {
            return Err(J2kError::invalid_config(
                "code-block area must not exceed 4096 samples",
            ));
        }
        Ok(())
    }

    /// `codeblock_width_exp`/`codeblock_height_exp` as stored in COD, offset
    /// by the standard's implicit +2 (Annex A.6.1 stores `xcb - 2`).
    pub fn exponents(self) -> (u8, u8) {
        (
            self.width.trailing_zeros() as u8 - 2,
            self.height.trailing_zeros() as u8 - 2,
        )
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub lossless: bool,
    pub layers: Vec<LayerTarget>,
    pub tile_size: Option<(u32, u32)>,
    pub decomposition_levels: u8,
    pub filter: Filter,
    pub quantisation: Quantisation,
    pub step_size: f64,
    pub guard_bits: u8,
    pub mct: Mct,
    pub progression: Progression,
    pub code_block: CodeBlockSize,
    pub precinct_sizes: Vec<(u32, u32)>,
    pub sop: bool,
    pub eph: bool,
    pub tlm: bool,
    pub plt: bool,
    pub plm: bool,
    pub ppm: bool,
    pub ppt: bool,
    pub roi: Vec<RoiRegion>,
    pub error_resilience: ErrorResilience,
    pub container: Container,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoiShape {
    Rect { x: u32, y: u32, w: u32, h: u32 },
    Circle { cx: u32, cy: u32, radius: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiRegion {
    pub shape: RoiShape,
    pub component: Option<u16>,
    /// Bits background coefficients are shifted down by (Annex H.1.2).
    pub shift: u8,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            lossless: true,
            layers: Vec::new(),
            tile_size: None,
            decomposition_levels: 5,
            filter: Filter::W5x3,
            quantisation: Quantisation::Reversible,
            step_size: 0.0,
            guard_bits: 2,
            mct: Mct::Auto,
            progression: Progression::Lrcp,
            code_block: CodeBlockSize::default(),
            precinct_sizes: Vec::new(),
            sop: false,
            eph: false,
            tlm: false,
            plt: false,
            plm: false,
            ppm: false,
            ppt: false,
            roi: Vec::new(),
            error_resilience: ErrorResilience::default(),
            container: Container::RawCodestream,
        }
    }
}

impl EncoderOptions {
    pub fn lossless() -> Self {
        Self::default()
    }

    pub fn lossy(target_bpp: f64) -> Self {
        Self {
            lossless: false,
            layers: vec![LayerTarget { bpp: target_bpp }],
            filter: Filter::W9x7,
            quantisation: Quantisation::Expounded,
            mct: Mct::On,
            ..Self::default()
        }
    }

    /// Raises `InvalidConfig` eagerly; never called mid-pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.lossless && self.filter != Filter::W5x3 {
            return Err(J2kError::invalid_config(
                "lossless mode requires the 5/3 reversible filter",
            ));
        }
        if self.lossless && self.quantisation != Quantisation::Reversible {
            return Err(J2kError::invalid_config(
                "lossless mode requires reversible quantisation",
            ));
        }
        if !self.lossless && self.filter == Filter::W5x3 && self.quantisation == Quantisation::Reversible
        {
            // 5/3 + reversible is a valid *lossy-capable but integer* pairing
            // only when no layer truncation beyond "keep everything" is
            // requested; anything else needs 9/7.
        }
        if self.decomposition_levels > 32 {
            return Err(J2kError::invalid_config(
                "decomposition_levels must be in [0, 32]",
            ));
        }
        self.code_block.validate()?;
        if let Some((w, h)) = self.tile_size {
            if w == 0 || h == 0 {
                return Err(J2kError::invalid_geometry("tile_size must be non-zero"));
            }
        }
        if !(0..=7).contains(&self.guard_bits) {
            return Err(J2kError::invalid_config("guard_bits must be in [0, 7]"));
        }
        for layer in &self.layers {
            if layer.bpp <= 0.0 {
                return Err(J2kError::invalid_config("target_bpp must be > 0"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderOptions {
    /// When true, warnings (e.g. resynchronisation in resilient mode,
    /// duplicate COD/QCD in the main header) become hard errors.
    pub strict: bool,
}

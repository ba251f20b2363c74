//! `jpex2k` — a JPEG 2000 Part 1 (ISO/IEC 15444-1) codestream and JP2
//! codec core: tiling and DC level shift, the reversible and
//! irreversible multi-component transforms, the 5/3 and 9/7 discrete
//! wavelet transforms, scalar quantisation with ROI max-shift, EBCOT
//! Tier-1 entropy coding, Tier-2 rate-distortion-optimal packet assembly
//! across all five progression orders, and codestream/JP2 marker
//! serialisation.
//!
//! Pixel-format adapters, a fluent configuration builder, ICC colour
//! management beyond passthrough, Part 2 extensions, Motion JPEG 2000
//! and HTJ2K/Part 15 are out of scope — see `DESIGN.md`.

pub mod bitio;
pub mod codestream;
pub mod config;
pub mod decoder;
pub mod dwt;
pub mod encoder;
pub mod error;
pub mod image;
pub mod jp2;
pub mod marker;
pub mod mq;
pub mod quant;
pub mod raster;
pub mod tagtree;
pub mod tier1;
pub mod tier2;

pub use config::{DecoderOptions, EncoderOptions};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{J2kError, Result};
pub use image::{Canvas, ComponentInfo};
pub use raster::{RasterSink, RasterSource};

//! End-to-end encode/decode coverage across tile grids, progression
//! orders, quality layers, multi-component transforms and ROI.

use jpex2k::config::{
    Container, EncoderOptions, Filter, LayerTarget, Mct, Progression, Quantisation, RoiRegion,
    RoiShape,
};
use jpex2k::image::{Canvas, ComponentInfo};
use jpex2k::raster::{RasterSink, RasterSource};
use jpex2k::{Decoder, DecoderOptions, Encoder};

/// Deterministic per-component ramp, distinct enough across components
/// and positions to catch transposition or channel-swap bugs.
struct RampSource {
    width: u32,
    height: u32,
    bit_depth: u8,
}

impl RasterSource for RampSource {
    fn read_region(
        &self,
        component: u16,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        out: &mut [i32],
    ) -> jpex2k::Result<()> {
        let max = (1i32 << self.bit_depth) - 1;
        for row in 0..height {
            for col in 0..width {
                let x = x0 + col;
                let y = y0 + row;
                let v = (x as i32 * 7 + y as i32 * 13 + component as i32 * 31) % (max + 1);
                out[(row * width + col) as usize] = v;
            }
        }
        Ok(())
    }
}

struct CapturingSink {
    width: u32,
    height: u32,
    components: u16,
    samples: Vec<i32>,
}

impl CapturingSink {
    fn new(width: u32, height: u32, components: u16) -> Self {
        Self {
            width,
            height,
            components,
            samples: vec![i32::MIN; (width * height * components as u32) as usize],
        }
    }

    fn get(&self, component: u16, x: u32, y: u32) -> i32 {
        let idx = (y * self.width * self.components as u32 + x * self.components as u32 + component as u32) as usize;
        self.samples[idx]
    }
}

impl RasterSink for CapturingSink {
    fn write_region(
        &mut self,
        component: u16,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        samples: &[i32],
    ) -> jpex2k::Result<()> {
        for row in 0..height {
            for col in 0..width {
                let x = x0 + col;
                let y = y0 + row;
                let idx =
                    (y * self.width * self.components as u32 + x * self.components as u32 + component as u32)
                        as usize;
                self.samples[idx] = samples[(row * width + col) as usize];
            }
        }
        Ok(())
    }
}

fn greyscale_component(bit_depth: u8) -> Vec<ComponentInfo> {
    vec![ComponentInfo {
        index: 0,
        bit_depth,
        signed: false,
        x_sub: 1,
        y_sub: 1,
    }]
}

fn rgb_components(bit_depth: u8) -> Vec<ComponentInfo> {
    (0..3)
        .map(|index| ComponentInfo {
            index,
            bit_depth,
            signed: false,
            x_sub: 1,
            y_sub: 1,
        })
        .collect()
}

fn assert_lossless_round_trip(
    width: u32,
    height: u32,
    components: Vec<ComponentInfo>,
    options: EncoderOptions,
) {
    let source = RampSource {
        width,
        height,
        bit_depth: components[0].bit_depth,
    };
    let canvas = Canvas {
        width,
        height,
        x_origin: 0,
        y_origin: 0,
    };
    let encoder = Encoder::new(options).unwrap();
    let bytes = encoder.encode(&source, canvas, &components).unwrap();

    let decoder = Decoder::new(DecoderOptions::default());
    let mut sink = CapturingSink::new(width, height, components.len() as u16);
    let (decoded_canvas, decoded_components) = decoder.decode(&bytes, &mut sink).unwrap();

    assert_eq!(decoded_canvas.width, width);
    assert_eq!(decoded_canvas.height, height);
    assert_eq!(decoded_components.len(), components.len());

    let mut expected = vec![0i32; width as usize * height as usize];
    for component in 0..components.len() as u16 {
        source
            .read_region(component, 0, 0, width, height, &mut expected)
            .unwrap();
        for y in 0..height {
            for x in 0..width {
                let want = expected[(y * width + x) as usize];
                let got = sink.get(component, x, y);
                assert_eq!(
                    got, want,
                    "component {component} mismatch at ({x},{y}): got {got}, want {want}"
                );
            }
        }
    }
}

#[test]
fn single_tile_greyscale_round_trips_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 3;
    assert_lossless_round_trip(48, 32, greyscale_component(8), options);
}

#[test]
fn multi_tile_grid_round_trips_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 2;
    options.tile_size = Some((16, 16));
    // 48x40 over 16x16 tiles makes a 3x3 grid with partial boundary tiles
    // on the right and bottom edges.
    assert_lossless_round_trip(48, 40, greyscale_component(8), options);
}

#[test]
fn rct_colour_image_round_trips_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.mct = Mct::On;
    options.decomposition_levels = 2;
    assert_lossless_round_trip(32, 24, rgb_components(8), options);
}

#[test]
fn every_progression_order_round_trips_losslessly() {
    for order in [
        Progression::Lrcp,
        Progression::Rlcp,
        Progression::Rpcl,
        Progression::Pcrl,
        Progression::Cprl,
    ] {
        let mut options = EncoderOptions::lossless();
        options.decomposition_levels = 2;
        options.progression = order;
        assert_lossless_round_trip(32, 32, greyscale_component(8), options);
    }
}

#[test]
fn multiple_quality_layers_round_trip_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 2;
    options.layers = vec![
        LayerTarget { bpp: 0.5 },
        LayerTarget { bpp: 1.0 },
        LayerTarget { bpp: 8.0 },
    ];
    assert_lossless_round_trip(32, 32, greyscale_component(8), options);
}

#[test]
fn sop_and_eph_markers_round_trip_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 2;
    options.sop = true;
    options.eph = true;
    assert_lossless_round_trip(32, 32, greyscale_component(8), options);
}

#[test]
fn jp2_container_round_trips_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 2;
    options.container = Container::Jp2;
    assert_lossless_round_trip(24, 24, greyscale_component(8), options);
}

#[test]
fn ict_lossy_round_trip_stays_close_to_source() {
    let width = 32;
    let height = 32;
    let components = rgb_components(8);
    let mut options = EncoderOptions::lossy(4.0);
    options.decomposition_levels = 3;
    assert_eq!(options.filter, Filter::W9x7);
    assert_eq!(options.quantisation, Quantisation::Expounded);

    let source = RampSource {
        width,
        height,
        bit_depth: 8,
    };
    let canvas = Canvas {
        width,
        height,
        x_origin: 0,
        y_origin: 0,
    };
    let encoder = Encoder::new(options).unwrap();
    let bytes = encoder.encode(&source, canvas, &components).unwrap();

    let decoder = Decoder::new(DecoderOptions::default());
    let mut sink = CapturingSink::new(width, height, 3);
    decoder.decode(&bytes, &mut sink).unwrap();

    let mut expected = vec![0i32; width as usize * height as usize];
    let mut max_abs_error = 0i32;
    for component in 0..3u16 {
        source
            .read_region(component, 0, 0, width, height, &mut expected)
            .unwrap();
        for y in 0..height {
            for x in 0..width {
                let diff = (sink.get(component, x, y) - expected[(y * width + x) as usize]).abs();
                max_abs_error = max_abs_error.max(diff);
            }
        }
    }
    assert!(
        max_abs_error < 40,
        "lossy reconstruction drifted too far: max abs error {max_abs_error}"
    );
}

#[test]
fn roi_max_shift_round_trips_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 2;
    options.roi = vec![RoiRegion {
        shape: RoiShape::Rect {
            x: 0,
            y: 0,
            w: 16,
            h: 16,
        },
        component: None,
        shift: 4,
    }];
    // ROI max-shift only reorders bit-plane inclusion within a code-block;
    // with an unbounded layer budget every coefficient is still fully
    // included, so the image must still reconstruct exactly.
    assert_lossless_round_trip(32, 32, greyscale_component(8), options);
}

#[test]
fn non_power_of_two_dimensions_round_trip_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 4;
    assert_lossless_round_trip(37, 29, greyscale_component(8), options);
}

#[test]
fn sixteen_bit_component_round_trips_losslessly() {
    let mut options = EncoderOptions::lossless();
    options.decomposition_levels = 2;
    assert_lossless_round_trip(24, 24, greyscale_component(16), options);
}

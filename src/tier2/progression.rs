//! The five progression orders (§4.6.1, Table A.16) as iterators over
//! `(layer, resolution, component, precinct)` tuples, plus POC overrides.

use crate::config::Progression;

/// One packet's coordinates within the tile, in the order Tier-2 must
/// emit packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCoord {
    pub layer: u32,
    pub resolution: u8,
    pub component: u16,
    pub precinct: u32,
}

/// A single progression-order-change range (Annex A.3.4): applies from
/// `start_resolution`/`start_component` up to (but not including) the
/// `end_*` bounds, for one progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PocRange {
    pub start_resolution: u8,
    pub end_resolution: u8,
    pub start_component: u16,
    pub end_component: u16,
    pub end_layer: u32,
    pub order: Progression,
}

/// Dimensions needed to enumerate packets for one tile.
#[derive(Debug, Clone, Copy)]
pub struct TileExtent {
    pub num_layers: u32,
    pub num_resolutions: u8,
    pub num_components: u16,
    pub num_precincts: u32,
}

/// Enumerates every packet coordinate for a tile in the given progression
/// order, with no POC override.
pub fn enumerate(order: Progression, extent: TileExtent) -> Vec<PacketCoord> {
    let mut out = Vec::new();
    match order {
        Progression::Lrcp => {
            for layer in 0..extent.num_layers {
                for resolution in 0..extent.num_resolutions {
                    for component in 0..extent.num_components {
                        for precinct in 0..extent.num_precincts {
                            out.push(PacketCoord {
                                layer,
                                resolution,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
        Progression::Rlcp => {
            for resolution in 0..extent.num_resolutions {
                for layer in 0..extent.num_layers {
                    for component in 0..extent.num_components {
                        for precinct in 0..extent.num_precincts {
                            out.push(PacketCoord {
                                layer,
                                resolution,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
        Progression::Rpcl => {
            for resolution in 0..extent.num_resolutions {
                for precinct in 0..extent.num_precincts {
                    for component in 0..extent.num_components {
                        for layer in 0..extent.num_layers {
                            out.push(PacketCoord {
                                layer,
                                resolution,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
        Progression::Pcrl => {
            for precinct in 0..extent.num_precincts {
                for component in 0..extent.num_components {
                    for resolution in 0..extent.num_resolutions {
                        for layer in 0..extent.num_layers {
                            out.push(PacketCoord {
                                layer,
                                resolution,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
        Progression::Cprl => {
            for component in 0..extent.num_components {
                for precinct in 0..extent.num_precincts {
                    for resolution in 0..extent.num_resolutions {
                        for layer in 0..extent.num_layers {
                            out.push(PacketCoord {
                                layer,
                                resolution,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
    }
    out
}

/// Enumerates packets honouring a POC override list: ranges are applied in
/// order, each contributing the packets within its bounds under its own
/// progression order; ranges typically partition the layer axis so no
/// packet is emitted twice.
pub fn enumerate_with_poc(ranges: &[PocRange], extent: TileExtent) -> Vec<PacketCoord> {
    let mut out = Vec::new();
    let mut layer_floor = 0u32;
    for range in ranges {
        let sub_extent = TileExtent {
            num_layers: range.end_layer.saturating_sub(layer_floor),
            num_resolutions: range.end_resolution - range.start_resolution,
            num_components: range.end_component - range.start_component,
            num_precincts: extent.num_precincts,
        };
        for coord in enumerate(range.order, sub_extent) {
            out.push(PacketCoord {
                layer: coord.layer + layer_floor,
                resolution: coord.resolution + range.start_resolution,
                component: coord.component + range.start_component,
                precinct: coord.precinct,
            });
        }
        layer_floor = range.end_layer;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_extent() -> TileExtent {
        TileExtent {
            num_layers: 2,
            num_resolutions: 2,
            num_components: 2,
            num_precincts: 2,
        }
    }

    #[test]
    fn lrcp_outer_loop_is_layer() {
        let coords = enumerate(Progression::Lrcp, small_extent());
        assert_eq!(coords.len(), 16);
        assert_eq!(coords[0].layer, 0);
        assert_eq!(coords[8].layer, 1);
    }

    #[test]
    fn rlcp_outer_loop_is_resolution() {
        let coords = enumerate(Progression::Rlcp, small_extent());
        assert_eq!(coords[0].resolution, 0);
        assert_eq!(coords[8].resolution, 1);
    }

    #[test]
    fn every_order_enumerates_the_same_set_of_coordinates() {
        use std::collections::BTreeSet;
        let extent = small_extent();
        let orders = [
            Progression::Lrcp,
            Progression::Rlcp,
            Progression::Rpcl,
            Progression::Pcrl,
            Progression::Cprl,
        ];
        let mut reference: Option<BTreeSet<(u32, u8, u16, u32)>> = None;
        for order in orders {
            let set: BTreeSet<_> = enumerate(order, extent)
                .into_iter()
                .map(|c| (c.layer, c.resolution, c.component, c.precinct))
                .collect();
            if let Some(r) = &reference {
                assert_eq!(&set, r, "{order:?} produced a different coordinate set");
            } else {
                reference = Some(set);
            }
        }
    }

    #[test]
    fn poc_ranges_partition_the_layer_axis() {
        let extent = TileExtent {
            num_layers: 4,
            num_resolutions: 1,
            num_components: 1,
            num_precincts: 1,
        };
        let ranges = [
            PocRange {
                start_resolution: 0,
                end_resolution: 1,
                start_component: 0,
                end_component: 1,
                end_layer: 2,
                order: Progression::Lrcp,
            },
            PocRange {
                start_resolution: 0,
                end_resolution: 1,
                start_component: 0,
                end_component: 1,
                end_layer: 4,
                order: Progression::Rlcp,
            },
        ];
        let coords = enumerate_with_poc(&ranges, extent);
        let layers: Vec<u32> = coords.iter().map(|c| c.layer).collect();
        assert_eq!(layers, vec![0, 1, 2, 3]);
    }
}

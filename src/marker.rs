//! Codestream marker codes (ISO/IEC 15444-1 Annex A).
//!
//! Every marker is `0xFF xx`; this enum covers the full 27-marker set named
//! in the marker layer: delimiters, size, coding style, quantisation, ROI,
//! progression, pointer markers, packet delimiters, comment and registered
//! informational markers.

use crate::error::{J2kError, MalformedCodestream};

pub const MARKER_START_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Marker {
    /// SOC: start of codestream.
    Soc = 0x4F,
    /// SIZ: image and tile size.
    Siz = 0x51,
    /// COD: coding style default.
    Cod = 0x52,
    /// COC: coding style component.
    Coc = 0x53,
    /// RGN: region of interest.
    Rgn = 0x5E,
    /// QCD: quantisation default.
    Qcd = 0x5C,
    /// QCC: quantisation component.
    Qcc = 0x5D,
    /// POC: progression order change.
    Poc = 0x5F,
    /// TLM: tile-part lengths, main header.
    Tlm = 0x55,
    /// PLM: packet length, main header.
    Plm = 0x57,
    /// PLT: packet length, tile-part header.
    Plt = 0x58,
    /// PPM: packed packet headers, main header.
    Ppm = 0x60,
    /// PPT: packed packet headers, tile-part header.
    Ppt = 0x61,
    /// SOP: start of packet.
    Sop = 0x91,
    /// EPH: end of packet header.
    Eph = 0x92,
    /// SOT: start of tile-part.
    Sot = 0x90,
    /// SOD: start of data.
    Sod = 0x93,
    /// EOC: end of codestream.
    Eoc = 0xD9,
    /// CRG: component registration.
    Crg = 0x63,
    /// COM: comment.
    Com = 0x64,
    /// CAP: extended capabilities (Part 2 / HTJ2K signalling).
    Cap = 0x50,
    /// CPF: corresponding profile (Part 2).
    Cpf = 0x59,
    /// DCO: variable DC offset (Part 2).
    Dco = 0x5B,
    /// NLT: non-linearity point transformation (Part 2).
    Nlt = 0x76,
    /// ATK: arbitrary transformation kernels (Part 2).
    Atk = 0x79,
    /// MCT: multiple component transform definition (Part 2).
    Mct = 0x74,
    /// MCC: multiple component collection (Part 2).
    Mcc = 0x75,
    /// MCO: multiple component transform ordering (Part 2).
    Mco = 0x77,
}

impl Marker {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Marker::Soc => "SOC",
            Marker::Siz => "SIZ",
            Marker::Cod => "COD",
            Marker::Coc => "COC",
            Marker::Rgn => "RGN",
            Marker::Qcd => "QCD",
            Marker::Qcc => "QCC",
            Marker::Poc => "POC",
            Marker::Tlm => "TLM",
            Marker::Plm => "PLM",
            Marker::Plt => "PLT",
            Marker::Ppm => "PPM",
            Marker::Ppt => "PPT",
            Marker::Sop => "SOP",
            Marker::Eph => "EPH",
            Marker::Sot => "SOT",
            Marker::Sod => "SOD",
            Marker::Eoc => "EOC",
            Marker::Crg => "CRG",
            Marker::Com => "COM",
            Marker::Cap => "CAP",
            Marker::Cpf => "CPF",
            Marker::Dco => "DCO",
            Marker::Nlt => "NLT",
            Marker::Atk => "ATK",
            Marker::Mct => "MCT",
            Marker::Mcc => "MCC",
            Marker::Mco => "MCO",
        }
    }

    /// Markers with no length field / payload: SOC, SOD, EOC, EPH.
    pub fn is_delimiter_only(self) -> bool {
        matches!(self, Marker::Soc | Marker::Sod | Marker::Eoc | Marker::Eph)
    }
}

impl TryFrom<u8> for Marker {
    type Error = J2kError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            0x4F => Marker::Soc,
            0x51 => Marker::Siz,
            0x52 => Marker::Cod,
            0x53 => Marker::Coc,
            0x5E => Marker::Rgn,
            0x5C => Marker::Qcd,
            0x5D => Marker::Qcc,
            0x5F => Marker::Poc,
            0x55 => Marker::Tlm,
            0x57 => Marker::Plm,
            0x58 => Marker::Plt,
            0x60 => Marker::Ppm,
            0x61 => Marker::Ppt,
            0x91 => Marker::Sop,
            0x92 => Marker::Eph,
            0x90 => Marker::Sot,
            0x93 => Marker::Sod,
            0xD9 => Marker::Eoc,
            0x63 => Marker::Crg,
            0x64 => Marker::Com,
            0x50 => Marker::Cap,
            0x59 => Marker::Cpf,
            0x5B => Marker::Dco,
            0x76 => Marker::Nlt,
            0x79 => Marker::Atk,
            0x74 => Marker::Mct,
            0x75 => Marker::Mcc,
            0x77 => Marker::Mco,
            other => {
                return Err(J2kError::MalformedCodestream(
                    MalformedCodestream::UnknownMarker(other),
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_marker() {
        let markers = [
            Marker::Soc,
            Marker::Siz,
            Marker::Cod,
            Marker::Coc,
            Marker::Rgn,
            Marker::Qcd,
            Marker::Qcc,
            Marker::Poc,
            Marker::Tlm,
            Marker::Plm,
            Marker::Plt,
            Marker::Ppm,
            Marker::Ppt,
            Marker::Sop,
            Marker::Eph,
            Marker::Sot,
            Marker::Sod,
            Marker::Eoc,
            Marker::Crg,
            Marker::Com,
            Marker::Cap,
        ];
        for m in markers {
            assert_eq!(Marker::try_from(m.code()).unwrap(), m);
        }
    }

    #[test]
    fn soc_and_eoc_match_spec_bytes() {
        assert_eq!(Marker::Soc.code(), 0x4F);
        assert_eq!(Marker::Eoc.code(), 0xD9);
    }

    #[test]
    fn unknown_code_errors_in_strict_mode() {
        assert!(Marker::try_from(0x00).is_err());
    }
}

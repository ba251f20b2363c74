//! JP2 file format box container (Annex I).
//!
//! A JP2 file is a sequence of length-prefixed, four-character-coded
//! boxes. This core reads and writes the structural subset that wraps a
//! raw codestream: the signature, file type, JP2 header (with image
//! header, colour specification, optional palette/component mapping and
//! channel definition, and resolution sub-boxes), the codestream itself,
//! and passthrough XML/UUID/UUID-info boxes.

use crate::error::{J2kError, MalformedCodestream, Result};

pub const SIGNATURE_BOX: &[u8; 12] = b"\x00\x00\x00\x0CjP  \r\n\x87\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: BoxType = BoxType(*b"ftyp");
    pub const JP2H: BoxType = BoxType(*b"jp2h");
    pub const IHDR: BoxType = BoxType(*b"ihdr");
    pub const COLR: BoxType = BoxType(*b"colr");
    pub const BPCC: BoxType = BoxType(*b"bpcc");
    pub const PCLR: BoxType = BoxType(*b"pclr");
    pub const CMAP: BoxType = BoxType(*b"cmap");
    pub const CDEF: BoxType = BoxType(*b"cdef");
    pub const RES: BoxType = BoxType(*b"res ");
    pub const RESC: BoxType = BoxType(*b"resc");
    pub const RESD: BoxType = BoxType(*b"resd");
    pub const JP2C: BoxType = BoxType(*b"jp2c");
    pub const XML: BoxType = BoxType(*b"xml ");
    pub const UUID: BoxType = BoxType(*b"uuid");
    pub const UINF: BoxType = BoxType(*b"uinf");
    pub const ULST: BoxType = BoxType(*b"ulst");
    pub const URL: BoxType = BoxType(*b"url ");
    pub const RREQ: BoxType = BoxType(*b"rreq");

    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

/// A box's framing (type + payload range into the source buffer), as
/// discovered during a forward scan.
#[derive(Debug, Clone)]
pub struct Jp2Box {
    pub box_type: BoxType,
    pub data_range: std::ops::Range<usize>,
}

/// The Image Header box's fixed fields (ihdr, Table I.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub height: u32,
    pub width: u32,
    pub num_components: u16,
    pub bit_depth: u8,
    pub signed: bool,
    pub compression_type: u8,
    pub unknown_colourspace: bool,
    pub intellectual_property: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColourSpecification {
    Enumerated(EnumeratedColourspace),
    Icc(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumeratedColourspace {
    Greyscale,
    Srgb,
    SycC,
}

impl EnumeratedColourspace {
    fn code(self) -> u32 {
        match self {
            EnumeratedColourspace::Greyscale => 17,
            EnumeratedColourspace::Srgb => 16,
            EnumeratedColourspace::SycC => 18,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            17 => EnumeratedColourspace::Greyscale,
            16 => EnumeratedColourspace::Srgb,
            18 => EnumeratedColourspace::SycC,
            other => {
                return Err(J2kError::UnsupportedFeature(format!(
                    "unknown EnumCS value {other}"
                )))
            }
        })
    }
}

/// The channel definition box's per-channel association (cdef, Table I.18).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDefinition {
    pub channel_index: u16,
    /// 0 = colour, 1 = opacity, 2 = premultiplied opacity.
    pub channel_type: u16,
    /// 0 = whole image, 1..=N = associated with colour component N.
    pub association: u16,
}

#[derive(Debug, Clone)]
pub struct Jp2Header {
    pub ihdr: ImageHeader,
    pub colr: ColourSpecification,
    pub bpcc: Option<Vec<u8>>,
    pub palette: Option<Vec<Vec<u32>>>,
    pub component_mapping: Option<Vec<(u16, u8, u8)>>,
    pub cdef: Vec<ChannelDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct Jp2File {
    pub header: Option<Jp2Header>,
    pub codestream_range: Option<std::ops::Range<usize>>,
    pub xml_boxes: Vec<Vec<u8>>,
    pub uuid_boxes: Vec<([u8; 16], Vec<u8>)>,
}

/// Forward-scans a JP2 file's box structure, starting with the mandatory
/// 12-byte signature box, and extracts the structural boxes this core
/// understands.
pub struct Jp2Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Jp2Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn is_jp2(data: &[u8]) -> bool {
        data.len() >= 12 && &data[0..12] == SIGNATURE_BOX
    }

    pub fn parse(mut self) -> Result<Jp2File> {
        if !Self::is_jp2(self.data) {
            return Err(J2kError::MalformedCodestream(
                MalformedCodestream::MissingMarker("JP2 signature box"),
            ));
        }
        self.position = 12;
        let mut file = Jp2File::default();
        while let Some(b) = self.read_box()? {
            match b.box_type {
                BoxType::FTYP => { /* brand/compatibility, not semantically needed downstream */ }
                BoxType::JP2H => file.header = Some(self.parse_jp2h(&b)?),
                BoxType::JP2C => file.codestream_range = Some(b.data_range),
                BoxType::XML => file.xml_boxes.push(self.data[b.data_range].to_vec()),
                BoxType::UUID => {
                    if b.data_range.len() >= 16 {
                        let mut id = [0u8; 16];
                        id.copy_from_slice(&self.data[b.data_range.start..b.data_range.start + 16]);
                        file.uuid_boxes
                            .push((id, self.data[b.data_range.start + 16..b.data_range.end].to_vec()));
                    }
                }
                _ => {}
            }
        }
        if file.codestream_range.is_none() {
            return Err(J2kError::MalformedCodestream(
                MalformedCodestream::MissingMarker("jp2c"),
            ));
        }
        Ok(file)
    }

    pub fn find_codestream(&mut self) -> Result<Option<&'a [u8]>> {
        self.position = if Self::is_jp2(self.data) { 12 } else { 0 };
        while let Some(b) = self.read_box()? {
            if b.box_type == BoxType::JP2C {
                return Ok(Some(&self.data[b.data_range]));
            }
        }
        Ok(None)
    }

    fn read_box(&mut self) -> Result<Option<Jp2Box>> {
        if self.position + 8 > self.data.len() {
            return Ok(None);
        }
        let start = self.position;
        let mut length = u32::from_be_bytes(self.data[start..start + 4].try_into().unwrap()) as u64;
        let box_type = BoxType(self.data[start + 4..start + 8].try_into().unwrap());
        self.position += 8;
        let mut header_size = 8u64;
        if length == 1 {
            if self.position + 8 > self.data.len() {
                return Err(J2kError::MalformedCodestream(MalformedCodestream::BadLength));
            }
            length = u64::from_be_bytes(self.data[self.position..self.position + 8].try_into().unwrap());
            self.position += 8;
            header_size += 8;
        } else if length == 0 {
            length = (self.data.len() - start) as u64;
        }
        let data_start = start + header_size as usize;
        let data_end = start + length as usize;
        if data_end > self.data.len() || data_end < data_start {
            return Err(J2kError::MalformedCodestream(MalformedCodestream::BadLength));
        }
        self.position = data_end;
        Ok(Some(Jp2Box {
            box_type,
            data_range: data_start..data_end,
        }))
    }

    fn parse_jp2h(&mut self, jp2h: &Jp2Box) -> Result<Jp2Header> {
        let mut sub = Jp2Reader::new(&self.data[jp2h.data_range.clone()]);
        let mut ihdr = None;
        let mut colr = None;
        let mut bpcc = None;
        let mut palette = None;
        let mut component_mapping = None;
        let mut cdef = Vec::new();
        while let Some(b) = sub.read_box()? {
            let payload = &sub.data[b.data_range.clone()];
            match b.box_type {
                BoxType::IHDR => ihdr = Some(parse_ihdr(payload)?),
                BoxType::COLR => colr = Some(parse_colr(payload)?),
                BoxType::BPCC => bpcc = Some(payload.to_vec()),
                BoxType::PCLR => palette = Some(parse_pclr(payload)?),
                BoxType::CMAP => component_mapping = Some(parse_cmap(payload)?),
                BoxType::CDEF => cdef = parse_cdef(payload)?,
                _ => {}
            }
        }
        let ihdr = ihdr.ok_or(J2kError::MalformedCodestream(
            MalformedCodestream::MissingMarker("ihdr"),
        ))?;
        let colr = colr.ok_or(J2kError::MalformedCodestream(
            MalformedCodestream::MissingMarker("colr"),
        ))?;
        Ok(Jp2Header {
            ihdr,
            colr,
            bpcc,
            palette,
            component_mapping,
            cdef,
        })
    }
}

fn parse_ihdr(data: &[u8]) -> Result<ImageHeader> {
    if data.len() < 14 {
        return Err(J2kError::MalformedCodestream(MalformedCodestream::BadLength));
    }
    let height = u32::from_be_bytes(data[0..4].try_into().unwrap());
    let width = u32::from_be_bytes(data[4..8].try_into().unwrap());
    let num_components = u16::from_be_bytes(data[8..10].try_into().unwrap());
    let bpc = data[10];
    let compression_type = data[11];
    let unknown_colourspace = data[12] != 0;
    let intellectual_property = data[13] != 0;
    Ok(ImageHeader {
        height,
        width,
        num_components,
        bit_depth: (bpc & 0x7F) + 1,
        signed: bpc & 0x80 != 0,
        compression_type,
        unknown_colourspace,
        intellectual_property,
    })
}

fn parse_colr(data: &[u8]) -> Result<ColourSpecification> {
    if data.len() < 3 {
        return Err(J2kError::MalformedCodestream(MalformedCodestream::BadLength));
    }
    let method = data[0];
    if method == 1 {
        let code = u32::from_be_bytes(data[3..7].try_into().unwrap_or([0; 4]));
        Ok(ColourSpecification::Enumerated(EnumeratedColourspace::from_code(code)?))
    } else {
        Ok(ColourSpecification::Icc(data[3..].to_vec()))
    }
}

fn parse_pclr(data: &[u8]) -> Result<Vec<Vec<u32>>> {
    if data.len() < 3 {
        return Err(J2kError::MalformedCodestream(MalformedCodestream::BadLength));
    }
    let num_entries = u16::from_be_bytes(data[0..2].try_into().unwrap()) as usize;
    let num_columns = data[2] as usize;
    let mut offset = 3 + num_columns; // one bit-depth byte per column
    let bit_depths: Vec<u8> = data[3..3 + num_columns].to_vec();
    let mut rows = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        let mut row = Vec::with_capacity(num_columns);
        for &bpc in &bit_depths {
            let bytes = if (bpc & 0x7F) + 1 > 8 { 2 } else { 1 };
            let value = if bytes == 2 {
                u16::from_be_bytes(data[offset..offset + 2].try_into().unwrap()) as u32
            } else {
                data[offset] as u32
            };
            offset += bytes;
            row.push(value);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_cmap(data: &[u8]) -> Result<Vec<(u16, u8, u8)>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset + 4 <= data.len() {
        let component = u16::from_be_bytes(data[offset..offset + 2].try_into().unwrap());
        let mapping_type = data[offset + 2];
        let palette_column = data[offset + 3];
        entries.push((component, mapping_type, palette_column));
        offset += 4;
    }
    Ok(entries)
}

fn parse_cdef(data: &[u8]) -> Result<Vec<ChannelDefinition>> {
    if data.len() < 2 {
        return Err(J2kError::MalformedCodestream(MalformedCodestream::BadLength));
    }
    let count = u16::from_be_bytes(data[0..2].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    let mut offset = 2;
    for _ in 0..count {
        if offset + 6 > data.len() {
            break;
        }
        out.push(ChannelDefinition {
            channel_index: u16::from_be_bytes(data[offset..offset + 2].try_into().unwrap()),
            channel_type: u16::from_be_bytes(data[offset + 2..offset + 4].try_into().unwrap()),
            association: u16::from_be_bytes(data[offset + 4..offset + 6].try_into().unwrap()),
        });
        offset += 6;
    }
    Ok(out)
}

/// Serialises the structural box set that wraps one codestream: the
/// signature, a minimal `ftyp`, a `jp2h` super-box (ihdr + colr, plus
/// optional bpcc/pclr/cmap/cdef), then `jp2c` holding the caller-supplied
/// codestream bytes verbatim.
pub struct Jp2Writer {
    buffer: Vec<u8>,
}

impl Jp2Writer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_signature(&mut self) {
        self.buffer.extend_from_slice(SIGNATURE_BOX);
    }

    pub fn write_ftyp(&mut self) {
        let mut body = Vec::new();
        body.extend_from_slice(b"jp2 "); // brand
        body.extend_from_slice(&0u32.to_be_bytes()); // minor version
        body.extend_from_slice(b"jp2 "); // one compatible brand
        write_box(&mut self.buffer, BoxType::FTYP, &body);
    }

    pub fn write_jp2h(&mut self, header: &Jp2Header) {
        let mut body = Vec::new();
        write_box(&mut body, BoxType::IHDR, &encode_ihdr(&header.ihdr));
        if let Some(bpcc) = &header.bpcc {
            write_box(&mut body, BoxType::BPCC, bpcc);
        }
        write_box(&mut body, BoxType::COLR, &encode_colr(&header.colr));
        if let Some(palette) = &header.palette {
            write_box(&mut body, BoxType::PCLR, &encode_pclr(palette));
        }
        if let Some(mapping) = &header.component_mapping {
            write_box(&mut body, BoxType::CMAP, &encode_cmap(mapping));
        }
        if !header.cdef.is_empty() {
            write_box(&mut body, BoxType::CDEF, &encode_cdef(&header.cdef));
        }
        write_box(&mut self.buffer, BoxType::JP2H, &body);
    }

    pub fn write_codestream(&mut self, codestream: &[u8]) {
        write_box(&mut self.buffer, BoxType::JP2C, codestream);
    }

    pub fn write_xml(&mut self, xml: &[u8]) {
        write_box(&mut self.buffer, BoxType::XML, xml);
    }

    pub fn write_uuid(&mut self, id: [u8; 16], payload: &[u8]) {
        let mut body = Vec::with_capacity(16 + payload.len());
        body.extend_from_slice(&id);
        body.extend_from_slice(payload);
        write_box(&mut self.buffer, BoxType::UUID, &body);
    }
}

impl Default for Jp2Writer {
    fn default() -> Self {
        Self::new()
    }
}

fn write_box(out: &mut Vec<u8>, box_type: BoxType, body: &[u8]) {
    let length = 8 + body.len() as u32;
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&box_type.0);
    out.extend_from_slice(body);
}

fn encode_ihdr(ihdr: &ImageHeader) -> Vec<u8> {
    let mut body = Vec::with_capacity(14);
    body.extend_from_slice(&ihdr.height.to_be_bytes());
    body.extend_from_slice(&ihdr.width.to_be_bytes());
    body.extend_from_slice(&ihdr.num_components.to_be_bytes());
    let bpc = (ihdr.bit_depth - 1) | if ihdr.signed { 0x80 } else { 0 };
    body.push(bpc);
    body.push(ihdr.compression_type);
    body.push(ihdr.unknown_colourspace as u8);
    body.push(ihdr.intellectual_property as u8);
    body
}

fn encode_colr(colr: &ColourSpecification) -> Vec<u8> {
    let mut body = Vec::new();
    match colr {
        ColourSpecification::Enumerated(space) => {
            body.push(1); // method: enumerated
            body.push(0); // precedence
            body.push(0); // approximation
            body.extend_from_slice(&space.code().to_be_bytes());
        }
        ColourSpecification::Icc(profile) => {
            body.push(2); // method: restricted ICC
            body.push(0);
            body.push(0);
            body.extend_from_slice(profile);
        }
    }
    body
}

fn encode_pclr(palette: &[Vec<u32>]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(palette.len() as u16).to_be_bytes());
    let num_columns = palette.first().map(|row| row.len()).unwrap_or(0);
    body.push(num_columns as u8);
    for _ in 0..num_columns {
        body.push(7); // 8-bit unsigned per column, the common case
    }
    for row in palette {
        for &value in row {
            body.push(value as u8);
        }
    }
    body
}

fn encode_cmap(mapping: &[(u16, u8, u8)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(component, mapping_type, palette_column) in mapping {
        body.extend_from_slice(&component.to_be_bytes());
        body.push(mapping_type);
        body.push(palette_column);
    }
    body
}

fn encode_cdef(cdef: &[ChannelDefinition]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(cdef.len() as u16).to_be_bytes());
    for entry in cdef {
        body.extend_from_slice(&entry.channel_index.to_be_bytes());
        body.extend_from_slice(&entry.channel_type.to_be_bytes());
        body.extend_from_slice(&entry.association.to_be_bytes());
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Jp2Header {
        Jp2Header {
            ihdr: ImageHeader {
                height: 64,
                width: 64,
                num_components: 3,
                bit_depth: 8,
                signed: false,
                compression_type: 7,
                unknown_colourspace: false,
                intellectual_property: false,
            },
            colr: ColourSpecification::Enumerated(EnumeratedColourspace::Srgb),
            bpcc: None,
            palette: None,
            component_mapping: None,
            cdef: Vec::new(),
        }
    }

    #[test]
    fn write_then_read_round_trips_ihdr_and_colr() {
        let mut w = Jp2Writer::new();
        w.write_signature();
        w.write_ftyp();
        w.write_jp2h(&sample_header());
        w.write_codestream(&[0xFF, 0x4F, 0xFF, 0xD9]);
        let bytes = w.into_bytes();

        assert!(Jp2Reader::is_jp2(&bytes));
        let file = Jp2Reader::new(&bytes).parse().unwrap();
        let header = file.header.unwrap();
        assert_eq!(header.ihdr.width, 64);
        assert_eq!(header.ihdr.num_components, 3);
        assert_eq!(
            header.colr,
            ColourSpecification::Enumerated(EnumeratedColourspace::Srgb)
        );
        let codestream_range = file.codestream_range.unwrap();
        assert_eq!(&bytes[codestream_range], &[0xFF, 0x4F, 0xFF, 0xD9]);
    }

    #[test]
    fn find_codestream_locates_jp2c_without_full_parse() {
        let mut w = Jp2Writer::new();
        w.write_signature();
        w.write_ftyp();
        w.write_jp2h(&sample_header());
        w.write_codestream(&[1, 2, 3]);
        let bytes = w.into_bytes();
        let found = Jp2Reader::new(&bytes).find_codestream().unwrap();
        assert_eq!(found, Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn non_jp2_input_is_rejected() {
        let bytes = vec![0xFF, 0x4F, 0xFF, 0xD9];
        assert!(!Jp2Reader::is_jp2(&bytes));
        assert!(Jp2Reader::new(&bytes).parse().is_err());
    }
}

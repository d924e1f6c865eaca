//! Item properties (`iprp`): the `ipco` property list and `ipma` associations

use super::reader::{children, FourCc, RawBox, Reader};
use crate::error::ConvertError;
use crate::transform::HeifTransform;
use std::collections::HashMap;

/// Colour description from an `nclx` colour box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nclx {
    pub colour_primaries: u16,
    pub transfer_characteristics: u16,
    pub matrix_coefficients: u16,
    pub full_range: bool,
}

/// One `uncC` component entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncComponent {
    /// Index into the `cmpd` component list.
    pub index: u16,
    pub bit_depth: u16,
    pub format: u8,
    pub align_size: u8,
}

/// Raw version 0 `uncC` (uncompressed frame configuration) box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncompressedConfig {
    pub version: u8,
    pub components: Vec<UncComponent>,
    pub sampling_type: u8,
    pub interleave_type: u8,
    pub block_size: u8,
    pub pixel_size: u32,
    pub row_align_size: u32,
    pub tile_align_size: u32,
    pub tile_columns: u64,
    pub tile_rows: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Ispe { width: u32, height: u32 },
    Transform(HeifTransform),
    Nclx(Nclx),
    Icc(Vec<u8>),
    HevcConfig,
    Uncompressed(UncompressedConfig),
    ComponentTypes(Vec<u16>),
    /// Parsed only far enough to be recognised; no effect on decoding.
    Descriptive(FourCc),
    Unknown(FourCc),
}

impl Property {
    fn parse(b: &RawBox<'_>) -> Result<Self, ConvertError> {
        let prop = match &b.kind.0 {
            b"ispe" => {
                let mut r = b.reader("ispe");
                r.full_box()?;
                Property::Ispe {
                    width: r.u32()?,
                    height: r.u32()?,
                }
            }
            b"irot" => {
                let mut r = b.reader("irot");
                Property::Transform(HeifTransform::Rotate {
                    quarter_turns_ccw: r.u8()? & 0x03,
                })
            }
            b"imir" => {
                let mut r = b.reader("imir");
                if r.u8()? & 0x01 == 0 {
                    Property::Transform(HeifTransform::MirrorTopBottom)
                } else {
                    Property::Transform(HeifTransform::MirrorLeftRight)
                }
            }
            b"colr" => parse_colr(b)?,
            b"hvcC" => Property::HevcConfig,
            b"uncC" => Property::Uncompressed(parse_uncc(b)?),
            b"cmpd" => {
                let mut r = b.reader("cmpd");
                let count = r.u32()?;
                let mut types = Vec::new();
                for _ in 0..count {
                    let t = r.u16()?;
                    if t >= 0x8000 {
                        r.cstring()?; // component_type_uri
                    }
                    types.push(t);
                }
                Property::ComponentTypes(types)
            }
            b"pixi" | b"pasp" | b"auxC" | b"rloc" | b"lsel" | b"a1op" => Property::Descriptive(b.kind),
            _ => Property::Unknown(b.kind),
        };
        Ok(prop)
    }
}

fn parse_colr(b: &RawBox<'_>) -> Result<Property, ConvertError> {
    let mut r = b.reader("colr");
    let colour_type = r.fourcc()?;
    match &colour_type.0 {
        b"nclx" => {
            let colour_primaries = r.u16()?;
            let transfer_characteristics = r.u16()?;
            let matrix_coefficients = r.u16()?;
            let full_range = r.u8()? & 0x80 != 0;
            Ok(Property::Nclx(Nclx {
                colour_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range,
            }))
        }
        b"prof" | b"rICC" => Ok(Property::Icc(r.rest().to_vec())),
        _ => Ok(Property::Descriptive(colour_type)),
    }
}

fn parse_uncc(b: &RawBox<'_>) -> Result<UncompressedConfig, ConvertError> {
    let mut r: Reader<'_> = b.reader("uncC");
    let (version, _) = r.full_box()?;
    let _profile = r.fourcc()?;
    if version != 0 {
        return Ok(UncompressedConfig {
            version,
            components: Vec::new(),
            sampling_type: 0,
            interleave_type: 0,
            block_size: 0,
            pixel_size: 0,
            row_align_size: 0,
            tile_align_size: 0,
            tile_columns: 1,
            tile_rows: 1,
        });
    }

    let count = r.u32()?;
    let mut components = Vec::new();
    for _ in 0..count {
        components.push(UncComponent {
            index: r.u16()?,
            bit_depth: u16::from(r.u8()?) + 1,
            format: r.u8()?,
            align_size: r.u8()?,
        });
    }
    let sampling_type = r.u8()?;
    let interleave_type = r.u8()?;
    let block_size = r.u8()?;
    let _flags = r.u8()?;
    Ok(UncompressedConfig {
        version,
        components,
        sampling_type,
        interleave_type,
        block_size,
        pixel_size: r.u32()?,
        row_align_size: r.u32()?,
        tile_align_size: r.u32()?,
        tile_columns: u64::from(r.u32()?) + 1,
        tile_rows: u64::from(r.u32()?) + 1,
    })
}

/// Properties of the file plus which items they are associated with.
#[derive(Debug, Default)]
pub struct PropertyTable {
    properties: Vec<Property>,
    associations: HashMap<u32, Vec<(usize, bool)>>,
}

impl PropertyTable {
    pub fn parse(iprp: &RawBox<'_>) -> Result<Self, ConvertError> {
        let mut table = PropertyTable::default();
        let mut saw_ipco = false;

        for child in children(iprp) {
            let child = child?;
            match &child.kind.0 {
                b"ipco" => {
                    saw_ipco = true;
                    for prop in children(&child) {
                        table.properties.push(Property::parse(&prop?)?);
                    }
                }
                b"ipma" => table.parse_ipma(&child)?,
                _ => {}
            }
        }

        if !saw_ipco {
            return Err(ConvertError::MalformedContainer(
                "iprp has no ipco property container".to_string(),
            ));
        }
        Ok(table)
    }

    fn parse_ipma(&mut self, b: &RawBox<'_>) -> Result<(), ConvertError> {
        let mut r = b.reader("ipma");
        let (version, flags) = r.full_box()?;
        let entries = r.u32()?;
        for _ in 0..entries {
            let item_id = r.item_id(version >= 1)?;
            let count = r.u8()?;
            let assoc = self.associations.entry(item_id).or_default();
            for _ in 0..count {
                let (essential, index) = if flags & 1 != 0 {
                    let v = r.u16()?;
                    (v & 0x8000 != 0, usize::from(v & 0x7FFF))
                } else {
                    let v = r.u8()?;
                    (v & 0x80 != 0, usize::from(v & 0x7F))
                };
                // Index 0 means "no property"; the rest are 1-based into ipco.
                if index != 0 {
                    assoc.push((index - 1, essential));
                }
            }
        }
        Ok(())
    }

    /// Properties associated with `item_id`, in association order.
    pub fn for_item(
        &self,
        item_id: u32,
    ) -> Result<Vec<(&Property, bool)>, ConvertError> {
        let Some(assoc) = self.associations.get(&item_id) else {
            return Ok(Vec::new());
        };
        assoc
            .iter()
            .map(|&(index, essential)| {
                self.properties
                    .get(index)
                    .map(|p| (p, essential))
                    .ok_or_else(|| {
                        ConvertError::MalformedContainer(format!(
                            "item {item_id} references property {} but ipco holds {}",
                            index + 1,
                            self.properties.len()
                        ))
                    })
            })
            .collect()
    }
}

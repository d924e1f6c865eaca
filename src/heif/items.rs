//! Item tables inside `meta`: primary item, item info, locations and references

use super::reader::{full_box_children, Boxes, FourCc, RawBox};
use crate::error::ConvertError;
use std::collections::HashMap;
use std::ops::Range;

fn malformed(msg: impl Into<String>) -> ConvertError {
    ConvertError::MalformedContainer(msg.into())
}

pub fn parse_pitm(b: &RawBox<'_>) -> Result<u32, ConvertError> {
    let mut r = b.reader("pitm");
    let (version, _) = r.full_box()?;
    r.item_id(version >= 1)
}

/// `iinf`: item ID to item type.
pub fn parse_iinf(b: &RawBox<'_>) -> Result<HashMap<u32, FourCc>, ConvertError> {
    let mut r = b.reader("iinf");
    let (version, _) = r.full_box()?;
    if version == 0 {
        r.u16()?;
    } else {
        r.u32()?;
    }
    let header = b.payload.len() - r.remaining();
    let entries = Boxes::new(&b.payload[header..], b.offset + header);

    let mut items = HashMap::new();
    for entry in entries {
        let entry = entry?;
        if entry.kind != b"infe" {
            continue;
        }
        let mut r = entry.reader("infe");
        let (infe_version, _) = r.full_box()?;
        if infe_version < 2 {
            // Versions 0 and 1 predate item types and cannot describe coded images.
            continue;
        }
        let id = r.item_id(infe_version >= 3)?;
        let _protection_index = r.u16()?;
        let kind = r.fourcc()?;
        if items.insert(id, kind).is_some() {
            return Err(malformed(format!("item {id} is declared twice in iinf")));
        }
    }
    Ok(items)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub construction_method: u8,
    pub base_offset: u64,
    /// (offset, length) pairs; a zero length means "to the end of the source".
    pub extents: Vec<(u64, u64)>,
}

/// `iloc`: where each item's data lives.
pub fn parse_iloc(b: &RawBox<'_>) -> Result<HashMap<u32, Location>, ConvertError> {
    let mut r = b.reader("iloc");
    let (version, _) = r.full_box()?;
    if version > 2 {
        return Err(ConvertError::UnsupportedVariant(format!(
            "iloc version {version}"
        )));
    }
    let sizes = r.u8()?;
    let (offset_size, length_size) = (sizes >> 4, sizes & 0x0F);
    let sizes = r.u8()?;
    let base_offset_size = sizes >> 4;
    let index_size = if version >= 1 { sizes & 0x0F } else { 0 };
    let item_count = if version < 2 {
        u32::from(r.u16()?)
    } else {
        r.u32()?
    };

    let mut locations = HashMap::new();
    for _ in 0..item_count {
        let id = r.item_id(version >= 2)?;
        let construction_method = if version >= 1 {
            (r.u16()? & 0x000F) as u8
        } else {
            0
        };
        let data_reference_index = r.u16()?;
        if data_reference_index != 0 {
            return Err(ConvertError::UnsupportedVariant(format!(
                "item {id} stores its data in an external file"
            )));
        }
        let base_offset = r.uint(base_offset_size)?;
        let extent_count = r.u16()?;
        let mut extents = Vec::with_capacity(usize::from(extent_count));
        for _ in 0..extent_count {
            r.uint(index_size)?;
            let offset = r.uint(offset_size)?;
            let length = r.uint(length_size)?;
            extents.push((offset, length));
        }
        locations.insert(
            id,
            Location {
                construction_method,
                base_offset,
                extents,
            },
        );
    }
    Ok(locations)
}

impl Location {
    /// Resolve extents to absolute byte ranges within the source.
    ///
    /// `idat` is the absolute range of the `idat` payload, if the file has one.
    pub fn resolve(
        &self,
        item_id: u32,
        source_len: usize,
        idat: Option<&Range<usize>>,
    ) -> Result<Vec<Range<usize>>, ConvertError> {
        let region = match self.construction_method {
            0 => 0..source_len,
            1 => idat
                .cloned()
                .ok_or_else(|| malformed(format!("item {item_id} lives in idat but there is none")))?,
            m => {
                return Err(ConvertError::UnsupportedVariant(format!(
                    "item {item_id} uses iloc construction method {m}"
                )))
            }
        };

        if self.extents.is_empty() {
            return Err(malformed(format!("item {item_id} has no extents")));
        }

        self.extents
            .iter()
            .map(|&(offset, length)| {
                let start = (region.start as u64)
                    .checked_add(self.base_offset)
                    .and_then(|v| v.checked_add(offset));
                let end = match (start, length) {
                    (Some(_), 0) => Some(region.end as u64),
                    (Some(s), len) => s.checked_add(len),
                    (None, _) => None,
                };
                match (start, end) {
                    (Some(s), Some(e)) if s <= e && e <= region.end as u64 => {
                        Ok(s as usize..e as usize)
                    }
                    _ => Err(malformed(format!(
                        "item {item_id} extent (offset {offset}, length {length}) lies outside the {} bytes available",
                        region.end - region.start
                    ))),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: FourCc,
    pub from: u32,
    pub to: Vec<u32>,
}

/// `iref`: typed references between items (`dimg` links a grid to its tiles).
pub fn parse_iref(b: &RawBox<'_>) -> Result<Vec<Reference>, ConvertError> {
    let (version, refs) = full_box_children(b)?;
    let wide = version >= 1;
    let mut out = Vec::new();
    for reference in refs {
        let reference = reference?;
        let mut r = reference.reader("iref entry");
        let from = r.item_id(wide)?;
        let count = r.u16()?;
        let to = (0..count)
            .map(|_| r.item_id(wide))
            .collect::<Result<Vec<_>, _>>()?;
        out.push(Reference {
            kind: reference.kind,
            from,
            to,
        });
    }
    Ok(out)
}

/// Absolute range of the `idat` payload within the source.
pub fn idat_range(b: &RawBox<'_>) -> Range<usize> {
    b.offset..b.offset + b.payload.len()
}

/// Walk `meta` children once, keeping the boxes the parser needs.
#[derive(Default)]
pub struct MetaBoxes<'a> {
    pub hdlr: Option<RawBox<'a>>,
    pub pitm: Option<RawBox<'a>>,
    pub iinf: Option<RawBox<'a>>,
    pub iloc: Option<RawBox<'a>>,
    pub iref: Option<RawBox<'a>>,
    pub iprp: Option<RawBox<'a>>,
    pub idat: Option<RawBox<'a>>,
}

impl<'a> MetaBoxes<'a> {
    pub fn collect(meta: &RawBox<'a>) -> Result<Self, ConvertError> {
        let (_, boxes) = full_box_children(meta)?;
        let mut out = MetaBoxes::default();
        for b in boxes {
            let b = b?;
            let slot = match &b.kind.0 {
                b"hdlr" => &mut out.hdlr,
                b"pitm" => &mut out.pitm,
                b"iinf" => &mut out.iinf,
                b"iloc" => &mut out.iloc,
                b"iref" => &mut out.iref,
                b"iprp" => &mut out.iprp,
                b"idat" => &mut out.idat,
                _ => continue,
            };
            if slot.replace(b).is_some() {
                return Err(malformed(format!("meta holds more than one {} box", b.kind)));
            }
        }
        Ok(out)
    }
}

/// Handler type from `hdlr`; image files use `pict`.
pub fn handler_type(b: &RawBox<'_>) -> Result<FourCc, ConvertError> {
    let mut r = b.reader("hdlr");
    r.full_box()?;
    let _pre_defined = r.u32()?;
    r.fourcc()
}

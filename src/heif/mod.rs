//! HEIF container parser
//!
//! Walks the ISO base media box structure of a HEIC/HEIF file, finds the
//! primary image item and describes where its coded data lives. Pixel data
//! is never copied here: coded payloads are returned as byte ranges into the
//! source.

mod items;
mod properties;
mod reader;

#[cfg(test)]
pub(crate) mod fixture;

pub use properties::Nclx;
pub use reader::FourCc;

use crate::error::ConvertError;
use crate::transform::Orientation;
use items::{Location, MetaBoxes, Reference};
use properties::{Property, PropertyTable, UncompressedConfig};
use reader::{Boxes, RawBox, Reader};
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, instrument};

/// Compression applied to an image item's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingFormat {
    /// `hvc1`: HEVC intra-coded image.
    Hevc,
    /// `unci`: uncompressed samples (ISO/IEC 23001-17).
    Uncompressed,
}

impl CodingFormat {
    pub fn fourcc(self) -> &'static str {
        match self {
            CodingFormat::Hevc => "hvc1",
            CodingFormat::Uncompressed => "unci",
        }
    }

    /// Whether this build carries a decoder for the format.
    pub fn is_supported(self) -> bool {
        match self {
            CodingFormat::Hevc => cfg!(feature = "hevc"),
            CodingFormat::Uncompressed => true,
        }
    }
}

/// Component meaning, from `cmpd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Monochrome,
    Luma,
    BlueDifference,
    RedDifference,
    Red,
    Green,
    Blue,
    Alpha,
}

impl ComponentKind {
    fn from_type(t: u16) -> Option<Self> {
        Some(match t {
            0 => ComponentKind::Monochrome,
            1 => ComponentKind::Luma,
            2 => ComponentKind::BlueDifference,
            3 => ComponentKind::RedDifference,
            4 => ComponentKind::Red,
            5 => ComponentKind::Green,
            6 => ComponentKind::Blue,
            7 => ComponentKind::Alpha,
            _ => return None,
        })
    }
}

/// Chroma sampling of an uncompressed YCbCr item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    Yuv444,
    Yuv422,
    Yuv420,
}

impl Sampling {
    /// Horizontal and vertical chroma decimation factors.
    pub fn factors(self) -> (usize, usize) {
        match self {
            Sampling::Yuv444 => (1, 1),
            Sampling::Yuv422 => (2, 1),
            Sampling::Yuv420 => (2, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interleave {
    /// Each component stored as its own plane.
    Component,
    /// All components of a pixel stored together.
    Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourModel {
    Monochrome,
    YCbCr,
    Rgb,
}

/// Sample layout of an uncompressed item, restricted to what the decoder handles:
/// 8-bit unsigned components, one tile, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncompressedLayout {
    /// Components in storage order.
    pub components: Vec<ComponentKind>,
    pub sampling: Sampling,
    pub interleave: Interleave,
    pub model: ColourModel,
}

impl UncompressedLayout {
    fn resolve(config: &UncompressedConfig, types: &[u16]) -> Result<Self, ConvertError> {
        let unsupported = |what: String| ConvertError::UnsupportedVariant(format!("unci: {what}"));

        if config.version != 0 {
            return Err(unsupported(format!("uncC version {}", config.version)));
        }
        if config.components.is_empty() {
            return Err(ConvertError::MalformedContainer(
                "uncC declares no components".to_string(),
            ));
        }

        let mut components = Vec::with_capacity(config.components.len());
        for c in &config.components {
            if c.bit_depth != 8 || c.format != 0 || c.align_size != 0 {
                return Err(unsupported(format!(
                    "{}-bit components of format {} (only 8-bit unsigned integers)",
                    c.bit_depth, c.format
                )));
            }
            let t = *types.get(usize::from(c.index)).ok_or_else(|| {
                ConvertError::MalformedContainer(format!(
                    "uncC component index {} outside cmpd list of {}",
                    c.index,
                    types.len()
                ))
            })?;
            components.push(
                ComponentKind::from_type(t)
                    .ok_or_else(|| unsupported(format!("component type {t}")))?,
            );
        }

        if config.block_size != 0
            || config.pixel_size != 0
            || config.row_align_size != 0
            || config.tile_align_size != 0
        {
            return Err(unsupported("block, pixel, row or tile padding".to_string()));
        }
        if config.tile_columns != 1 || config.tile_rows != 1 {
            return Err(unsupported("multiple uncompressed tiles".to_string()));
        }

        let sampling = match config.sampling_type {
            0 => Sampling::Yuv444,
            1 => Sampling::Yuv422,
            2 => Sampling::Yuv420,
            other => return Err(unsupported(format!("sampling type {other}"))),
        };
        let interleave = match config.interleave_type {
            0 => Interleave::Component,
            1 => Interleave::Pixel,
            other => return Err(unsupported(format!("interleave type {other}"))),
        };

        let count = |kind| components.iter().filter(|&&k| k == kind).count();
        let colour: Vec<_> = components
            .iter()
            .copied()
            .filter(|&k| k != ComponentKind::Alpha)
            .collect();
        let model = if colour.len() == 1
            && matches!(colour[0], ComponentKind::Monochrome | ComponentKind::Luma)
        {
            ColourModel::Monochrome
        } else if colour.len() == 3
            && count(ComponentKind::Luma) == 1
            && count(ComponentKind::BlueDifference) == 1
            && count(ComponentKind::RedDifference) == 1
        {
            ColourModel::YCbCr
        } else if colour.len() == 3
            && count(ComponentKind::Red) == 1
            && count(ComponentKind::Green) == 1
            && count(ComponentKind::Blue) == 1
        {
            ColourModel::Rgb
        } else {
            return Err(unsupported(format!("component set {components:?}")));
        };

        if sampling != Sampling::Yuv444 {
            if model != ColourModel::YCbCr {
                return Err(unsupported("chroma subsampling without YCbCr".to_string()));
            }
            if interleave == Interleave::Pixel {
                return Err(unsupported("pixel interleave with chroma subsampling".to_string()));
            }
        }

        Ok(Self {
            components,
            sampling,
            interleave,
            model,
        })
    }
}

/// One coded image item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedItem {
    pub item_id: u32,
    pub format: CodingFormat,
    pub width: u32,
    pub height: u32,
    /// Absolute byte ranges of the coded payload within the source.
    pub extents: Vec<Range<usize>>,
    /// Present for [`CodingFormat::Uncompressed`] items.
    pub layout: Option<UncompressedLayout>,
}

impl CodedItem {
    pub fn coded_len(&self) -> usize {
        self.extents.iter().map(|r| r.len()).sum()
    }

    /// The coded payload; borrowed when stored in a single extent.
    pub fn payload<'a>(&self, source: &'a [u8]) -> Cow<'a, [u8]> {
        match self.extents.as_slice() {
            [only] => Cow::Borrowed(&source[only.clone()]),
            many => Cow::Owned(many.iter().flat_map(|r| source[r.clone()].iter().copied()).collect()),
        }
    }
}

/// Tile arrangement of a `grid` derived image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: u32,
    pub columns: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodedImage {
    Single(CodedItem),
    /// Tiles in row-major order.
    Grid { layout: GridLayout, tiles: Vec<CodedItem> },
}

impl CodedImage {
    pub fn format(&self) -> CodingFormat {
        match self {
            CodedImage::Single(item) => item.format,
            CodedImage::Grid { tiles, .. } => tiles[0].format,
        }
    }

    pub fn coded_len(&self) -> usize {
        match self {
            CodedImage::Single(item) => item.coded_len(),
            CodedImage::Grid { tiles, .. } => tiles.iter().map(CodedItem::coded_len).sum(),
        }
    }
}

/// Everything the later stages need to know about the primary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub icc_profile: Option<Vec<u8>>,
    pub nclx: Option<Nclx>,
    pub image: CodedImage,
}

fn malformed(msg: impl Into<String>) -> ConvertError {
    ConvertError::MalformedContainer(msg.into())
}

/// Parsed `meta` tables.
struct Meta {
    items: HashMap<u32, FourCc>,
    locations: HashMap<u32, Location>,
    references: Vec<Reference>,
    properties: PropertyTable,
    idat: Option<Range<usize>>,
    source_len: usize,
}

impl Meta {
    fn kind(&self, id: u32) -> Result<FourCc, ConvertError> {
        self.items
            .get(&id)
            .copied()
            .ok_or_else(|| malformed(format!("item {id} is referenced but not declared in iinf")))
    }

    fn extents(&self, id: u32) -> Result<Vec<Range<usize>>, ConvertError> {
        self.locations
            .get(&id)
            .ok_or_else(|| malformed(format!("item {id} has no iloc entry")))?
            .resolve(id, self.source_len, self.idat.as_ref())
    }

    fn references_from(&self, kind: &[u8; 4], from: u32) -> Vec<u32> {
        self.references
            .iter()
            .filter(|r| r.kind == kind && r.from == from)
            .flat_map(|r| r.to.iter().copied())
            .collect()
    }

    fn properties(&self, id: u32) -> Result<Vec<(&Property, bool)>, ConvertError> {
        let props = self.properties.for_item(id)?;
        if let Some((Property::Unknown(kind), _)) = props.iter().find(|(p, essential)| {
            *essential && matches!(p, Property::Unknown(_))
        }) {
            return Err(ConvertError::UnsupportedVariant(format!(
                "item {id} requires unsupported property {kind}"
            )));
        }
        Ok(props)
    }

    fn spatial_extent(&self, id: u32) -> Result<Option<(u32, u32)>, ConvertError> {
        Ok(self.properties(id)?.iter().find_map(|(p, _)| match p {
            Property::Ispe { width, height } => Some((*width, *height)),
            _ => None,
        }))
    }

    fn coded_item(&self, id: u32) -> Result<CodedItem, ConvertError> {
        let kind = self.kind(id)?;
        let format = match &kind.0 {
            b"hvc1" => CodingFormat::Hevc,
            b"unci" => CodingFormat::Uncompressed,
            _ => {
                return Err(ConvertError::UnsupportedVariant(format!(
                    "coding format '{kind}' of item {id}"
                )))
            }
        };
        if !format.is_supported() {
            return Err(ConvertError::UnsupportedVariant(format!(
                "'{}' decoding is not enabled in this build",
                format.fourcc()
            )));
        }

        let (width, height) = self
            .spatial_extent(id)?
            .ok_or_else(|| malformed(format!("item {id} has no ispe property")))?;
        if width == 0 || height == 0 {
            return Err(malformed(format!("item {id} declares size {width}x{height}")));
        }

        let layout = match format {
            CodingFormat::Uncompressed => {
                let props = self.properties(id)?;
                let config = props
                    .iter()
                    .find_map(|(p, _)| match p {
                        Property::Uncompressed(c) => Some(c),
                        _ => None,
                    })
                    .ok_or_else(|| malformed(format!("unci item {id} has no uncC property")))?;
                let types = props
                    .iter()
                    .find_map(|(p, _)| match p {
                        Property::ComponentTypes(t) => Some(t.as_slice()),
                        _ => None,
                    })
                    .ok_or_else(|| malformed(format!("unci item {id} has no cmpd property")))?;
                Some(UncompressedLayout::resolve(config, types)?)
            }
            CodingFormat::Hevc => None,
        };

        Ok(CodedItem {
            item_id: id,
            format,
            width,
            height,
            extents: self.extents(id)?,
            layout,
        })
    }

    fn grid(&self, id: u32, source: &[u8]) -> Result<(u32, u32, CodedImage), ConvertError> {
        let extents = self.extents(id)?;
        let descriptor: Vec<u8> = extents
            .iter()
            .flat_map(|r| source[r.clone()].iter().copied())
            .collect();
        let mut r = Reader::new(&descriptor, "grid descriptor");
        let _version = r.u8()?;
        let flags = r.u8()?;
        let rows = u32::from(r.u8()?) + 1;
        let columns = u32::from(r.u8()?) + 1;
        let (width, height) = if flags & 1 != 0 {
            (r.u32()?, r.u32()?)
        } else {
            (u32::from(r.u16()?), u32::from(r.u16()?))
        };
        if width == 0 || height == 0 {
            return Err(malformed(format!("grid declares output size {width}x{height}")));
        }

        let tile_ids = self.references_from(b"dimg", id);
        if tile_ids.len() != (rows * columns) as usize {
            return Err(malformed(format!(
                "grid {rows}x{columns} references {} tiles",
                tile_ids.len()
            )));
        }
        let tiles = tile_ids
            .iter()
            .map(|&tile| self.coded_item(tile))
            .collect::<Result<Vec<_>, _>>()?;

        let first = &tiles[0];
        if tiles
            .iter()
            .any(|t| t.format != first.format || (t.width, t.height) != (first.width, first.height))
        {
            return Err(malformed("grid tiles differ in format or size"));
        }
        let (tile_width, tile_height) = (first.width, first.height);
        if u64::from(tile_width) * u64::from(columns) < u64::from(width)
            || u64::from(tile_height) * u64::from(rows) < u64::from(height)
        {
            return Err(malformed(format!(
                "{rows}x{columns} tiles of {tile_width}x{tile_height} cannot cover {width}x{height}"
            )));
        }

        let layout = GridLayout {
            rows,
            columns,
            tile_width,
            tile_height,
        };
        Ok((width, height, CodedImage::Grid { layout, tiles }))
    }
}

/// Parse a HEIC/HEIF byte stream and describe its primary image.
#[instrument(skip_all, fields(len = data.len()))]
pub fn parse(data: &[u8]) -> Result<ContainerMetadata, ConvertError> {
    let mut top = Boxes::new(data, 0);
    let ftyp = top
        .next()
        .transpose()?
        .ok_or_else(|| malformed("empty container"))?;
    if ftyp.kind != b"ftyp" {
        return Err(malformed(format!(
            "first box is {}, expected ftyp",
            ftyp.kind
        )));
    }

    let mut meta_box = None;
    for b in top {
        let b = b?;
        if b.kind == b"meta" && meta_box.replace(b).is_some() {
            return Err(malformed("more than one top-level meta box"));
        }
    }
    let meta_box = meta_box.ok_or_else(|| malformed("no meta box"))?;
    let boxes = MetaBoxes::collect(&meta_box)?;

    let hdlr = boxes.hdlr.ok_or_else(|| malformed("meta has no hdlr box"))?;
    let handler = items::handler_type(&hdlr)?;
    if handler != b"pict" {
        return Err(ConvertError::UnsupportedVariant(format!(
            "meta handler '{handler}' is not an image handler"
        )));
    }

    fn required<'a>(b: Option<RawBox<'a>>, name: &str) -> Result<RawBox<'a>, ConvertError> {
        b.ok_or_else(|| malformed(format!("meta has no {name} box")))
    }
    let primary = items::parse_pitm(&required(boxes.pitm, "pitm")?)?;
    let meta = Meta {
        items: items::parse_iinf(&required(boxes.iinf, "iinf")?)?,
        locations: items::parse_iloc(&required(boxes.iloc, "iloc")?)?,
        references: match boxes.iref {
            Some(b) => items::parse_iref(&b)?,
            None => Vec::new(),
        },
        properties: PropertyTable::parse(&required(boxes.iprp, "iprp")?)?,
        idat: boxes.idat.as_ref().map(items::idat_range),
        source_len: data.len(),
    };

    let primary_kind = meta.kind(primary)?;
    let (width, height, image) = if primary_kind == b"grid" {
        meta.grid(primary, data)?
    } else {
        let item = meta.coded_item(primary)?;
        (item.width, item.height, CodedImage::Single(item))
    };

    let primary_props = meta.properties(primary)?;
    let transforms: Vec<_> = primary_props
        .iter()
        .filter_map(|(p, _)| match p {
            Property::Transform(t) => Some(*t),
            _ => None,
        })
        .collect();
    let orientation = Orientation::from_heif_transforms(&transforms);

    // Colour information may sit on the grid item or only on its tiles.
    let mut colour_sources = vec![primary];
    if let CodedImage::Grid { tiles, .. } = &image {
        colour_sources.push(tiles[0].item_id);
    }
    let mut icc_profile = None;
    let mut nclx = None;
    for id in colour_sources {
        for (p, _) in meta.properties(id)? {
            match p {
                Property::Icc(icc) if icc_profile.is_none() => icc_profile = Some(icc.clone()),
                Property::Nclx(n) if nclx.is_none() => nclx = Some(*n),
                _ => {}
            }
        }
    }

    debug!(
        width,
        height,
        format = image.format().fourcc(),
        orientation = orientation.exif(),
        coded_len = image.coded_len(),
        "Parsed container"
    );

    Ok(ContainerMetadata {
        width,
        height,
        orientation,
        icc_profile,
        nclx,
        image,
    })
}

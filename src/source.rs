//! Source asset and content-signature validation
//!
//! The file name a client uploads under is never consulted: an asset is
//! accepted only if its first box is an `ftyp` carrying a HEIF-family brand.

use crate::error::ConvertError;
use bytes::Bytes;

/// Brands that identify HEVC-coded HEIF images.
const HEIC_BRANDS: [&[u8; 4]; 6] = [b"heic", b"heix", b"heim", b"heis", b"hevc", b"hevx"];

/// Brands that identify generic HEIF still images or sequences.
const HEIF_BRANDS: [&[u8; 4]; 4] = [b"mif1", b"mif2", b"mif3", b"msf1"];

/// Declared media type of a source asset, derived from its ftyp brands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Heic,
    Heif,
}

impl MediaType {
    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Heic => "image/heic",
            MediaType::Heif => "image/heif",
        }
    }
}

/// Immutable HEIC/HEIF bytes owned by one conversion.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    bytes: Bytes,
    media_type: MediaType,
}

impl SourceAsset {
    /// Validate `bytes` by content signature and wrap them.
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, ConvertError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ConvertError::InvalidInput("empty input".to_string()));
        }
        let media_type = sniff(&bytes)?;
        Ok(Self { bytes, media_type })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }
}

/// Classify the brand set found where the leading `ftyp` box keeps it.
///
/// Only the brands are checked here. A damaged box header with an intact
/// major brand passes and is rejected later by the container parser.
pub fn sniff(data: &[u8]) -> Result<MediaType, ConvertError> {
    if data.len() < 12 {
        return Err(ConvertError::InvalidInput(
            "not a HEIC/HEIF file (too short for an ftyp box)".to_string(),
        ));
    }

    let major = &data[8..12];
    let compatible: &[u8] = if &data[4..8] == b"ftyp" && data.len() >= 16 {
        let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        // major_brand, minor_version, then compatible brands to the end of the box
        &data[16..declared.clamp(16, data.len())]
    } else {
        &[]
    };
    let brands = std::iter::once(major).chain(compatible.chunks_exact(4));

    let mut media_type = None;
    for brand in brands {
        if HEIC_BRANDS.iter().any(|b| &b[..] == brand) {
            return Ok(MediaType::Heic);
        }
        if HEIF_BRANDS.iter().any(|b| &b[..] == brand) {
            media_type = Some(MediaType::Heif);
        }
    }

    media_type.ok_or_else(|| {
        ConvertError::InvalidInput(format!(
            "not a HEIC/HEIF file (brand '{}')",
            String::from_utf8_lossy(major)
        ))
    })
}

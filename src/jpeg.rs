//! JPEG encoding through libjpeg-turbo
//!
//! An ICC profile, when present, is spliced in as `ICC_PROFILE` APP2 segments
//! right after the JFIF header.

use crate::config::ChromaSubsampling;
use crate::error::ConvertError;
use crate::raster::RasterBuffer;
use tracing::{debug, instrument};
use turbojpeg::{Compressor, Image, PixelFormat, Subsamp};

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP2: u8 = 0xE2;
const ICC_SIGNATURE: &[u8; 12] = b"ICC_PROFILE\0";
/// Largest segment payload; the length field counts its own two bytes.
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;
/// ICC bytes per APP2 segment after the signature and sequence fields.
pub const ICC_CHUNK: usize = MAX_SEGMENT_PAYLOAD - ICC_SIGNATURE.len() - 2;

fn encode_failure(e: turbojpeg::Error) -> ConvertError {
    ConvertError::EncodeFailure(e.to_string())
}

fn subsamp(chroma: ChromaSubsampling) -> Subsamp {
    match chroma {
        ChromaSubsampling::Cs420 => Subsamp::Sub2x2,
        ChromaSubsampling::Cs422 => Subsamp::Sub2x1,
        ChromaSubsampling::Cs444 => Subsamp::None,
    }
}

/// Encode `raster` as a baseline JPEG.
#[instrument(skip(raster, icc_profile), fields(width = raster.width(), height = raster.height()))]
pub fn encode(
    raster: &RasterBuffer,
    quality: u8,
    chroma: ChromaSubsampling,
    icc_profile: Option<&[u8]>,
) -> Result<Vec<u8>, ConvertError> {
    let (width, height) = (raster.width(), raster.height());
    if width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
        return Err(ConvertError::EncodeFailure(format!(
            "{width}x{height} exceeds the 65535 pixel JPEG frame limit"
        )));
    }

    let mut compressor = Compressor::new().map_err(encode_failure)?;
    compressor
        .set_quality(i32::from(quality))
        .map_err(encode_failure)?;
    compressor.set_subsamp(subsamp(chroma)).map_err(encode_failure)?;

    let image = Image {
        pixels: raster.data(),
        width: width as usize,
        pitch: raster.row_bytes(),
        height: height as usize,
        format: PixelFormat::RGB,
    };
    let mut jpeg = compressor.compress_to_vec(image).map_err(encode_failure)?;
    if let Some(profile) = icc_profile.filter(|p| !p.is_empty()) {
        jpeg = embed_icc(&jpeg, profile)?;
    }

    debug!(quality, ?chroma, bytes = jpeg.len(), "Encoded JPEG");
    Ok(jpeg)
}

/// Copy `jpeg` with `profile` inserted as APP2 chunks after SOI and any JFIF APP0.
fn embed_icc(jpeg: &[u8], profile: &[u8]) -> Result<Vec<u8>, ConvertError> {
    let count = u8::try_from(profile.len().div_ceil(ICC_CHUNK)).map_err(|_| {
        ConvertError::EncodeFailure(format!(
            "ICC profile of {} bytes needs more than 255 APP2 segments",
            profile.len()
        ))
    })?;
    let at = header_end(jpeg)?;

    let overhead = usize::from(count) * (4 + ICC_SIGNATURE.len() + 2);
    let mut out = Vec::with_capacity(jpeg.len() + profile.len() + overhead);
    out.extend_from_slice(&jpeg[..at]);
    for (index, chunk) in profile.chunks(ICC_CHUNK).enumerate() {
        let length = (2 + ICC_SIGNATURE.len() + 2 + chunk.len()) as u16;
        out.extend_from_slice(&[0xFF, APP2]);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(ICC_SIGNATURE);
        out.push(index as u8 + 1);
        out.push(count);
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&jpeg[at..]);
    Ok(out)
}

/// Offset just past SOI and a leading APP0 segment.
fn header_end(jpeg: &[u8]) -> Result<usize, ConvertError> {
    if !jpeg.starts_with(&SOI) {
        return Err(ConvertError::EncodeFailure(
            "encoder output does not start with SOI".to_string(),
        ));
    }
    match jpeg.get(2..6) {
        Some(&[0xFF, APP0, hi, lo]) => {
            let end = 4 + usize::from(u16::from_be_bytes([hi, lo]));
            if end > jpeg.len() {
                return Err(ConvertError::EncodeFailure(
                    "encoder output has a truncated APP0 segment".to_string(),
                ));
            }
            Ok(end)
        }
        _ => Ok(SOI.len()),
    }
}

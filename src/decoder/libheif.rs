//! HEVC decoding through libheif

use crate::error::{ConvertError, DecodeErrorCode};
use crate::raster::{RasterBuffer, CHANNELS};
use libheif_rs::{
    ColorSpace, DecodingOptions, HeifContext, HeifError, HeifErrorSubCode, LibHeif, RgbChroma,
};
use std::sync::LazyLock;

static LIB_HEIF: LazyLock<LibHeif> = LazyLock::new(LibHeif::new);

fn decode_failure(e: HeifError) -> ConvertError {
    let code = match e.sub_code {
        HeifErrorSubCode::EndOfData => DecodeErrorCode::Truncated,
        _ => DecodeErrorCode::InvalidSyntax,
    };
    ConvertError::DecodeFailure {
        code,
        detail: e.message,
    }
}

/// Decode the primary image (single item or grid) to RGB as stored, without
/// applying `irot`/`imir`; orientation is handled by the transform stage.
pub fn decode_primary(source: &[u8]) -> Result<RasterBuffer, ConvertError> {
    let ctx = HeifContext::read_from_bytes(source).map_err(decode_failure)?;
    let handle = ctx.primary_image_handle().map_err(decode_failure)?;

    let mut options = DecodingOptions::new()
        .ok_or_else(|| ConvertError::Internal("libheif decoding options unavailable".to_string()))?;
    options.set_ignore_transformations(true);

    let image = LIB_HEIF
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), Some(options))
        .map_err(decode_failure)?;

    let planes = image.planes();
    let interleaved = planes
        .interleaved
        .ok_or_else(|| ConvertError::invalid_syntax("libheif returned no interleaved RGB plane"))?;

    let (width, height) = (interleaved.width, interleaved.height);
    let row_len = width as usize * CHANNELS;
    let mut rgb = Vec::with_capacity(row_len * height as usize);
    for row in interleaved.data.chunks(interleaved.stride).take(height as usize) {
        rgb.extend_from_slice(&row[..row_len]);
    }

    RasterBuffer::from_rgb(width, height, rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libheif_rs::HeifErrorCode;

    // Written by libheif 1.15 + x265: left half red, right half blue.
    const SPLIT: &[u8] = include_bytes!("../../tests/fixtures/split-64x32.heic");
    const ROTATED: &[u8] = include_bytes!("../../tests/fixtures/split-64x32-orientation6.heic");

    fn is_red(px: [u8; 3]) -> bool {
        px[0] > 180 && px[2] < 70
    }

    fn is_blue(px: [u8; 3]) -> bool {
        px[2] > 180 && px[0] < 70
    }

    #[test]
    fn decodes_rows_without_stride_padding() {
        let raster = decode_primary(SPLIT).unwrap();
        assert_eq!((raster.width(), raster.height()), (64, 32));
        assert_eq!(raster.data().len(), 64 * 32 * CHANNELS);
        for y in [0, 15, 31] {
            assert!(is_red(raster.pixel(2, y)), "row {y}: {:?}", raster.pixel(2, y));
            assert!(is_blue(raster.pixel(61, y)), "row {y}: {:?}", raster.pixel(61, y));
        }
    }

    #[test]
    fn leaves_orientation_to_the_transform_stage() {
        // libheif would rotate this one to 32x64 on its own.
        let raster = decode_primary(ROTATED).unwrap();
        assert_eq!((raster.width(), raster.height()), (64, 32));
        assert!(is_red(raster.pixel(2, 16)));
        assert!(is_blue(raster.pixel(61, 16)));
    }

    #[test]
    fn end_of_data_is_truncation() {
        let err = decode_failure(HeifError {
            code: HeifErrorCode::InvalidInput,
            sub_code: HeifErrorSubCode::EndOfData,
            message: "unexpected end of data".to_string(),
        });
        assert!(matches!(
            err,
            ConvertError::DecodeFailure {
                code: DecodeErrorCode::Truncated,
                ..
            }
        ));

        let err = decode_failure(HeifError {
            code: HeifErrorCode::InvalidInput,
            sub_code: HeifErrorSubCode::NoFtypBox,
            message: "no ftyp".to_string(),
        });
        assert!(matches!(
            err,
            ConvertError::DecodeFailure {
                code: DecodeErrorCode::InvalidSyntax,
                ..
            }
        ));
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        assert!(matches!(
            decode_primary(b"definitely not a heif file"),
            Err(ConvertError::DecodeFailure { .. })
        ));
    }
}

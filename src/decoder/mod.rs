//! Image decoder: coded payloads to an RGB raster at the container's resolution

mod color;
#[cfg(feature = "hevc")]
mod libheif;
mod uncompressed;

pub use color::YCbCrMatrix;

use crate::error::ConvertError;
use crate::heif::{CodedImage, CodedItem, CodingFormat, ContainerMetadata, GridLayout};
use crate::raster::{RasterBuffer, CHANNELS};
use rayon::prelude::*;
use tracing::{debug, instrument};

/// Decode the primary image described by `meta` from `source`.
#[instrument(skip_all, fields(width = meta.width, height = meta.height))]
pub fn decode(source: &[u8], meta: &ContainerMetadata) -> Result<RasterBuffer, ConvertError> {
    let matrix = YCbCrMatrix::from_nclx(meta.nclx.as_ref());

    let raster = match (&meta.image, meta.image.format()) {
        (_, CodingFormat::Hevc) => decode_hevc(source, meta)?,
        (CodedImage::Single(item), CodingFormat::Uncompressed) => {
            decode_item(source, item, &matrix)?
        }
        (CodedImage::Grid { layout, tiles }, CodingFormat::Uncompressed) => {
            decode_grid(source, meta.width, meta.height, layout, tiles, &matrix)?
        }
    };

    if (raster.width(), raster.height()) != (meta.width, meta.height) {
        return Err(ConvertError::invalid_syntax(format!(
            "decoded {}x{} but the container declares {}x{}",
            raster.width(),
            raster.height(),
            meta.width,
            meta.height
        )));
    }
    Ok(raster)
}

#[cfg(feature = "hevc")]
fn decode_hevc(source: &[u8], meta: &ContainerMetadata) -> Result<RasterBuffer, ConvertError> {
    libheif::decode_primary(source)
        .inspect(|_| debug!(coded_len = meta.image.coded_len(), "Decoded HEVC image"))
}

#[cfg(not(feature = "hevc"))]
fn decode_hevc(_source: &[u8], _meta: &ContainerMetadata) -> Result<RasterBuffer, ConvertError> {
    Err(ConvertError::UnsupportedVariant(
        "'hvc1' decoding is not enabled in this build".to_string(),
    ))
}

fn decode_item(
    source: &[u8],
    item: &CodedItem,
    matrix: &YCbCrMatrix,
) -> Result<RasterBuffer, ConvertError> {
    let layout = item.layout.as_ref().ok_or_else(|| {
        ConvertError::Internal(format!("unci item {} has no sample layout", item.item_id))
    })?;
    uncompressed::decode(&item.payload(source), item.width, item.height, layout, matrix)
}

/// Decode every tile (in parallel) and stitch them, clipping edge tiles to the output size.
fn decode_grid(
    source: &[u8],
    width: u32,
    height: u32,
    grid: &GridLayout,
    tiles: &[CodedItem],
    matrix: &YCbCrMatrix,
) -> Result<RasterBuffer, ConvertError> {
    let decoded = tiles
        .par_iter()
        .map(|tile| decode_item(source, tile, matrix))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        tiles = decoded.len(),
        rows = grid.rows,
        columns = grid.columns,
        "Decoded grid tiles"
    );

    let mut output = RasterBuffer::new(width, height)?;
    let out_stride = output.row_bytes();
    for (index, tile) in decoded.iter().enumerate() {
        let row = index as u32 / grid.columns;
        let col = index as u32 % grid.columns;
        let dst_x = col * grid.tile_width;
        let dst_y = row * grid.tile_height;

        let copy_w = tile.width().min(width.saturating_sub(dst_x)) as usize;
        let copy_h = tile.height().min(height.saturating_sub(dst_y));
        if copy_w == 0 || copy_h == 0 {
            continue;
        }

        let out = output.data_mut();
        for y in 0..copy_h {
            let src = &tile.row(y)[..copy_w * CHANNELS];
            let start = (dst_y + y) as usize * out_stride + dst_x as usize * CHANNELS;
            out[start..start + copy_w * CHANNELS].copy_from_slice(src);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeErrorCode;
    use crate::heif::fixture::{Builder, Pixels};
    use crate::heif::parse;

    #[test]
    fn decodes_single_item() {
        let file = Builder::single(Pixels::solid(5, 4, [10, 20, 30])).build();
        let meta = parse(&file).unwrap();
        let raster = decode(&file, &meta).unwrap();
        assert_eq!((raster.width(), raster.height()), (5, 4));
        assert!(raster.data().chunks_exact(3).all(|p| p == [10, 20, 30]));
    }

    #[test]
    fn stitches_grid_and_clips_edges() {
        let colours = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]];
        let tiles = colours.iter().map(|&c| Pixels::solid(4, 4, c)).collect();
        let file = Builder::grid(2, 2, 6, 7, tiles).build();
        let meta = parse(&file).unwrap();
        let raster = decode(&file, &meta).unwrap();

        assert_eq!((raster.width(), raster.height()), (6, 7));
        assert_eq!(raster.pixel(0, 0), colours[0]);
        assert_eq!(raster.pixel(3, 3), colours[0]);
        assert_eq!(raster.pixel(4, 0), colours[1]);
        assert_eq!(raster.pixel(5, 3), colours[1]);
        assert_eq!(raster.pixel(0, 4), colours[2]);
        assert_eq!(raster.pixel(5, 6), colours[3]);
    }

    #[test]
    fn decodes_planar_ycbcr_420() {
        let (w, h) = (4u32, 4u32);
        let file = Builder::single(Pixels::YCbCr {
            width: w,
            height: h,
            sampling: 2,
            y: vec![128; 16],
            cb: vec![128; 4],
            cr: vec![128; 4],
        })
        .build();
        let meta = parse(&file).unwrap();
        let raster = decode(&file, &meta).unwrap();
        assert!(raster.data().iter().all(|&v| v == 128));
    }

    #[test]
    fn corrupt_payload_reports_decode_failure() {
        // Luma plane one byte short of what 4:2:0 at 4x4 needs
        let file = Builder::single(Pixels::YCbCr {
            width: 4,
            height: 4,
            sampling: 2,
            y: vec![0; 15],
            cb: vec![128; 4],
            cr: vec![128; 4],
        })
        .build();
        let meta = parse(&file).unwrap();
        assert!(matches!(
            decode(&file, &meta),
            Err(ConvertError::DecodeFailure {
                code: DecodeErrorCode::Truncated,
                ..
            })
        ));
    }
}

//! Pixel transform stage: orientation correction followed by optional downscale

use crate::error::ConvertError;
use crate::raster::RasterBuffer;
use fast_image_resize as fr;
use image::imageops;
use tracing::debug;

/// EXIF orientation: the rotation/mirroring that displays the decoded raster upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    #[default]
    Identity = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90Cw = 6,
    Transverse = 7,
    Rotate90Ccw = 8,
}

/// A HEIF transformative property, in association order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeifTransform {
    /// `irot`: anticlockwise rotation in quarter turns.
    Rotate { quarter_turns_ccw: u8 },
    /// `imir` axis 1: left and right swap. Matches libheif and the EXIF writers built on it.
    MirrorLeftRight,
    /// `imir` axis 0: top and bottom swap.
    MirrorTopBottom,
}

impl Orientation {
    pub fn from_exif(value: u16) -> Option<Self> {
        Some(match value {
            1 => Orientation::Identity,
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90Cw,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate90Ccw,
            _ => return None,
        })
    }

    pub fn exif(self) -> u16 {
        self as u16
    }

    /// True when the corrected image has width and height exchanged.
    pub fn swaps_dimensions(self) -> bool {
        self.quarter_turns_cw() % 2 == 1
    }

    /// Oriented output size for a `width` x `height` source.
    pub fn apply_to_size(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    // Every orientation is a horizontal flip (optional) followed by clockwise quarter turns.
    fn flipped(self) -> bool {
        matches!(
            self,
            Orientation::FlipHorizontal
                | Orientation::FlipVertical
                | Orientation::Transpose
                | Orientation::Transverse
        )
    }

    fn quarter_turns_cw(self) -> u8 {
        match self {
            Orientation::Identity | Orientation::FlipHorizontal => 0,
            Orientation::Rotate90Cw | Orientation::Transverse => 1,
            Orientation::Rotate180 | Orientation::FlipVertical => 2,
            Orientation::Rotate90Ccw | Orientation::Transpose => 3,
        }
    }

    fn from_parts(flipped: bool, turns_cw: u8) -> Self {
        match (flipped, turns_cw % 4) {
            (false, 0) => Orientation::Identity,
            (false, 1) => Orientation::Rotate90Cw,
            (false, 2) => Orientation::Rotate180,
            (false, _) => Orientation::Rotate90Ccw,
            (true, 0) => Orientation::FlipHorizontal,
            (true, 1) => Orientation::Transverse,
            (true, 2) => Orientation::FlipVertical,
            (true, _) => Orientation::Transpose,
        }
    }

    /// Orientation equivalent to applying `self` and then `next`.
    pub fn then(self, next: HeifTransform) -> Self {
        let (f, r) = (self.flipped(), self.quarter_turns_cw());
        match next {
            HeifTransform::Rotate { quarter_turns_ccw } => {
                Self::from_parts(f, r + (4 - quarter_turns_ccw % 4))
            }
            HeifTransform::MirrorLeftRight => Self::from_parts(!f, (4 - r) % 4),
            HeifTransform::MirrorTopBottom => Self::from_parts(!f, (6 - r) % 4),
        }
    }

    /// Fold HEIF transformative properties into one orientation.
    pub fn from_heif_transforms(transforms: &[HeifTransform]) -> Self {
        transforms
            .iter()
            .fold(Orientation::Identity, |acc, &t| acc.then(t))
    }
}

/// Largest size that fits inside `max_dimension` on both axes, keeping aspect ratio.
/// Never upscales.
pub fn fit_within(width: u32, height: u32, max_dimension: Option<u32>) -> (u32, u32) {
    let Some(max) = max_dimension else {
        return (width, height);
    };
    if width <= max && height <= max {
        return (width, height);
    }
    let (w, h, m) = (u64::from(width), u64::from(height), u64::from(max.max(1)));
    if w >= h {
        (max.max(1), ((h * m + w / 2) / w).max(1) as u32)
    } else {
        (((w * m + h / 2) / h).max(1) as u32, max.max(1))
    }
}

/// Apply `orientation`, then downscale to fit `max_dimension`.
pub fn transform(
    raster: RasterBuffer,
    orientation: Orientation,
    max_dimension: Option<u32>,
) -> Result<RasterBuffer, ConvertError> {
    let oriented = orient(raster, orientation)?;
    let (w, h) = fit_within(oriented.width(), oriented.height(), max_dimension);
    if (w, h) == (oriented.width(), oriented.height()) {
        return Ok(oriented);
    }
    debug!(
        from_width = oriented.width(),
        from_height = oriented.height(),
        to_width = w,
        to_height = h,
        "Downscaling"
    );
    downscale(oriented, w, h)
}

/// Rotate/mirror a raster so it displays upright.
pub fn orient(raster: RasterBuffer, orientation: Orientation) -> Result<RasterBuffer, ConvertError> {
    if orientation == Orientation::Identity {
        return Ok(raster);
    }

    let img = raster.into_image()?;
    let upright = match orientation {
        Orientation::Identity => img,
        Orientation::FlipHorizontal => imageops::flip_horizontal(&img),
        Orientation::Rotate180 => imageops::rotate180(&img),
        Orientation::FlipVertical => imageops::flip_vertical(&img),
        Orientation::Transpose => imageops::flip_horizontal(&imageops::rotate90(&img)),
        Orientation::Rotate90Cw => imageops::rotate90(&img),
        Orientation::Transverse => imageops::flip_horizontal(&imageops::rotate270(&img)),
        Orientation::Rotate90Ccw => imageops::rotate270(&img),
    };
    RasterBuffer::from_image(upright)
}

fn resize_failure(e: impl std::fmt::Display) -> ConvertError {
    ConvertError::Internal(format!("resize failed: {e}"))
}

/// Area-averaging downscale (box convolution).
pub fn downscale(raster: RasterBuffer, width: u32, height: u32) -> Result<RasterBuffer, ConvertError> {
    let (src_width, src_height) = (raster.width(), raster.height());
    if width > src_width || height > src_height {
        return Err(ConvertError::Internal(format!(
            "refusing to upscale {src_width}x{src_height} to {width}x{height}"
        )));
    }

    let src = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        raster.into_vec(),
        fr::PixelType::U8x3,
    )
    .map_err(resize_failure)?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Box));
    resizer
        .resize(&src, &mut dst, Some(&options))
        .map_err(resize_failure)?;

    RasterBuffer::from_rgb(width, height, dst.into_vec())
}

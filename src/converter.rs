//! Core HEIC to JPEG conversion engine
//!
//! Each pipeline stage is a plain function so the job runner can check for
//! cancellation between them; [`convert`] chains them for blocking callers.

use crate::config::{ConversionOptions, Limits};
use crate::decoder;
use crate::error::ConvertError;
use crate::heif::{self, ContainerMetadata};
use crate::jpeg;
use crate::raster::RasterBuffer;
use crate::source::SourceAsset;
use crate::transform;
use bytes::Bytes;
use std::time::Instant;
use tracing::{debug, instrument};

/// A finished JPEG stream. Always starts with SOI and ends with EOI.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    bytes: Bytes,
    width: u32,
    height: u32,
}

impl EncodedOutput {
    fn new(bytes: Vec<u8>, width: u32, height: u32) -> Result<Self, ConvertError> {
        let framed = bytes.len() >= 4
            && bytes.starts_with(&[0xFF, 0xD8])
            && bytes.ends_with(&[0xFF, 0xD9]);
        if !framed {
            return Err(ConvertError::EncodeFailure(
                "encoder produced an unframed stream".to_string(),
            ));
        }
        Ok(Self {
            bytes: Bytes::from(bytes),
            width,
            height,
        })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl std::fmt::Debug for EncodedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedOutput")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Parse the container and apply the resolution guard.
#[instrument(skip_all, fields(size = source.len()))]
pub fn parse(source: &SourceAsset, limits: &Limits) -> Result<ContainerMetadata, ConvertError> {
    let started = Instant::now();
    let meta = heif::parse(source.bytes())?;
    if meta.width > limits.max_resolution || meta.height > limits.max_resolution {
        return Err(ConvertError::ImageTooLarge {
            width: meta.width,
            height: meta.height,
            max: limits.max_resolution,
        });
    }
    debug!(elapsed = ?started.elapsed(), "Parsed container");
    Ok(meta)
}

pub fn decode(source: &SourceAsset, meta: &ContainerMetadata) -> Result<RasterBuffer, ConvertError> {
    let started = Instant::now();
    let raster = decoder::decode(source.bytes(), meta)?;
    debug!(elapsed = ?started.elapsed(), "Decoded image");
    Ok(raster)
}

pub fn transform(
    raster: RasterBuffer,
    meta: &ContainerMetadata,
    options: &ConversionOptions,
) -> Result<RasterBuffer, ConvertError> {
    let started = Instant::now();
    let raster = transform::transform(raster, meta.orientation, options.max_dimension)?;
    debug!(elapsed = ?started.elapsed(), "Transformed raster");
    Ok(raster)
}

pub fn encode(
    raster: &RasterBuffer,
    meta: &ContainerMetadata,
    options: &ConversionOptions,
) -> Result<EncodedOutput, ConvertError> {
    let started = Instant::now();
    let bytes = jpeg::encode(
        raster,
        options.quality,
        options.chroma,
        meta.icc_profile.as_deref(),
    )?;
    debug!(elapsed = ?started.elapsed(), "Encoded output");
    EncodedOutput::new(bytes, raster.width(), raster.height())
}

/// Convert HEIC/HEIF bytes to a JPEG on the calling thread.
pub fn convert(
    input: impl Into<Bytes>,
    options: &ConversionOptions,
    limits: &Limits,
) -> Result<EncodedOutput, ConvertError> {
    options.validate()?;
    let source = SourceAsset::new(input)?;
    if source.len() > limits.max_file_size {
        return Err(ConvertError::FileTooLarge {
            size: source.len(),
            max: limits.max_file_size,
        });
    }

    let meta = parse(&source, limits)?;
    let raster = decode(&source, &meta)?;
    let raster = transform(raster, &meta, options)?;
    encode(&raster, &meta, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChromaSubsampling;
    use crate::heif::fixture::{Builder, Pixels};
    use image::ImageFormat;

    fn decode_jpeg(output: &EncodedOutput) -> image::RgbImage {
        image::load_from_memory_with_format(output.bytes(), ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8()
    }

    fn options() -> ConversionOptions {
        ConversionOptions::default()
    }

    #[test]
    fn converts_to_framed_jpeg_at_container_size() {
        let file = Builder::single(Pixels::solid(40, 24, [30, 120, 200])).build();
        let output = convert(file, &options(), &Limits::default()).unwrap();
        assert!(output.bytes().starts_with(&[0xFF, 0xD8]));
        assert!(output.bytes().ends_with(&[0xFF, 0xD9]));
        let img = decode_jpeg(&output);
        assert_eq!(img.dimensions(), (40, 24));
        let [r, g, b] = img.get_pixel(20, 12).0;
        assert!(r.abs_diff(30) <= 6 && g.abs_diff(120) <= 6 && b.abs_diff(200) <= 6);
    }

    #[test]
    fn rotate_90_cw_swaps_dimensions() {
        // irot 3 (270° anticlockwise) is EXIF orientation 6
        let file = Builder::single(Pixels::solid(40, 24, [90, 90, 90]))
            .rotate_ccw(3)
            .build();
        let output = convert(file, &options(), &Limits::default()).unwrap();
        assert_eq!(decode_jpeg(&output).dimensions(), (24, 40));
    }

    const RED: [u8; 3] = [220, 30, 30];
    const BLUE: [u8; 3] = [30, 30, 220];

    /// Red where `is_red(x, y)`, blue elsewhere.
    fn two_tone(width: u32, height: u32, is_red: impl Fn(u32, u32) -> bool) -> Pixels {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .flat_map(|(x, y)| if is_red(x, y) { RED } else { BLUE })
            .collect();
        Pixels::Rgb { width, height, data }
    }

    fn assert_colour(img: &image::RgbImage, x: u32, y: u32, expected: [u8; 3]) {
        let got = img.get_pixel(x, y).0;
        assert!(
            got.iter().zip(expected).all(|(&g, e)| g.abs_diff(e) <= 24),
            "pixel ({x}, {y}) is {got:?}, expected about {expected:?}"
        );
    }

    #[test]
    fn mirror_axis_one_swaps_left_and_right() {
        let file = Builder::single(two_tone(32, 16, |x, _| x < 16)).mirror(1).build();
        let img = decode_jpeg(&convert(file, &options(), &Limits::default()).unwrap());
        assert_eq!(img.dimensions(), (32, 16));
        assert_colour(&img, 4, 8, BLUE);
        assert_colour(&img, 27, 8, RED);
    }

    #[test]
    fn mirror_axis_zero_swaps_top_and_bottom() {
        let file = Builder::single(two_tone(32, 16, |_, y| y < 8)).mirror(0).build();
        let img = decode_jpeg(&convert(file, &options(), &Limits::default()).unwrap());
        assert_eq!(img.dimensions(), (32, 16));
        assert_colour(&img, 16, 2, BLUE);
        assert_colour(&img, 16, 13, RED);
    }

    #[test]
    fn converts_monochrome_items_to_grey() {
        let file = Builder::single(Pixels::Mono {
            width: 16,
            height: 16,
            data: vec![128; 256],
        })
        .build();
        let img = decode_jpeg(&convert(file, &options(), &Limits::default()).unwrap());
        assert_eq!(img.dimensions(), (16, 16));
        assert_colour(&img, 8, 8, [128, 128, 128]);
    }

    #[test]
    fn max_dimension_fits_and_keeps_aspect() {
        let file = Builder::single(Pixels::solid(64, 32, [10, 10, 10])).build();
        let opts = ConversionOptions {
            max_dimension: Some(16),
            ..options()
        };
        let output = convert(file, &opts, &Limits::default()).unwrap();
        assert_eq!((output.width(), output.height()), (16, 8));
        assert_eq!(decode_jpeg(&output).dimensions(), (16, 8));
    }

    #[test]
    fn max_dimension_never_upscales() {
        let file = Builder::single(Pixels::solid(20, 10, [10, 10, 10])).build();
        let opts = ConversionOptions {
            max_dimension: Some(1000),
            chroma: ChromaSubsampling::Cs444,
            ..options()
        };
        let output = convert(file, &opts, &Limits::default()).unwrap();
        assert_eq!(decode_jpeg(&output).dimensions(), (20, 10));
    }

    #[test]
    fn zeroed_header_is_malformed() {
        let mut file = Builder::single(Pixels::solid(8, 8, [0, 0, 0])).build();
        file[..8].fill(0);
        assert!(matches!(
            convert(file, &options(), &Limits::default()),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn truncated_container_is_malformed() {
        let file = Builder::single(Pixels::solid(8, 8, [0, 0, 0])).build();
        let cut = file[..file.len() / 2].to_vec();
        assert!(matches!(
            convert(cut, &options(), &Limits::default()),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(
            convert(Vec::new(), &options(), &Limits::default()),
            Err(ConvertError::InvalidInput(_))
        ));
    }

    #[test]
    fn resolution_guard() {
        let file = Builder::single(Pixels::solid(40, 24, [0, 0, 0])).build();
        let limits = Limits {
            max_resolution: 32,
            ..Limits::default()
        };
        assert!(matches!(
            convert(file, &options(), &limits),
            Err(ConvertError::ImageTooLarge { width: 40, height: 24, max: 32 })
        ));
    }

    #[test]
    fn file_size_guard() {
        let file = Builder::single(Pixels::solid(8, 8, [0, 0, 0])).build();
        let limits = Limits {
            max_file_size: 16,
            ..Limits::default()
        };
        assert!(matches!(
            convert(file, &options(), &limits),
            Err(ConvertError::FileTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn icc_profile_is_carried_over() {
        let profile = b"fake-icc-profile-bytes".to_vec();
        let file = Builder::single(Pixels::solid(8, 8, [0, 0, 0]))
            .icc(profile.clone())
            .build();
        let output = convert(file, &options(), &Limits::default()).unwrap();
        let bytes = output.bytes();
        assert!(bytes.windows(profile.len()).any(|w| w == profile.as_slice()));
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let file = Builder::single(Pixels::solid(8, 8, [0, 0, 0])).build();
        let opts = ConversionOptions {
            quality: 0,
            ..options()
        };
        assert!(matches!(
            convert(file, &opts, &Limits::default()),
            Err(ConvertError::InvalidInput(_))
        ));
    }

    // Real HEVC files written by libheif 1.15 + x265: a 64x32 image, left half
    // red and right half blue, stored as a 1x1 grid of 64x64 tiles.

    #[cfg(feature = "hevc")]
    #[test]
    fn converts_hevc_grid() {
        let file = include_bytes!("../tests/fixtures/split-64x32.heic");
        let img = decode_jpeg(&convert(&file[..], &options(), &Limits::default()).unwrap());
        assert_eq!(img.dimensions(), (64, 32));
        assert_colour(&img, 8, 16, RED);
        assert_colour(&img, 56, 16, BLUE);
    }

    #[cfg(feature = "hevc")]
    #[test]
    fn hevc_rotation_is_applied_once() {
        // irot 3 on the grid: libheif itself renders this as 32x64, red on top.
        let file = include_bytes!("../tests/fixtures/split-64x32-orientation6.heic");
        let img = decode_jpeg(&convert(&file[..], &options(), &Limits::default()).unwrap());
        assert_eq!(img.dimensions(), (32, 64));
        assert_colour(&img, 16, 8, RED);
        assert_colour(&img, 16, 56, BLUE);
    }

    #[cfg(feature = "hevc")]
    #[test]
    fn hevc_mirror_matches_libheif() {
        // imir axis 1, which libheif writes for EXIF orientation 2.
        let file = include_bytes!("../tests/fixtures/split-64x32-orientation2.heic");
        let img = decode_jpeg(&convert(&file[..], &options(), &Limits::default()).unwrap());
        assert_eq!(img.dimensions(), (64, 32));
        assert_colour(&img, 8, 16, BLUE);
        assert_colour(&img, 56, 16, RED);
    }
}

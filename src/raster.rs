//! Interleaved 8-bit RGB raster shared by the decode, transform and encode stages

use crate::error::ConvertError;
use image::RgbImage;

pub const CHANNELS: usize = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for RasterBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

impl RasterBuffer {
    /// Zero-filled raster.
    pub fn new(width: u32, height: u32) -> Result<Self, ConvertError> {
        let len = Self::byte_len(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![0; len],
        })
    }

    /// Wrap existing RGB samples; `data` must hold exactly `width * height * 3` bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ConvertError> {
        let len = Self::byte_len(width, height)?;
        if data.len() != len {
            return Err(ConvertError::Internal(format!(
                "raster {width}x{height} needs {len} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    fn byte_len(width: u32, height: u32) -> Result<usize, ConvertError> {
        if width == 0 || height == 0 {
            return Err(ConvertError::Internal(format!(
                "invalid raster dimensions {width}x{height}"
            )));
        }
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(CHANNELS))
            .ok_or_else(|| ConvertError::Internal(format!("raster {width}x{height} overflows")))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * CHANNELS
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.row_bytes();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Hand the samples to `image` for `imageops` work.
    pub fn into_image(self) -> Result<RgbImage, ConvertError> {
        let (width, height) = (self.width, self.height);
        RgbImage::from_raw(width, height, self.data).ok_or_else(|| {
            ConvertError::Internal(format!("raster {width}x{height} has a short buffer"))
        })
    }

    pub fn from_image(image: RgbImage) -> Result<Self, ConvertError> {
        let (width, height) = image.dimensions();
        Self::from_rgb(width, height, image.into_raw())
    }
}

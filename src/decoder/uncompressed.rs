//! Decoder for uncompressed (`unci`) image items

use super::color::YCbCrMatrix;
use crate::error::ConvertError;
use crate::heif::{ColourModel, ComponentKind, Interleave, UncompressedLayout};
use crate::raster::{RasterBuffer, CHANNELS};
use rayon::prelude::*;

/// Where one component's samples sit in the payload.
#[derive(Debug, Clone, Copy)]
struct Plane {
    start: usize,
    stride: usize,
    step: usize,
    sub_x: usize,
    sub_y: usize,
}

impl Plane {
    #[inline]
    fn at(&self, data: &[u8], x: usize, y: usize) -> u8 {
        data[self.start + (y / self.sub_y) * self.stride + (x / self.sub_x) * self.step]
    }
}

fn is_chroma(kind: ComponentKind) -> bool {
    matches!(kind, ComponentKind::BlueDifference | ComponentKind::RedDifference)
}

/// Lay out every component and return the total payload size they need.
fn planes(width: usize, height: usize, layout: &UncompressedLayout) -> (Vec<Plane>, usize) {
    let n = layout.components.len();
    match layout.interleave {
        Interleave::Pixel => {
            let planes = (0..n)
                .map(|i| Plane {
                    start: i,
                    stride: width * n,
                    step: n,
                    sub_x: 1,
                    sub_y: 1,
                })
                .collect();
            (planes, width * height * n)
        }
        Interleave::Component => {
            let (fx, fy) = layout.sampling.factors();
            let mut offset = 0;
            let planes = layout
                .components
                .iter()
                .map(|&kind| {
                    let (sub_x, sub_y) = if is_chroma(kind) { (fx, fy) } else { (1, 1) };
                    let plane_w = width.div_ceil(sub_x);
                    let plane_h = height.div_ceil(sub_y);
                    let plane = Plane {
                        start: offset,
                        stride: plane_w,
                        step: 1,
                        sub_x,
                        sub_y,
                    };
                    offset += plane_w * plane_h;
                    plane
                })
                .collect();
            (planes, offset)
        }
    }
}

fn find(layout: &UncompressedLayout, kinds: &[ComponentKind]) -> Result<usize, ConvertError> {
    layout
        .components
        .iter()
        .position(|k| kinds.contains(k))
        .ok_or_else(|| ConvertError::Internal(format!("layout lacks {kinds:?}")))
}

/// Decode an uncompressed payload to RGB.
pub fn decode(
    payload: &[u8],
    width: u32,
    height: u32,
    layout: &UncompressedLayout,
    matrix: &YCbCrMatrix,
) -> Result<RasterBuffer, ConvertError> {
    let (w, h) = (width as usize, height as usize);
    let (planes, expected) = planes(w, h, layout);

    if payload.len() < expected {
        return Err(ConvertError::truncated(format!(
            "{width}x{height} {:?} samples need {expected} bytes, payload has {}",
            layout.sampling,
            payload.len()
        )));
    }
    if payload.len() > expected {
        return Err(ConvertError::invalid_syntax(format!(
            "payload has {} bytes beyond the {expected} the sample layout describes",
            payload.len() - expected
        )));
    }

    let mut raster = RasterBuffer::new(width, height)?;
    let stride = raster.row_bytes();

    match layout.model {
        ColourModel::Rgb => {
            let r = planes[find(layout, &[ComponentKind::Red])?];
            let g = planes[find(layout, &[ComponentKind::Green])?];
            let b = planes[find(layout, &[ComponentKind::Blue])?];
            fill(&mut raster, stride, |x, y| {
                [r.at(payload, x, y), g.at(payload, x, y), b.at(payload, x, y)]
            });
        }
        ColourModel::YCbCr => {
            let luma = planes[find(layout, &[ComponentKind::Luma])?];
            let cb = planes[find(layout, &[ComponentKind::BlueDifference])?];
            let cr = planes[find(layout, &[ComponentKind::RedDifference])?];
            fill(&mut raster, stride, |x, y| {
                matrix.to_rgb(luma.at(payload, x, y), cb.at(payload, x, y), cr.at(payload, x, y))
            });
        }
        ColourModel::Monochrome => {
            let grey =
                planes[find(layout, &[ComponentKind::Monochrome, ComponentKind::Luma])?];
            fill(&mut raster, stride, |x, y| {
                let v = grey.at(payload, x, y);
                [v, v, v]
            });
        }
    }

    Ok(raster)
}

fn fill<F>(raster: &mut RasterBuffer, stride: usize, pixel: F)
where
    F: Fn(usize, usize) -> [u8; 3] + Sync,
{
    raster
        .data_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(CHANNELS).enumerate() {
                px.copy_from_slice(&pixel(x, y));
            }
        });
}

//! YCbCr to RGB conversion driven by the container's `nclx` description

use crate::heif::Nclx;

/// Luma weights and range of a YCbCr encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YCbCrMatrix {
    kr: f32,
    kb: f32,
    full_range: bool,
}

impl Default for YCbCrMatrix {
    fn default() -> Self {
        Self::BT601_FULL
    }
}

impl YCbCrMatrix {
    pub const BT601_FULL: Self = Self {
        kr: 0.299,
        kb: 0.114,
        full_range: true,
    };

    /// Pick the matrix named by `matrix_coefficients` (ITU-T H.273).
    /// Without an `nclx` box, samples are taken as full-range BT.601.
    pub fn from_nclx(nclx: Option<&Nclx>) -> Self {
        let Some(nclx) = nclx else {
            return Self::default();
        };
        let (kr, kb) = match nclx.matrix_coefficients {
            1 => (0.2126, 0.0722),
            9 | 10 => (0.2627, 0.0593),
            4 => (0.30, 0.11),
            _ => (0.299, 0.114),
        };
        Self {
            kr,
            kb,
            full_range: nclx.full_range,
        }
    }

    pub fn to_rgb(&self, y: u8, cb: u8, cr: u8) -> [u8; 3] {
        let (y, pb, pr) = if self.full_range {
            (f32::from(y), f32::from(cb) - 128.0, f32::from(cr) - 128.0)
        } else {
            (
                (f32::from(y) - 16.0) * (255.0 / 219.0),
                (f32::from(cb) - 128.0) * (255.0 / 224.0),
                (f32::from(cr) - 128.0) * (255.0 / 224.0),
            )
        };
        let kg = 1.0 - self.kr - self.kb;
        let r = y + 2.0 * (1.0 - self.kr) * pr;
        let b = y + 2.0 * (1.0 - self.kb) * pb;
        let g = (y - self.kr * r - self.kb * b) / kg;
        [clamp(r), clamp(g), clamp(b)]
    }
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

//! Bounds-checked big-endian reader and ISO-BMFF box iteration

use crate::error::ConvertError;
use std::fmt;

/// Four-character box or item type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCc(*code)
    }
}

impl PartialEq<&[u8; 4]> for FourCc {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        &self.0 == *other
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{self}'")
    }
}

/// Cursor over one box payload. Every read is checked against the payload end.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], context: &'static str) -> Self {
        Self { data, pos: 0, context }
    }

    fn short(&self, wanted: usize) -> ConvertError {
        ConvertError::MalformedContainer(format!(
            "{}: needs {} more bytes at offset {}, {} available",
            self.context,
            wanted,
            self.pos,
            self.remaining()
        ))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ConvertError> {
        if n > self.remaining() {
            return Err(self.short(n));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ConvertError> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, ConvertError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ConvertError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, ConvertError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, ConvertError> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// Variable-width unsigned field as used by `iloc` (0, 4 or 8 bytes).
    pub fn uint(&mut self, size: u8) -> Result<u64, ConvertError> {
        match size {
            0 => Ok(0),
            4 => self.u32().map(u64::from),
            8 => self.u64(),
            other => Err(ConvertError::MalformedContainer(format!(
                "{}: invalid field size {other}",
                self.context
            ))),
        }
    }

    /// Item ID stored as 16 bits in version 0 boxes and 32 bits otherwise.
    pub fn item_id(&mut self, wide: bool) -> Result<u32, ConvertError> {
        if wide {
            self.u32()
        } else {
            self.u16().map(u32::from)
        }
    }

    pub fn fourcc(&mut self) -> Result<FourCc, ConvertError> {
        let b = self.bytes(4)?;
        Ok(FourCc([b[0], b[1], b[2], b[3]]))
    }

    /// Version byte and 24-bit flags of a FullBox.
    pub fn full_box(&mut self) -> Result<(u8, u32), ConvertError> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00FF_FFFF))
    }

    /// Null-terminated UTF-8 string; a missing terminator consumes the rest.
    pub fn cstring(&mut self) -> Result<String, ConvertError> {
        let rest = &self.data[self.pos..];
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += (len + 1).min(rest.len());
        Ok(s)
    }
}

/// One box located inside a parent payload.
#[derive(Debug, Clone, Copy)]
pub struct RawBox<'a> {
    pub kind: FourCc,
    pub payload: &'a [u8],
    /// Absolute file offset of the payload's first byte.
    pub offset: usize,
}

impl<'a> RawBox<'a> {
    pub fn reader(&self, context: &'static str) -> Reader<'a> {
        Reader::new(self.payload, context)
    }
}

/// Iterates the sibling boxes stored back to back in `data`.
pub struct Boxes<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    failed: bool,
}

impl<'a> Boxes<'a> {
    /// `base` is the absolute file offset of `data[0]`.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            pos: 0,
            base,
            failed: false,
        }
    }

    fn next_box(&mut self) -> Result<RawBox<'a>, ConvertError> {
        let start = self.pos;
        let avail = self.data.len() - start;
        let malformed = |what: String| {
            ConvertError::MalformedContainer(format!("box at offset {}: {what}", self.base + start))
        };

        if avail < 8 {
            return Err(malformed(format!("{avail} stray bytes, too short for a box header")));
        }
        let mut r = Reader::new(&self.data[start..], "box header");
        let size32 = r.u32()?;
        let kind = r.fourcc()?;
        let size = match size32 {
            0 => avail as u64,
            1 => r.u64()?,
            n => u64::from(n),
        };
        if &kind.0 == b"uuid" {
            r.skip(16)?;
        }
        let header_len = r.pos;

        if size < header_len as u64 {
            return Err(malformed(format!("{kind} declares size {size}, smaller than its header")));
        }
        if size > avail as u64 {
            return Err(malformed(format!(
                "{kind} declares size {size} but only {avail} bytes remain"
            )));
        }

        let end = start + size as usize;
        self.pos = end;
        Ok(RawBox {
            kind,
            payload: &self.data[start + header_len..end],
            offset: self.base + start + header_len,
        })
    }
}

impl<'a> Iterator for Boxes<'a> {
    type Item = Result<RawBox<'a>, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let next = self.next_box();
        self.failed = next.is_err();
        Some(next)
    }
}

/// Children of a container box.
pub fn children<'a>(parent: &RawBox<'a>) -> Boxes<'a> {
    Boxes::new(parent.payload, parent.offset)
}

/// Children of a FullBox container such as `meta`, after its version/flags word.
pub fn full_box_children<'a>(parent: &RawBox<'a>) -> Result<(u8, Boxes<'a>), ConvertError> {
    let mut r = parent.reader("full box");
    let (version, _) = r.full_box()?;
    Ok((version, Boxes::new(&parent.payload[4..], parent.offset + 4)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_sibling_boxes_with_offsets() {
        let mut data = Vec::new();
        data.extend_from_slice(&12u32.to_be_bytes());
        data.extend_from_slice(b"free");
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(&8u32.to_be_bytes());
        data.extend_from_slice(b"skip");

        let boxes: Vec<_> = Boxes::new(&data, 100).collect::<Result<_, _>>().unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].kind, b"free");
        assert_eq!(boxes[0].payload, &[1, 2, 3, 4]);
        assert_eq!(boxes[0].offset, 108);
        assert_eq!(boxes[1].kind, b"skip");
        assert!(boxes[1].payload.is_empty());
    }

    #[test]
    fn size_zero_extends_to_end() {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[9; 5]);
        let b = Boxes::new(&data, 0).next().unwrap().unwrap();
        assert_eq!(b.payload.len(), 5);
    }

    #[test]
    fn oversized_box_is_malformed_and_stops_iteration() {
        let mut data = 64u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"meta");
        let mut boxes = Boxes::new(&data, 0);
        assert!(matches!(
            boxes.next(),
            Some(Err(ConvertError::MalformedContainer(_)))
        ));
        assert!(boxes.next().is_none());
    }

    #[test]
    fn reader_reports_short_reads() {
        let mut r = Reader::new(&[0, 1], "ispe");
        assert_eq!(r.u16().unwrap(), 1);
        let err = r.u32().unwrap_err();
        assert!(err.to_string().contains("ispe"));
    }

    #[test]
    fn uint_rejects_odd_widths() {
        let mut r = Reader::new(&[0; 8], "iloc");
        assert_eq!(r.uint(0).unwrap(), 0);
        assert!(r.uint(2).is_err());
    }
}

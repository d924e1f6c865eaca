//! Synthetic HEIF files for tests, built from uncompressed (`unci`) items.

pub(crate) fn bx(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

pub(crate) fn full_bx(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = ((u32::from(version) << 24) | (flags & 0x00FF_FFFF)).to_be_bytes().to_vec();
    body.extend_from_slice(payload);
    bx(kind, &body)
}

pub(crate) fn ftyp(major: &[u8; 4]) -> Vec<u8> {
    let mut payload = major.to_vec();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(b"mif1");
    payload.extend_from_slice(major);
    bx(b"ftyp", &payload)
}

pub(crate) fn ispe(width: u32, height: u32) -> Vec<u8> {
    let mut p = width.to_be_bytes().to_vec();
    p.extend_from_slice(&height.to_be_bytes());
    full_bx(b"ispe", 0, 0, &p)
}

pub(crate) fn irot(quarter_turns_ccw: u8) -> Vec<u8> {
    bx(b"irot", &[quarter_turns_ccw & 3])
}

pub(crate) fn imir(axis: u8) -> Vec<u8> {
    bx(b"imir", &[axis & 1])
}

pub(crate) fn colr_nclx(matrix_coefficients: u16, full_range: bool) -> Vec<u8> {
    let mut p = b"nclx".to_vec();
    p.extend_from_slice(&1u16.to_be_bytes());
    p.extend_from_slice(&13u16.to_be_bytes());
    p.extend_from_slice(&matrix_coefficients.to_be_bytes());
    p.push(if full_range { 0x80 } else { 0 });
    bx(b"colr", &p)
}

pub(crate) fn colr_icc(profile: &[u8]) -> Vec<u8> {
    let mut p = b"prof".to_vec();
    p.extend_from_slice(profile);
    bx(b"colr", &p)
}

pub(crate) fn cmpd(types: &[u16]) -> Vec<u8> {
    let mut p = (types.len() as u32).to_be_bytes().to_vec();
    for t in types {
        p.extend_from_slice(&t.to_be_bytes());
    }
    bx(b"cmpd", &p)
}

pub(crate) fn uncc_with_depth(indices: &[u16], sampling: u8, interleave: u8, depth: u8) -> Vec<u8> {
    let mut p = 0u32.to_be_bytes().to_vec(); // profile
    p.extend_from_slice(&(indices.len() as u32).to_be_bytes());
    for i in indices {
        p.extend_from_slice(&i.to_be_bytes());
        p.push(depth - 1);
        p.push(0); // unsigned integer
        p.push(0); // no alignment
    }
    p.extend_from_slice(&[sampling, interleave, 0, 0]);
    for _ in 0..5 {
        // pixel size, row align, tile align, tile columns - 1, tile rows - 1
        p.extend_from_slice(&0u32.to_be_bytes());
    }
    full_bx(b"uncC", 0, 0, &p)
}

pub(crate) fn uncc(indices: &[u16], sampling: u8, interleave: u8) -> Vec<u8> {
    uncc_with_depth(indices, sampling, interleave, 8)
}

/// Samples for one uncompressed item.
#[derive(Debug, Clone)]
pub(crate) enum Pixels {
    /// Pixel-interleaved RGB.
    Rgb { width: u32, height: u32, data: Vec<u8> },
    /// Planar YCbCr; `sampling` is the uncC sampling type (0 = 4:4:4, 1 = 4:2:2, 2 = 4:2:0).
    YCbCr {
        width: u32,
        height: u32,
        sampling: u8,
        y: Vec<u8>,
        cb: Vec<u8>,
        cr: Vec<u8>,
    },
    Mono { width: u32, height: u32, data: Vec<u8> },
}

impl Pixels {
    /// Solid colour, pixel-interleaved RGB.
    pub(crate) fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = (0..width * height).flat_map(|_| rgb).collect();
        Pixels::Rgb { width, height, data }
    }

    fn into_item(self, id: u32) -> Item {
        let (width, height, data, types, indices, sampling, interleave) = match self {
            Pixels::Rgb { width, height, data } => {
                (width, height, data, vec![4, 5, 6], vec![0, 1, 2], 0, 1)
            }
            Pixels::YCbCr {
                width,
                height,
                sampling,
                y,
                cb,
                cr,
            } => {
                let mut data = y;
                data.extend_from_slice(&cb);
                data.extend_from_slice(&cr);
                (width, height, data, vec![1, 2, 3], vec![0, 1, 2], sampling, 0)
            }
            Pixels::Mono { width, height, data } => (width, height, data, vec![0], vec![0], 0, 0),
        };
        Item {
            id,
            kind: *b"unci",
            data,
            properties: vec![
                (ispe(width, height), false),
                (cmpd(&types), true),
                (uncc(&indices, sampling, interleave), true),
            ],
        }
    }
}

struct Item {
    id: u32,
    kind: [u8; 4],
    data: Vec<u8>,
    properties: Vec<(Vec<u8>, bool)>,
}

pub(crate) struct Builder {
    brand: [u8; 4],
    items: Vec<Item>,
    primary: u32,
    references: Vec<([u8; 4], u32, Vec<u32>)>,
    in_idat: bool,
}

impl Builder {
    pub(crate) fn single(pixels: Pixels) -> Self {
        Self {
            brand: *b"heic",
            items: vec![pixels.into_item(1)],
            primary: 1,
            references: Vec::new(),
            in_idat: false,
        }
    }

    /// Grid of `rows` x `columns` tiles (row-major) cropped to `width` x `height`.
    pub(crate) fn grid(rows: u8, columns: u8, width: u16, height: u16, tiles: Vec<Pixels>) -> Self {
        let mut items: Vec<Item> = tiles
            .into_iter()
            .enumerate()
            .map(|(i, p)| p.into_item(i as u32 + 1))
            .collect();
        let tile_ids: Vec<u32> = items.iter().map(|i| i.id).collect();
        let grid_id = items.len() as u32 + 1;

        let mut descriptor = vec![0, 0, rows - 1, columns - 1];
        descriptor.extend_from_slice(&width.to_be_bytes());
        descriptor.extend_from_slice(&height.to_be_bytes());
        items.push(Item {
            id: grid_id,
            kind: *b"grid",
            data: descriptor,
            properties: vec![(ispe(u32::from(width), u32::from(height)), false)],
        });

        Self {
            brand: *b"heic",
            items,
            primary: grid_id,
            references: vec![(*b"dimg", grid_id, tile_ids)],
            in_idat: false,
        }
    }

    fn primary_item(&mut self) -> &mut Item {
        let id = self.primary;
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .expect("primary item exists")
    }

    pub(crate) fn property(mut self, prop: Vec<u8>, essential: bool) -> Self {
        self.primary_item().properties.push((prop, essential));
        self
    }

    pub(crate) fn rotate_ccw(self, quarter_turns: u8) -> Self {
        self.property(irot(quarter_turns), true)
    }

    pub(crate) fn mirror(self, axis: u8) -> Self {
        self.property(imir(axis), true)
    }

    pub(crate) fn icc(self, profile: Vec<u8>) -> Self {
        self.property(colr_icc(&profile), false)
    }

    pub(crate) fn nclx(self, matrix_coefficients: u16, full_range: bool) -> Self {
        self.property(colr_nclx(matrix_coefficients, full_range), false)
    }

    pub(crate) fn item_type(mut self, kind: [u8; 4]) -> Self {
        self.primary_item().kind = kind;
        self
    }

    pub(crate) fn replace_uncc(mut self, prop: Vec<u8>) -> Self {
        let item = self.primary_item();
        for (p, _) in item.properties.iter_mut() {
            if &p[4..8] == b"uncC" {
                *p = prop.clone();
            }
        }
        self
    }

    /// Point `pitm` at `id` without touching the items.
    pub(crate) fn primary(mut self, id: u32) -> Self {
        self.primary = id;
        self
    }

    pub(crate) fn in_idat(mut self) -> Self {
        self.in_idat = true;
        self
    }

    fn meta(&self, data_start: usize) -> Vec<u8> {
        let mut hdlr = 0u32.to_be_bytes().to_vec();
        hdlr.extend_from_slice(b"pict");
        hdlr.extend_from_slice(&[0; 12]);
        hdlr.push(0);

        let pitm = (self.primary as u16).to_be_bytes();

        let mut iinf = (self.items.len() as u16).to_be_bytes().to_vec();
        for item in &self.items {
            let mut infe = (item.id as u16).to_be_bytes().to_vec();
            infe.extend_from_slice(&0u16.to_be_bytes());
            infe.extend_from_slice(&item.kind);
            infe.push(0);
            iinf.extend_from_slice(&full_bx(b"infe", 2, 0, &infe));
        }

        let mut iloc = vec![0x44, 0x00];
        iloc.extend_from_slice(&(self.items.len() as u16).to_be_bytes());
        let mut offset = if self.in_idat { 0 } else { data_start };
        for item in &self.items {
            iloc.extend_from_slice(&(item.id as u16).to_be_bytes());
            iloc.extend_from_slice(&u16::from(self.in_idat).to_be_bytes());
            iloc.extend_from_slice(&0u16.to_be_bytes());
            iloc.extend_from_slice(&1u16.to_be_bytes());
            iloc.extend_from_slice(&(offset as u32).to_be_bytes());
            iloc.extend_from_slice(&(item.data.len() as u32).to_be_bytes());
            offset += item.data.len();
        }

        let mut ipco = Vec::new();
        let mut ipma = (self.items.len() as u32).to_be_bytes().to_vec();
        let mut next_index = 1u8;
        for item in &self.items {
            ipma.extend_from_slice(&(item.id as u16).to_be_bytes());
            ipma.push(item.properties.len() as u8);
            for (prop, essential) in &item.properties {
                ipco.extend_from_slice(prop);
                ipma.push(next_index | if *essential { 0x80 } else { 0 });
                next_index += 1;
            }
        }
        let mut iprp = bx(b"ipco", &ipco);
        iprp.extend_from_slice(&full_bx(b"ipma", 0, 0, &ipma));

        let mut meta = full_bx(b"hdlr", 0, 0, &hdlr);
        meta.extend_from_slice(&full_bx(b"pitm", 0, 0, &pitm));
        meta.extend_from_slice(&full_bx(b"iloc", 1, 0, &iloc));
        meta.extend_from_slice(&full_bx(b"iinf", 0, 0, &iinf));
        if !self.references.is_empty() {
            let mut iref = Vec::new();
            for (kind, from, to) in &self.references {
                let mut r = (*from as u16).to_be_bytes().to_vec();
                r.extend_from_slice(&(to.len() as u16).to_be_bytes());
                for t in to {
                    r.extend_from_slice(&(*t as u16).to_be_bytes());
                }
                iref.extend_from_slice(&bx(kind, &r));
            }
            meta.extend_from_slice(&full_bx(b"iref", 0, 0, &iref));
        }
        meta.extend_from_slice(&bx(b"iprp", &iprp));
        if self.in_idat {
            meta.extend_from_slice(&bx(b"idat", &self.payload()));
        }
        full_bx(b"meta", 0, 0, &meta)
    }

    fn payload(&self) -> Vec<u8> {
        self.items.iter().flat_map(|i| i.data.iter().copied()).collect()
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let ftyp = ftyp(&self.brand);
        // Field widths are fixed, so the meta size does not depend on the offsets.
        let meta_len = self.meta(0).len();
        let data_start = ftyp.len() + meta_len + 8;

        let mut out = ftyp;
        out.extend_from_slice(&self.meta(data_start));
        if !self.in_idat {
            out.extend_from_slice(&bx(b"mdat", &self.payload()));
        }
        out
    }
}

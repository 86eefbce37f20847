// bspfile.rs — BSP version 29 on-disk format
//
// All records are little-endian. Each record type knows its size and how to
// read itself from a byte slice; `read_lump` handles the bounds and stride
// checks shared by every lump.

use rayon::prelude::*;

use crate::error::BspError;
use crate::q_shared::Vec3;

pub const BSPVERSION: i32 = 29;

pub const MAX_MAP_HULLS: usize = 4;
pub const MAX_MAP_MODELS: usize = 256;
pub const MAX_MAP_PLANES: usize = 32767;
pub const MAX_MAP_NODES: usize = 32767;
pub const MAX_MAP_CLIPNODES: usize = 32767;
pub const MAX_MAP_LEAFS: usize = 8192;
pub const MAX_MAP_TEXINFO: usize = 4096;
pub const MAX_MAP_FACES: usize = 65535;
pub const MAX_MAP_MARKSURFACES: usize = 65535;
pub const MAX_MAP_VERTS: usize = 65535;

pub const MAXLIGHTMAPS: usize = 4;
pub const NUM_AMBIENTS: usize = 4;
pub const MIPLEVELS: usize = 4;

/// texinfo flag: sky or slime, no lightmap or 256 subdivision
pub const TEX_SPECIAL: i32 = 1;

pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_PLANES: usize = 1;
pub const LUMP_TEXTURES: usize = 2;
pub const LUMP_VERTEXES: usize = 3;
pub const LUMP_VISIBILITY: usize = 4;
pub const LUMP_NODES: usize = 5;
pub const LUMP_TEXINFO: usize = 6;
pub const LUMP_FACES: usize = 7;
pub const LUMP_LIGHTING: usize = 8;
pub const LUMP_CLIPNODES: usize = 9;
pub const LUMP_LEAFS: usize = 10;
pub const LUMP_MARKSURFACES: usize = 11;
pub const LUMP_EDGES: usize = 12;
pub const LUMP_SURFEDGES: usize = 13;
pub const LUMP_MODELS: usize = 14;
pub const HEADER_LUMPS: usize = 15;

pub const LUMP_NAMES: [&str; HEADER_LUMPS] = [
    "entities", "planes", "textures", "vertexes", "visibility", "nodes", "texinfo", "faces",
    "lighting", "clipnodes", "leafs", "marksurfaces", "edges", "surfedges", "models",
];

/// version + 15 * (fileofs, filelen)
pub const HEADER_SIZE: usize = 4 + HEADER_LUMPS * 8;

/// Lumps with at least this many records are decoded with rayon.
pub const PARALLEL_LUMP_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lump {
    pub fileofs: i32,
    pub filelen: i32,
}

#[derive(Debug, Clone)]
pub struct DHeader {
    pub version: i32,
    pub lumps: [Lump; HEADER_LUMPS],
}

// ============================================================
// Little-endian readers
// ============================================================

#[inline]
pub fn read_i32_le(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[inline]
pub fn read_i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub fn read_f32_le(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn read_vec3(data: &[u8], offset: usize) -> Vec3 {
    [read_f32_le(data, offset), read_f32_le(data, offset + 4), read_f32_le(data, offset + 8)]
}

fn read_short3(data: &[u8], offset: usize) -> [i16; 3] {
    [read_i16_le(data, offset), read_i16_le(data, offset + 2), read_i16_le(data, offset + 4)]
}

fn put_vec3(out: &mut Vec<u8>, v: &Vec3) {
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
}

fn put_short3(out: &mut Vec<u8>, v: &[i16; 3]) {
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
}

// ============================================================
// Header
// ============================================================

impl DHeader {
    pub fn parse(name: &str, data: &[u8]) -> Result<Self, BspError> {
        if data.len() < HEADER_SIZE {
            return Err(BspError::Truncated { name: name.to_string(), len: data.len() });
        }
        let version = read_i32_le(data, 0);
        if version != BSPVERSION {
            return Err(BspError::BadVersion {
                name: name.to_string(),
                found: version,
                expected: BSPVERSION,
            });
        }
        let mut lumps = [Lump::default(); HEADER_LUMPS];
        for (i, lump) in lumps.iter_mut().enumerate() {
            lump.fileofs = read_i32_le(data, 4 + i * 8);
            lump.filelen = read_i32_le(data, 8 + i * 8);
        }
        Ok(DHeader { version, lumps })
    }

    /// The bytes of lump `index`, bounds-checked against the file.
    pub fn lump_bytes<'a>(&self, data: &'a [u8], index: usize) -> Result<&'a [u8], BspError> {
        let l = self.lumps[index];
        let out_of_bounds = BspError::LumpOutOfBounds {
            lump: LUMP_NAMES[index],
            ofs: l.fileofs,
            len: l.filelen,
            file_len: data.len(),
        };
        if l.fileofs < 0 || l.filelen < 0 {
            return Err(out_of_bounds);
        }
        let start = l.fileofs as usize;
        let end = start + l.filelen as usize;
        if end > data.len() {
            return Err(out_of_bounds);
        }
        Ok(&data[start..end])
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        for l in &self.lumps {
            out.extend_from_slice(&l.fileofs.to_le_bytes());
            out.extend_from_slice(&l.filelen.to_le_bytes());
        }
    }
}

/// A fixed-size lump record.
pub trait LumpRecord: Sized + Send {
    const SIZE: usize;
    fn read(b: &[u8]) -> Self;
    fn write(&self, out: &mut Vec<u8>);
}

/// Decode every record of lump `index`. Fatal if the lump length is not a
/// multiple of the record size.
pub fn read_lump<T: LumpRecord>(header: &DHeader, data: &[u8], index: usize) -> Result<Vec<T>, BspError> {
    let bytes = header.lump_bytes(data, index)?;
    if bytes.len() % T::SIZE != 0 {
        return Err(BspError::FunnyLumpSize { lump: LUMP_NAMES[index], len: bytes.len(), stride: T::SIZE });
    }
    let count = bytes.len() / T::SIZE;
    let records = if count >= PARALLEL_LUMP_THRESHOLD {
        bytes.par_chunks_exact(T::SIZE).map(T::read).collect()
    } else {
        bytes.chunks_exact(T::SIZE).map(T::read).collect()
    };
    Ok(records)
}

// ============================================================
// Records
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: i32,
}

impl LumpRecord for DPlane {
    const SIZE: usize = 20;
    fn read(b: &[u8]) -> Self {
        DPlane { normal: read_vec3(b, 0), dist: read_f32_le(b, 12), plane_type: read_i32_le(b, 16) }
    }
    fn write(&self, out: &mut Vec<u8>) {
        put_vec3(out, &self.normal);
        out.extend_from_slice(&self.dist.to_le_bytes());
        out.extend_from_slice(&self.plane_type.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DVertex {
    pub point: Vec3,
}

impl LumpRecord for DVertex {
    const SIZE: usize = 12;
    fn read(b: &[u8]) -> Self {
        DVertex { point: read_vec3(b, 0) }
    }
    fn write(&self, out: &mut Vec<u8>) {
        put_vec3(out, &self.point);
    }
}

/// Render node. A negative child `c` is leaf `-(c + 1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DNode {
    pub planenum: i32,
    pub children: [i16; 2],
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstface: u16,
    pub numfaces: u16,
}

impl LumpRecord for DNode {
    const SIZE: usize = 24;
    fn read(b: &[u8]) -> Self {
        DNode {
            planenum: read_i32_le(b, 0),
            children: [read_i16_le(b, 4), read_i16_le(b, 6)],
            mins: read_short3(b, 8),
            maxs: read_short3(b, 14),
            firstface: read_u16_le(b, 20),
            numfaces: read_u16_le(b, 22),
        }
    }
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.planenum.to_le_bytes());
        out.extend_from_slice(&self.children[0].to_le_bytes());
        out.extend_from_slice(&self.children[1].to_le_bytes());
        put_short3(out, &self.mins);
        put_short3(out, &self.maxs);
        out.extend_from_slice(&self.firstface.to_le_bytes());
        out.extend_from_slice(&self.numfaces.to_le_bytes());
    }
}

/// Collision node. A negative child is a contents code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DClipNode {
    pub planenum: i32,
    pub children: [i16; 2],
}

impl LumpRecord for DClipNode {
    const SIZE: usize = 8;
    fn read(b: &[u8]) -> Self {
        DClipNode { planenum: read_i32_le(b, 0), children: [read_i16_le(b, 4), read_i16_le(b, 6)] }
    }
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.planenum.to_le_bytes());
        out.extend_from_slice(&self.children[0].to_le_bytes());
        out.extend_from_slice(&self.children[1].to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DTexInfo {
    /// [s/t][xyz offset]
    pub vecs: [[f32; 4]; 2],
    pub miptex: i32,
    pub flags: i32,
}

impl LumpRecord for DTexInfo {
    const SIZE: usize = 40;
    fn read(b: &[u8]) -> Self {
        let mut vecs = [[0.0; 4]; 2];
        for (i, row) in vecs.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = read_f32_le(b, (i * 4 + j) * 4);
            }
        }
        DTexInfo { vecs, miptex: read_i32_le(b, 32), flags: read_i32_le(b, 36) }
    }
    fn write(&self, out: &mut Vec<u8>) {
        for row in &self.vecs {
            for v in row {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.miptex.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DFace {
    pub planenum: i16,
    pub side: i16,
    pub firstedge: i32,
    pub numedges: i16,
    pub texinfo: i16,
    pub styles: [u8; MAXLIGHTMAPS],
    /// start of `[numstyles * surfsize]` samples, -1 for none
    pub lightofs: i32,
}

impl LumpRecord for DFace {
    const SIZE: usize = 20;
    fn read(b: &[u8]) -> Self {
        DFace {
            planenum: read_i16_le(b, 0),
            side: read_i16_le(b, 2),
            firstedge: read_i32_le(b, 4),
            numedges: read_i16_le(b, 8),
            texinfo: read_i16_le(b, 10),
            styles: [b[12], b[13], b[14], b[15]],
            lightofs: read_i32_le(b, 16),
        }
    }
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.planenum.to_le_bytes());
        out.extend_from_slice(&self.side.to_le_bytes());
        out.extend_from_slice(&self.firstedge.to_le_bytes());
        out.extend_from_slice(&self.numedges.to_le_bytes());
        out.extend_from_slice(&self.texinfo.to_le_bytes());
        out.extend_from_slice(&self.styles);
        out.extend_from_slice(&self.lightofs.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DLeaf {
    pub contents: i32,
    /// -1 = no visibility info
    pub visofs: i32,
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstmarksurface: u16,
    pub nummarksurfaces: u16,
    pub ambient_level: [u8; NUM_AMBIENTS],
}

impl LumpRecord for DLeaf {
    const SIZE: usize = 28;
    fn read(b: &[u8]) -> Self {
        DLeaf {
            contents: read_i32_le(b, 0),
            visofs: read_i32_le(b, 4),
            mins: read_short3(b, 8),
            maxs: read_short3(b, 14),
            firstmarksurface: read_u16_le(b, 20),
            nummarksurfaces: read_u16_le(b, 22),
            ambient_level: [b[24], b[25], b[26], b[27]],
        }
    }
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.contents.to_le_bytes());
        out.extend_from_slice(&self.visofs.to_le_bytes());
        put_short3(out, &self.mins);
        put_short3(out, &self.maxs);
        out.extend_from_slice(&self.firstmarksurface.to_le_bytes());
        out.extend_from_slice(&self.nummarksurfaces.to_le_bytes());
        out.extend_from_slice(&self.ambient_level);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DEdge {
    pub v: [u16; 2],
}

impl LumpRecord for DEdge {
    const SIZE: usize = 4;
    fn read(b: &[u8]) -> Self {
        DEdge { v: [read_u16_le(b, 0), read_u16_le(b, 2)] }
    }
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.v[0].to_le_bytes());
        out.extend_from_slice(&self.v[1].to_le_bytes());
    }
}

/// Marksurface entry: an index into the face lump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DMarkSurface(pub u16);

impl LumpRecord for DMarkSurface {
    const SIZE: usize = 2;
    fn read(b: &[u8]) -> Self {
        DMarkSurface(read_u16_le(b, 0))
    }
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }
}

/// Surfedge entry: a signed edge index, negative means the edge is walked
/// from v[1] to v[0].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DSurfEdge(pub i32);

impl LumpRecord for DSurfEdge {
    const SIZE: usize = 4;
    fn read(b: &[u8]) -> Self {
        DSurfEdge(read_i32_le(b, 0))
    }
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub headnode: [i32; MAX_MAP_HULLS],
    /// not including the solid leaf 0
    pub visleafs: i32,
    pub firstface: i32,
    pub numfaces: i32,
}

impl LumpRecord for DModel {
    const SIZE: usize = 64;
    fn read(b: &[u8]) -> Self {
        DModel {
            mins: read_vec3(b, 0),
            maxs: read_vec3(b, 12),
            origin: read_vec3(b, 24),
            headnode: [read_i32_le(b, 36), read_i32_le(b, 40), read_i32_le(b, 44), read_i32_le(b, 48)],
            visleafs: read_i32_le(b, 52),
            firstface: read_i32_le(b, 56),
            numfaces: read_i32_le(b, 60),
        }
    }
    fn write(&self, out: &mut Vec<u8>) {
        put_vec3(out, &self.mins);
        put_vec3(out, &self.maxs);
        put_vec3(out, &self.origin);
        for h in &self.headnode {
            out.extend_from_slice(&h.to_le_bytes());
        }
        out.extend_from_slice(&self.visleafs.to_le_bytes());
        out.extend_from_slice(&self.firstface.to_le_bytes());
        out.extend_from_slice(&self.numfaces.to_le_bytes());
    }
}

/// Header of one texture inside the texture lump. Pixel data for the four
/// mips follows at the given offsets, relative to the start of the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DMiptex {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub offsets: [u32; MIPLEVELS],
}

impl DMiptex {
    pub const SIZE: usize = 40;

    pub fn read(b: &[u8]) -> Self {
        let raw = &b[..16];
        let len = raw.iter().position(|&c| c == 0).unwrap_or(16);
        DMiptex {
            name: String::from_utf8_lossy(&raw[..len]).into_owned(),
            width: read_u32_le(b, 16),
            height: read_u32_le(b, 20),
            offsets: [read_u32_le(b, 24), read_u32_le(b, 28), read_u32_le(b, 32), read_u32_le(b, 36)],
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut name = [0u8; 16];
        let bytes = self.name.as_bytes();
        let n = bytes.len().min(15);
        name[..n].copy_from_slice(&bytes[..n]);
        out.extend_from_slice(&name);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        for o in &self.offsets {
            out.extend_from_slice(&o.to_le_bytes());
        }
    }

    /// Total pixel bytes of all four mips, `None` when the header's
    /// dimensions do not fit in memory.
    pub fn pixel_size(&self) -> Option<usize> {
        let base = (self.width as usize).checked_mul(self.height as usize)?;
        base.checked_add(base / 4)?.checked_add(base / 16)?.checked_add(base / 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(lumps: &[(usize, i32, i32)], total: usize) -> Vec<u8> {
        let mut h = DHeader { version: BSPVERSION, lumps: [Lump::default(); HEADER_LUMPS] };
        for &(i, ofs, len) in lumps {
            h.lumps[i] = Lump { fileofs: ofs, filelen: len };
        }
        let mut out = Vec::new();
        h.write(&mut out);
        out.resize(total, 0);
        out
    }

    #[test]
    fn test_header_parse_version() {
        let mut data = header_with(&[], HEADER_SIZE);
        assert!(DHeader::parse("maps/t.bsp", &data).is_ok());
        data[0] = 30;
        let err = DHeader::parse("maps/t.bsp", &data).unwrap_err();
        assert_eq!(
            err,
            BspError::BadVersion { name: "maps/t.bsp".into(), found: 30, expected: BSPVERSION }
        );
    }

    #[test]
    fn test_header_truncated() {
        let err = DHeader::parse("x", &[29, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, BspError::Truncated { len: 4, .. }));
    }

    #[test]
    fn test_lump_out_of_bounds() {
        let data = header_with(&[(LUMP_PLANES, HEADER_SIZE as i32, 400)], HEADER_SIZE + 20);
        let h = DHeader::parse("x", &data).unwrap();
        let err = read_lump::<DPlane>(&h, &data, LUMP_PLANES).unwrap_err();
        assert!(matches!(err, BspError::LumpOutOfBounds { lump: "planes", .. }));
    }

    #[test]
    fn test_funny_lump_size() {
        let data = header_with(&[(LUMP_PLANES, HEADER_SIZE as i32, 30)], HEADER_SIZE + 30);
        let h = DHeader::parse("x", &data).unwrap();
        let err = read_lump::<DPlane>(&h, &data, LUMP_PLANES).unwrap_err();
        assert_eq!(err, BspError::FunnyLumpSize { lump: "planes", len: 30, stride: 20 });
    }

    #[test]
    fn test_record_sizes_match_writers() {
        fn written<T: LumpRecord + Default>() -> usize {
            let mut out = Vec::new();
            T::default().write(&mut out);
            out.len()
        }
        assert_eq!(written::<DPlane>(), DPlane::SIZE);
        assert_eq!(written::<DVertex>(), DVertex::SIZE);
        assert_eq!(written::<DNode>(), DNode::SIZE);
        assert_eq!(written::<DClipNode>(), DClipNode::SIZE);
        assert_eq!(written::<DTexInfo>(), DTexInfo::SIZE);
        assert_eq!(written::<DFace>(), DFace::SIZE);
        assert_eq!(written::<DLeaf>(), DLeaf::SIZE);
        assert_eq!(written::<DEdge>(), DEdge::SIZE);
        assert_eq!(written::<DModel>(), DModel::SIZE);
        let mut out = Vec::new();
        DMiptex::default().write(&mut out);
        assert_eq!(out.len(), DMiptex::SIZE);
    }

    #[test]
    fn test_parallel_lump_decode_preserves_order() {
        let count = PARALLEL_LUMP_THRESHOLD + 10;
        let mut body = Vec::new();
        for i in 0..count {
            DClipNode { planenum: i as i32, children: [-1, -2] }.write(&mut body);
        }
        let mut data = header_with(&[(LUMP_CLIPNODES, HEADER_SIZE as i32, body.len() as i32)], HEADER_SIZE);
        data.extend_from_slice(&body);
        let h = DHeader::parse("x", &data).unwrap();
        let nodes = read_lump::<DClipNode>(&h, &data, LUMP_CLIPNODES).unwrap();
        assert_eq!(nodes.len(), count);
        for (i, n) in nodes.iter().enumerate() {
            assert_eq!(n.planenum, i as i32);
        }
    }

    #[test]
    fn test_miptex_name_and_pixels() {
        let mt = DMiptex { name: "+0lava".into(), width: 16, height: 32, offsets: [40, 0, 0, 0] };
        let mut out = Vec::new();
        mt.write(&mut out);
        let back = DMiptex::read(&out);
        assert_eq!(back.name, "+0lava");
        assert_eq!(back.pixel_size(), Some(512 + 128 + 32 + 8));
    }

    #[test]
    fn test_miptex_huge_dimensions() {
        let mt = DMiptex { name: "huge".into(), width: u32::MAX, height: u32::MAX, offsets: [40, 0, 0, 0] };
        assert_eq!(mt.pixel_size(), None);
    }
}

// testkit.rs — synthetic BSP v29 levels for tests
//
// `BspBuilder` holds the on-disk records of every lump and writes a real
// level file, so tests go through the same loader a shipped map does.

use crate::bspfile::*;
use crate::model::{BrushModel, Contents};
use crate::model_load::load_brush_model;
use crate::q_shared::{Vec3, PLANE_ANYX, PLANE_ANYY, PLANE_ANYZ};

/// On-disk child value referring to leaf `index`.
pub fn leaf(index: usize) -> i16 {
    -(index as i16) - 1
}

#[derive(Debug, Clone)]
pub struct BspBuilder {
    pub entities: String,
    pub planes: Vec<DPlane>,
    /// `None` writes a -1 directory entry.
    pub textures: Vec<Option<DMiptex>>,
    pub vertexes: Vec<DVertex>,
    pub visdata: Vec<u8>,
    pub nodes: Vec<DNode>,
    pub texinfo: Vec<DTexInfo>,
    pub faces: Vec<DFace>,
    pub lighting: Vec<u8>,
    pub clipnodes: Vec<DClipNode>,
    pub leafs: Vec<DLeaf>,
    pub marksurfaces: Vec<u16>,
    pub edges: Vec<DEdge>,
    pub surfedges: Vec<i32>,
    pub models: Vec<DModel>,
}

impl Default for BspBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BspBuilder {
    /// An empty level. Edge 0 is reserved, as the map compiler does, since
    /// a surfedge of 0 cannot carry a direction.
    pub fn new() -> Self {
        BspBuilder {
            entities: "{\n\"classname\" \"worldspawn\"\n}\n".to_string(),
            planes: Vec::new(),
            textures: Vec::new(),
            vertexes: vec![DVertex::default()],
            visdata: Vec::new(),
            nodes: Vec::new(),
            texinfo: Vec::new(),
            faces: Vec::new(),
            lighting: Vec::new(),
            clipnodes: Vec::new(),
            leafs: Vec::new(),
            marksurfaces: Vec::new(),
            edges: vec![DEdge::default()],
            surfedges: Vec::new(),
            models: Vec::new(),
        }
    }

    pub fn add_plane(&mut self, normal: Vec3, dist: f32) -> i32 {
        let (ax, ay, az) = (normal[0].abs(), normal[1].abs(), normal[2].abs());
        let plane_type = if ax == 1.0 {
            0
        } else if ay == 1.0 {
            1
        } else if az == 1.0 {
            2
        } else if ax >= ay && ax >= az {
            PLANE_ANYX as i32
        } else if ay >= az {
            PLANE_ANYY as i32
        } else {
            PLANE_ANYZ as i32
        };
        self.planes.push(DPlane { normal, dist, plane_type });
        self.planes.len() as i32 - 1
    }

    pub fn add_texture(&mut self, name: &str, width: u32, height: u32) -> i32 {
        self.textures.push(Some(DMiptex {
            name: name.to_string(),
            width,
            height,
            offsets: [0; MIPLEVELS],
        }));
        self.textures.len() as i32 - 1
    }

    pub fn add_missing_texture(&mut self) -> i32 {
        self.textures.push(None);
        self.textures.len() as i32 - 1
    }

    pub fn add_texinfo(&mut self, s: [f32; 4], t: [f32; 4], miptex: i32, flags: i32) -> i16 {
        self.texinfo.push(DTexInfo { vecs: [s, t], miptex, flags });
        self.texinfo.len() as i16 - 1
    }

    /// Add a polygon. Odd edges are stored reversed and referenced through
    /// negative surfedges so both directions get exercised.
    pub fn add_face(
        &mut self,
        plane: i32,
        side: i16,
        points: &[Vec3],
        texinfo: i16,
        styles: [u8; MAXLIGHTMAPS],
        lightofs: i32,
    ) -> u16 {
        let firstvert = self.vertexes.len() as u16;
        for p in points {
            self.vertexes.push(DVertex { point: *p });
        }
        let firstedge = self.surfedges.len() as i32;
        let n = points.len() as u16;
        for i in 0..n {
            let a = firstvert + i;
            let b = firstvert + (i + 1) % n;
            let edge = self.edges.len() as i32;
            if i % 2 == 0 {
                self.edges.push(DEdge { v: [a, b] });
                self.surfedges.push(edge);
            } else {
                self.edges.push(DEdge { v: [b, a] });
                self.surfedges.push(-edge);
            }
        }
        self.faces.push(DFace {
            planenum: plane as i16,
            side,
            firstedge,
            numedges: n as i16,
            texinfo,
            styles,
            lightofs,
        });
        self.faces.len() as u16 - 1
    }

    pub fn add_leaf(&mut self, contents: Contents, visofs: i32, mins: [i16; 3], maxs: [i16; 3], marks: &[u16]) -> usize {
        let firstmarksurface = self.marksurfaces.len() as u16;
        self.marksurfaces.extend_from_slice(marks);
        self.leafs.push(DLeaf {
            contents: contents.code(),
            visofs,
            mins,
            maxs,
            firstmarksurface,
            nummarksurfaces: marks.len() as u16,
            ambient_level: [0; NUM_AMBIENTS],
        });
        self.leafs.len() - 1
    }

    pub fn add_node(
        &mut self,
        plane: i32,
        children: [i16; 2],
        mins: [i16; 3],
        maxs: [i16; 3],
        firstface: u16,
        numfaces: u16,
    ) -> i16 {
        self.nodes.push(DNode { planenum: plane, children, mins, maxs, firstface, numfaces });
        self.nodes.len() as i16 - 1
    }

    pub fn add_clipnode(&mut self, plane: i32, children: [Contents; 2]) -> i16 {
        self.clipnodes.push(DClipNode { planenum: plane, children: children.map(|c| c.code() as i16) });
        self.clipnodes.len() as i16 - 1
    }

    /// A single all-empty clipnode for levels whose tests never use hulls
    /// 1 and 2.
    pub fn add_clip_hulls(&mut self) {
        if self.clipnodes.is_empty() {
            self.add_clipnode(0, [Contents::Empty, Contents::Empty]);
        }
    }

    pub fn add_world_model(&mut self, visleafs: i32, firstface: i32, numfaces: i32) {
        self.models.push(DModel {
            mins: [-1024.0; 3],
            maxs: [1024.0; 3],
            origin: [0.0; 3],
            headnode: [0; MAX_MAP_HULLS],
            visleafs,
            firstface,
            numfaces,
        });
    }

    fn texture_lump(&self) -> Vec<u8> {
        if self.textures.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(self.textures.len() as i32).to_le_bytes());
        let dir = out.len();
        out.resize(dir + 4 * self.textures.len(), 0);
        for (i, tex) in self.textures.iter().enumerate() {
            let ofs = match tex {
                None => -1,
                Some(mt) => {
                    let ofs = out.len() as i32;
                    let mut mt = mt.clone();
                    let base = (mt.width * mt.height) as u32;
                    let header = DMiptex::SIZE as u32;
                    mt.offsets = [header, header + base, header + base + base / 4, header + base + base / 4 + base / 16];
                    mt.write(&mut out);
                    let pixels = mt.pixel_size().unwrap_or(0);
                    out.extend((0..pixels).map(|p| (p % 251) as u8));
                    ofs
                }
            };
            out[dir + i * 4..dir + i * 4 + 4].copy_from_slice(&ofs.to_le_bytes());
        }
        out
    }

    /// Serialize to a level file.
    pub fn build(&self) -> Vec<u8> {
        fn records<T: LumpRecord>(items: &[T]) -> Vec<u8> {
            let mut out = Vec::with_capacity(items.len() * T::SIZE);
            for item in items {
                item.write(&mut out);
            }
            out
        }

        let mut lumps: Vec<Vec<u8>> = vec![Vec::new(); HEADER_LUMPS];
        lumps[LUMP_ENTITIES] = self.entities.clone().into_bytes();
        lumps[LUMP_ENTITIES].push(0);
        lumps[LUMP_PLANES] = records(&self.planes);
        lumps[LUMP_TEXTURES] = self.texture_lump();
        lumps[LUMP_VERTEXES] = records(&self.vertexes);
        lumps[LUMP_VISIBILITY] = self.visdata.clone();
        lumps[LUMP_NODES] = records(&self.nodes);
        lumps[LUMP_TEXINFO] = records(&self.texinfo);
        lumps[LUMP_FACES] = records(&self.faces);
        lumps[LUMP_LIGHTING] = self.lighting.clone();
        lumps[LUMP_CLIPNODES] = records(&self.clipnodes);
        lumps[LUMP_LEAFS] = records(&self.leafs);
        let marks: Vec<DMarkSurface> = self.marksurfaces.iter().map(|&m| DMarkSurface(m)).collect();
        lumps[LUMP_MARKSURFACES] = records(&marks);
        lumps[LUMP_EDGES] = records(&self.edges);
        let surfedges: Vec<DSurfEdge> = self.surfedges.iter().map(|&e| DSurfEdge(e)).collect();
        lumps[LUMP_SURFEDGES] = records(&surfedges);
        lumps[LUMP_MODELS] = records(&self.models);

        let mut header = DHeader { version: BSPVERSION, lumps: [Lump::default(); HEADER_LUMPS] };
        let mut body = Vec::new();
        for (i, lump) in lumps.iter().enumerate() {
            // keep lumps 4-byte aligned like the map compiler
            while body.len() % 4 != 0 {
                body.push(0);
            }
            header.lumps[i] = Lump { fileofs: (HEADER_SIZE + body.len()) as i32, filelen: lump.len() as i32 };
            body.extend_from_slice(lump);
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        out
    }
}

/// Load bytes produced by a builder, panicking on error.
pub fn load(bytes: &[u8]) -> BrushModel {
    match load_brush_model("maps/test.bsp", bytes) {
        Ok(m) => m,
        Err(e) => panic!("test level failed to load: {e}"),
    }
}

/// Finish a builder holding only faces: one node on the first face's plane
/// with a solid leaf in front and an empty leaf behind holding `faces`.
pub fn wrap_single_leaf(b: &mut BspBuilder, faces: &[u16]) {
    let plane = b.faces[faces[0] as usize].planenum as i32;
    b.add_leaf(Contents::Solid, -1, [0; 3], [0; 3], &[]);
    let open = b.add_leaf(Contents::Empty, -1, [-1024; 3], [1024; 3], faces);
    b.add_node(plane, [leaf(0), leaf(open)], [-1024; 3], [1024; 3], faces[0], faces.len() as u16);
    b.add_clip_hulls();
    b.add_world_model(1, 0, b.faces.len() as i32);
}

// ============================================================
// Canned levels
// ============================================================

/// Two leafs split by the plane x = 0: solid leaf 0 in front (x >= 0),
/// empty leaf 1 behind. Face 0 and face 1 share the wall at x = 0 facing
/// -x, with texture extents (32, 16); face 0 has no light samples, face 1
/// has one style of samples. Hull 1 and hull 2 put the wall at x = -16 and
/// x = -32.
pub fn two_leaf_builder() -> BspBuilder {
    let mut b = BspBuilder::new();
    let wall = b.add_plane([1.0, 0.0, 0.0], 0.0);
    let wall16 = b.add_plane([1.0, 0.0, 0.0], -16.0);
    let wall32 = b.add_plane([1.0, 0.0, 0.0], -32.0);
    let tex = b.add_texture("wall", 16, 16);
    let ti = b.add_texinfo([0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], tex, 0);

    let quad = [[0.0, 0.0, 0.0], [0.0, 32.0, 0.0], [0.0, 32.0, 16.0], [0.0, 0.0, 16.0]];
    let f0 = b.add_face(wall, 1, &quad, ti, [0, 255, 255, 255], -1);
    b.lighting = vec![10, 20, 30, 40, 50, 60];
    let f1 = b.add_face(wall, 1, &quad, ti, [0, 255, 255, 255], 0);

    b.add_leaf(Contents::Solid, -1, [0, -64, -64], [64, 64, 64], &[]);
    b.visdata = vec![0x01];
    let open = b.add_leaf(Contents::Empty, 0, [-64, -64, -64], [0, 64, 64], &[f0, f1]);
    b.add_node(wall, [leaf(0), leaf(open)], [-64; 3], [64; 3], f0, 2);

    b.add_clipnode(wall16, [Contents::Solid, Contents::Empty]);
    b.add_clipnode(wall32, [Contents::Solid, Contents::Empty]);
    b.add_world_model(1, 0, 2);
    b.models[0].mins = [-64.0; 3];
    b.models[0].maxs = [64.0; 3];
    b.models[0].headnode = [0, 0, 1, 0];
    b
}

pub fn two_leaf_map() -> Vec<u8> {
    two_leaf_builder().build()
}

/// Three empty leafs along x, split at x = 0 and x = 64:
///
/// ```text
///   leaf 1 (x < 0) | leaf 2 (0 < x < 64) | leaf 3 (x > 64)
/// ```
///
/// Face 0 sits on x = 0 facing -x (texture 0). Face 1 sits on x = 64 facing
/// -x (texture 0), face 2 on x = 64 facing +x (texture 1). Leaf 1 sees
/// leafs 1-2, leaf 2 sees all, leaf 3 sees leafs 2-3. No light data.
pub fn corridor_builder() -> BspBuilder {
    let mut b = BspBuilder::new();
    let p0 = b.add_plane([1.0, 0.0, 0.0], 0.0);
    let p1 = b.add_plane([1.0, 0.0, 0.0], 64.0);
    let brick = b.add_texture("brick", 16, 16);
    let metal = b.add_texture("metal", 16, 16);
    let ti_brick = b.add_texinfo([0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], brick, 0);
    let ti_metal = b.add_texinfo([0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], metal, 0);

    let quad = |x: f32| [[x, 0.0, 0.0], [x, 32.0, 0.0], [x, 32.0, 32.0], [x, 0.0, 32.0]];
    let f0 = b.add_face(p0, 1, &quad(0.0), ti_brick, [0, 255, 255, 255], -1);
    let f1 = b.add_face(p1, 1, &quad(64.0), ti_brick, [0, 255, 255, 255], -1);
    let f2 = b.add_face(p1, 0, &quad(64.0), ti_metal, [0, 255, 255, 255], -1);

    b.visdata = vec![0x03, 0x07, 0x06];
    b.add_leaf(Contents::Solid, -1, [0; 3], [0; 3], &[]);
    let l1 = b.add_leaf(Contents::Empty, 0, [-128, -64, -64], [0, 64, 64], &[f0]);
    let l2 = b.add_leaf(Contents::Empty, 1, [0, -64, -64], [64, 64, 64], &[f0, f1]);
    let l3 = b.add_leaf(Contents::Empty, 2, [64, -64, -64], [192, 64, 64], &[f2]);

    b.add_node(p0, [1, leaf(l1)], [-128, -64, -64], [192, 64, 64], f0, 1);
    b.add_node(p1, [leaf(l3), leaf(l2)], [0, -64, -64], [192, 64, 64], f1, 2);

    b.add_clip_hulls();
    b.add_world_model(3, 0, 3);
    b
}

pub fn corridor_map() -> Vec<u8> {
    corridor_builder().build()
}

/// A floor at z = 0 facing up: empty leaf 1 above, solid leaf 0 below.
/// The floor face spans 0..32 in x and y with a 3x3 sample grid holding
/// 0, 10, 20 .. 80 (row-major, t along y).
pub fn floor_builder() -> BspBuilder {
    let mut b = BspBuilder::new();
    let floor = b.add_plane([0.0, 0.0, 1.0], 0.0);
    let tex = b.add_texture("floor", 16, 16);
    let ti = b.add_texinfo([1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], tex, 0);
    let quad = [[0.0, 0.0, 0.0], [32.0, 0.0, 0.0], [32.0, 32.0, 0.0], [0.0, 32.0, 0.0]];
    b.lighting = (0..9).map(|i| i * 10).collect();
    let f = b.add_face(floor, 0, &quad, ti, [0, 255, 255, 255], 0);

    b.visdata = vec![0x01];
    b.add_leaf(Contents::Solid, -1, [-64, -64, -64], [64, 64, 0], &[]);
    let open = b.add_leaf(Contents::Empty, 0, [-64, -64, 0], [64, 64, 64], &[f]);
    b.add_node(floor, [leaf(open), leaf(0)], [-64; 3], [64; 3], f, 1);
    b.add_clip_hulls();
    b.add_world_model(1, 0, 1);
    b
}

pub fn floor_map() -> Vec<u8> {
    floor_builder().build()
}

/// `count` empty leafs in a row along x with no visibility data. Node `k`
/// splits at x = 64k with leaf `k + 1` behind it, so leaf 1 is x < 0 and
/// leaf `count` lies past the last split. No faces.
pub fn hall_builder(count: usize) -> BspBuilder {
    assert!(count >= 2, "a hall needs at least one split");
    let mut b = BspBuilder::new();
    b.add_leaf(Contents::Solid, -1, [0; 3], [0; 3], &[]);
    for j in 1..=count {
        let x = 64 * j as i16;
        b.add_leaf(Contents::Empty, -1, [x - 128, -64, -64], [x - 64, 64, 64], &[]);
    }
    let end = 64 * (count as i16 - 1);
    for k in 0..count - 1 {
        let p = b.add_plane([1.0, 0.0, 0.0], 64.0 * k as f32);
        let front = if k + 2 < count { (k + 1) as i16 } else { leaf(count) };
        let x = 64 * k as i16;
        b.add_node(p, [front, leaf(k + 1)], [x - 64, -64, -64], [end, 64, 64], 0, 0);
    }
    b.add_clip_hulls();
    b.add_world_model(count as i32, 0, 0);
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_levels_load() {
        let two = load(&two_leaf_map());
        assert_eq!(two.surfaces.len(), 2);
        let corridor = load(&corridor_map());
        assert_eq!(corridor.leafs.len(), 4);
        assert_eq!(corridor.numleafs, 3);
        let floor = load(&floor_map());
        assert_eq!(floor.lightdata.len(), 9);
    }

    #[test]
    fn test_leaf_child_encoding() {
        assert_eq!(leaf(0), -1);
        assert_eq!(leaf(3), -4);
    }

    #[test]
    fn test_lumps_aligned() {
        let bytes = two_leaf_map();
        let header = DHeader::parse("t", &bytes).unwrap();
        for l in &header.lumps {
            assert_eq!(l.fileofs % 4, 0);
        }
    }
}

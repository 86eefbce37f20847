// model.rs — in-memory brush model: planes, nodes, leafs, hulls, surfaces
//
// Everything here is built once by `model_load` and is read-only afterwards.
// Per-frame stamps (visframe, texture chains, dynamic light bits) are kept
// by the renderer in its own frame state, indexed by node/leaf/surface.

use std::sync::Arc;

use bitflags::bitflags;

use crate::bspfile::{MAXLIGHTMAPS, MAX_MAP_HULLS, NUM_AMBIENTS};
use crate::q_shared::{CPlane, Vec3};

// ============================================================
// Contents
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Contents {
    Empty = -1,
    Solid = -2,
    Water = -3,
    Slime = -4,
    Lava = -5,
    Sky = -6,
    Origin = -7,
    Clip = -8,
    Current0 = -9,
    Current90 = -10,
    Current180 = -11,
    Current270 = -12,
    CurrentUp = -13,
    CurrentDown = -14,
}

impl Contents {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Contents::Empty,
            -2 => Contents::Solid,
            -3 => Contents::Water,
            -4 => Contents::Slime,
            -5 => Contents::Lava,
            -6 => Contents::Sky,
            -7 => Contents::Origin,
            -8 => Contents::Clip,
            -9 => Contents::Current0,
            -10 => Contents::Current90,
            -11 => Contents::Current180,
            -12 => Contents::Current270,
            -13 => Contents::CurrentUp,
            -14 => Contents::CurrentDown,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_current(self) -> bool {
        let c = self.code();
        c <= Contents::Current0.code() && c >= Contents::CurrentDown.code()
    }

    /// Currents are water as far as movement is concerned.
    pub fn without_currents(self) -> Self {
        if self.is_current() {
            Contents::Water
        } else {
            self
        }
    }

    /// Water, slime and lava.
    pub fn is_liquid(self) -> bool {
        matches!(self, Contents::Water | Contents::Slime | Contents::Lava) || self.is_current()
    }
}

// ============================================================
// Tree
// ============================================================

/// A render-node child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeChild {
    Node(usize),
    Leaf(usize),
}

impl NodeChild {
    /// Decode the on-disk child: negative `c` is leaf `-(c + 1)`.
    pub fn from_disk(c: i32) -> Self {
        if c >= 0 {
            NodeChild::Node(c as usize)
        } else {
            NodeChild::Leaf((-(c + 1)) as usize)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MNode {
    pub plane: usize,
    pub children: [NodeChild; 2],
    pub mins: Vec3,
    pub maxs: Vec3,
    pub parent: Option<usize>,
    pub firstsurface: usize,
    pub numsurfaces: usize,
}

#[derive(Debug, Clone)]
pub struct MLeaf {
    pub contents: Contents,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub parent: Option<usize>,
    /// Offset of this leaf's compressed row in `visdata`, `None` if the
    /// leaf carries no visibility information.
    pub visofs: Option<usize>,
    pub firstmarksurface: usize,
    pub nummarksurfaces: usize,
    pub ambient_level: [u8; NUM_AMBIENTS],
}

/// A collision-node child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HullChild {
    Node(usize),
    Contents(Contents),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipNode {
    pub plane: usize,
    pub children: [HullChild; 2],
}

/// A collision tree pre-expanded for one box size. Clipnodes and planes are
/// shared with every other hull and submodel that uses them.
#[derive(Debug, Clone)]
pub struct Hull {
    pub clipnodes: Arc<[ClipNode]>,
    pub planes: Arc<[CPlane]>,
    pub firstclipnode: usize,
    pub lastclipnode: usize,
    pub clip_mins: Vec3,
    pub clip_maxs: Vec3,
}

impl Hull {
    pub fn with_head(&self, headnode: usize) -> Hull {
        Hull { firstclipnode: headnode, ..self.clone() }
    }
}

pub const HULL1_MINS: Vec3 = [-16.0, -16.0, -24.0];
pub const HULL1_MAXS: Vec3 = [16.0, 16.0, 32.0];
pub const HULL2_MINS: Vec3 = [-32.0, -32.0, -24.0];
pub const HULL2_MAXS: Vec3 = [32.0, 32.0, 64.0];

// ============================================================
// Surfaces & textures
// ============================================================

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfFlags: u32 {
        const PLANEBACK      = 0x02;
        const DRAWSKY        = 0x04;
        const DRAWSPRITE     = 0x08;
        const DRAWTURB       = 0x10;
        const DRAWTILED      = 0x20;
        const DRAWBACKGROUND = 0x40;
        const UNDERWATER     = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MTexInfo {
    pub vecs: [[f32; 4]; 2],
    /// Index into `BrushModel::textures`.
    pub texture: usize,
    pub flags: i32,
}

impl MTexInfo {
    /// Texture-space coordinate along axis 0 (s) or 1 (t).
    #[inline]
    pub fn coord(&self, axis: usize, p: &Vec3) -> f32 {
        let v = &self.vecs[axis];
        p[0] * v[0] + p[1] * v[1] + p[2] * v[2] + v[3]
    }
}

#[derive(Debug, Clone)]
pub struct MSurface {
    pub plane: usize,
    pub flags: SurfFlags,
    pub firstedge: usize,
    pub numedges: usize,
    pub texinfo: usize,
    pub texturemins: [i32; 2],
    pub extents: [i32; 2],
    /// 255 marks an unused slot.
    pub styles: [u8; MAXLIGHTMAPS],
    /// Offset into `lightdata`, `None` when the face has no samples.
    pub samples: Option<usize>,
}

impl MSurface {
    /// Lightmap size in texels, one texel per 16 texture units.
    pub fn lightmap_size(&self) -> (usize, usize) {
        (((self.extents[0] >> 4) + 1) as usize, ((self.extents[1] >> 4) + 1) as usize)
    }

    /// Number of lightstyles in use, stopping at the first 255.
    pub fn num_styles(&self) -> usize {
        self.styles.iter().take_while(|&&s| s != 255).count()
    }
}

/// A texture as referenced by the world. Animation links are texture
/// indices set up at load time.
#[derive(Debug, Clone, Default)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Four mip levels back to back, full size first.
    pub pixels: Vec<u8>,
    pub anim_total: i32,
    pub anim_min: i32,
    pub anim_max: i32,
    pub anim_next: Option<usize>,
    pub alternate_anims: Option<usize>,
}

impl Texture {
    pub fn is_sky(&self) -> bool {
        self.name.starts_with("sky")
    }

    pub fn is_turbulent(&self) -> bool {
        self.name.starts_with('*')
    }
}

// ============================================================
// Submodels & the brush model
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub radius: f32,
    pub headnode: [usize; MAX_MAP_HULLS],
    pub visleafs: usize,
    pub firstface: usize,
    pub numfaces: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MEdge {
    pub v: [usize; 2],
}

/// The loaded level. Submodel 0 is the world itself; the others are the
/// inline brush entities (doors, platforms) that share its lumps.
#[derive(Debug, Clone)]
pub struct BrushModel {
    pub name: String,
    pub planes: Arc<[CPlane]>,
    pub vertexes: Vec<Vec3>,
    pub edges: Vec<MEdge>,
    pub surfedges: Vec<i32>,
    pub texinfo: Vec<MTexInfo>,
    pub textures: Vec<Texture>,
    pub surfaces: Vec<MSurface>,
    pub marksurfaces: Vec<usize>,
    pub nodes: Vec<MNode>,
    pub leafs: Vec<MLeaf>,
    pub hulls: [Hull; 3],
    pub submodels: Vec<SubModel>,
    pub visdata: Vec<u8>,
    pub lightdata: Vec<u8>,
    pub entities: String,
    /// Number of leafs covered by the visibility rows, leaf 0 excluded.
    pub numleafs: usize,
    pub checksum: u32,
    pub checksum2: u32,
}

impl BrushModel {
    #[inline]
    pub fn node_plane(&self, node: usize) -> &CPlane {
        &self.planes[self.nodes[node].plane]
    }

    #[inline]
    pub fn surface_plane(&self, surf: usize) -> &CPlane {
        &self.planes[self.surfaces[surf].plane]
    }

    pub fn surface_texinfo(&self, surf: usize) -> &MTexInfo {
        &self.texinfo[self.surfaces[surf].texinfo]
    }

    pub fn surface_texture(&self, surf: usize) -> usize {
        self.surface_texinfo(surf).texture
    }

    /// Marksurface indices of a leaf, resolved to surface indices.
    pub fn leaf_surfaces(&self, leaf: usize) -> &[usize] {
        let l = &self.leafs[leaf];
        &self.marksurfaces[l.firstmarksurface..l.firstmarksurface + l.nummarksurfaces]
    }

    /// Surface indices owned by a node.
    pub fn node_surfaces(&self, node: usize) -> std::ops::Range<usize> {
        let n = &self.nodes[node];
        n.firstsurface..n.firstsurface + n.numsurfaces
    }

    /// Vertex `i` of a surface's edge loop.
    pub fn surface_vertex(&self, surf: usize, i: usize) -> Vec3 {
        let s = &self.surfaces[surf];
        let e = self.surfedges[s.firstedge + i];
        let v = if e >= 0 {
            self.edges[e as usize].v[0]
        } else {
            self.edges[(-e) as usize].v[1]
        };
        self.vertexes[v]
    }

    /// Bounding box of a child, for culling.
    pub fn child_bounds(&self, child: NodeChild) -> (&Vec3, &Vec3) {
        match child {
            NodeChild::Node(n) => (&self.nodes[n].mins, &self.nodes[n].maxs),
            NodeChild::Leaf(l) => (&self.leafs[l].mins, &self.leafs[l].maxs),
        }
    }

    /// Bytes in one decompressed visibility row.
    pub fn vis_row_bytes(&self) -> usize {
        (self.numleafs + 7) >> 3
    }

    /// Hull `index` rooted at `submodel`'s head node for that hull.
    pub fn submodel_hull(&self, submodel: usize, index: usize) -> Hull {
        self.hulls[index].with_head(self.submodels[submodel].headnode[index])
    }
}

/// Mod_PointInLeaf: walk the render nodes down to the leaf containing `p`.
pub fn point_in_leaf(model: &BrushModel, p: &Vec3) -> usize {
    let mut node = 0;
    loop {
        let d = model.node_plane(node).distance(p);
        let child = model.nodes[node].children[if d > 0.0 { 0 } else { 1 }];
        match child {
            NodeChild::Node(n) => node = n,
            NodeChild::Leaf(l) => return l,
        }
    }
}

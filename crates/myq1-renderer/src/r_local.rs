// r_local.rs — shared renderer types: errors, view, per-frame state

use std::collections::HashSet;

use thiserror::Error;

use myq1_common::q_shared::{angle_vectors, dot_product, CPlane, Vec3, PLANE_ANYZ};
use myq1_common::BrushModel;

pub const MAX_DLIGHTS: usize = 32;
pub const MAX_LIGHTSTYLES: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("lightmap pages exhausted ({max} pages)")]
    LightmapsFull { max: usize },

    #[error("lightmap block {w}x{h} does not fit a page")]
    BlockTooLarge { w: usize, h: usize },

    #[error("unknown cvar {0}")]
    UnknownCvar(String),

    #[error("bad value {value:?} for {name}")]
    BadCvarValue { name: String, value: String },

    #[error("light style {index} out of range")]
    BadLightStyle { index: usize },
}

// ============================================================
// Dynamic lights
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DLight {
    /// Owning entity, so it can reuse its slot.
    pub key: i32,
    pub origin: Vec3,
    pub radius: f32,
    /// Time the light stops, 0 for no limit.
    pub die: f32,
    /// Radius drop per second.
    pub decay: f32,
    /// Don't add when contributing less.
    pub minlight: f32,
}

impl DLight {
    pub fn is_active(&self, time: f32) -> bool {
        self.radius > 0.0 && (self.die == 0.0 || self.die >= time)
    }
}

// ============================================================
// View
// ============================================================

/// Camera position, axes and the four side planes of its frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub origin: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub fov_x: f32,
    pub fov_y: f32,
    /// Left, right, bottom, top. Normals face into the view volume.
    pub frustum: [CPlane; 4],
}

fn frustum_plane(origin: &Vec3, normal: Vec3) -> CPlane {
    CPlane::new(normal, dot_product(origin, &normal), PLANE_ANYZ)
}

impl ViewParams {
    /// `angles` are pitch, yaw, roll in degrees; fov in degrees.
    pub fn new(origin: Vec3, angles: Vec3, fov_x: f32, fov_y: f32) -> Self {
        let (forward, right, up) = angle_vectors(&angles);
        Self::from_axes(origin, forward, right, up, fov_x, fov_y)
    }

    pub fn from_axes(origin: Vec3, forward: Vec3, right: Vec3, up: Vec3, fov_x: f32, fov_y: f32) -> Self {
        let (sx, cx) = (fov_x.to_radians() * 0.5).sin_cos();
        let (sy, cy) = (fov_y.to_radians() * 0.5).sin_cos();
        let side = |axis: &Vec3, s: f32, c: f32| {
            [
                forward[0] * s + axis[0] * c,
                forward[1] * s + axis[1] * c,
                forward[2] * s + axis[2] * c,
            ]
        };
        let frustum = [
            frustum_plane(&origin, side(&right, sx, cx)),
            frustum_plane(&origin, side(&right, sx, -cx)),
            frustum_plane(&origin, side(&up, sy, cy)),
            frustum_plane(&origin, side(&up, sy, -cy)),
        ];
        ViewParams { origin, forward, right, up, fov_x, fov_y, frustum }
    }
}

// ============================================================
// Texture chains
// ============================================================

/// Per-texture singly linked lists of surfaces, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct TextureChains {
    heads: Vec<Option<usize>>,
    tails: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
}

impl TextureChains {
    pub fn new(numtextures: usize, numsurfaces: usize) -> Self {
        TextureChains {
            heads: vec![None; numtextures],
            tails: vec![None; numtextures],
            next: vec![None; numsurfaces],
        }
    }

    /// Append a surface to a texture's chain. A surface belongs to at most
    /// one chain per frame.
    pub fn push(&mut self, texture: usize, surf: usize) {
        self.next[surf] = None;
        match self.tails[texture] {
            Some(tail) => self.next[tail] = Some(surf),
            None => self.heads[texture] = Some(surf),
        }
        self.tails[texture] = Some(surf);
    }

    /// Surfaces chained on `texture`, first pushed first.
    pub fn iter(&self, texture: usize) -> ChainIter<'_> {
        ChainIter { chains: self, cur: self.heads.get(texture).copied().flatten() }
    }

    /// Textures with a non-empty chain.
    pub fn textures(&self) -> impl Iterator<Item = usize> + '_ {
        self.heads.iter().enumerate().filter(|(_, h)| h.is_some()).map(|(i, _)| i)
    }

    pub fn is_empty(&self) -> bool {
        self.heads.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        self.heads.fill(None);
        self.tails.fill(None);
    }
}

pub struct ChainIter<'a> {
    chains: &'a TextureChains,
    cur: Option<usize>,
}

impl Iterator for ChainIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let surf = self.cur?;
        self.cur = self.chains.next[surf];
        Some(surf)
    }
}

// ============================================================
// Frame state
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Surfaces put on a chain.
    pub brush_polys: usize,
    /// Nodes and leafs entered by the world walk.
    pub nodes_visited: usize,
    /// Surfaces whose lightmap was rebuilt.
    pub lightmap_rebuilds: usize,
}

/// Everything the world walk produces for one frame. `begin` must be called
/// with a new frame number before each walk.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub framecount: u32,
    pub time: f32,
    /// Frame number on which each surface was last marked by a visible leaf.
    pub surf_visframe: Vec<u32>,
    pub chains: TextureChains,
    /// Chained surfaces in emission order.
    pub visible_surfaces: Vec<usize>,
    /// Bit `i` set when dynamic light `i` touches the surface this frame.
    pub dlight_bits: Vec<u32>,
    pub visible_entities: Vec<usize>,
    entity_seen: HashSet<usize>,
    pub stats: FrameStats,
}

impl FrameContext {
    pub fn new(model: &BrushModel) -> Self {
        FrameContext {
            framecount: 0,
            time: 0.0,
            surf_visframe: vec![0; model.surfaces.len()],
            chains: TextureChains::new(model.textures.len(), model.surfaces.len()),
            visible_surfaces: Vec::new(),
            dlight_bits: vec![0; model.surfaces.len()],
            visible_entities: Vec::new(),
            entity_seen: HashSet::new(),
            stats: FrameStats::default(),
        }
    }

    pub fn begin(&mut self, framecount: u32, time: f32) {
        self.framecount = framecount;
        self.time = time;
        self.chains.clear();
        self.visible_surfaces.clear();
        self.dlight_bits.fill(0);
        self.visible_entities.clear();
        self.entity_seen.clear();
        self.stats = FrameStats::default();
    }

    pub fn surface_visible(&self, surf: usize) -> bool {
        self.framecount != 0 && self.surf_visframe[surf] == self.framecount
    }

    /// Record an entity as visible, once per frame.
    pub fn add_visible_entity(&mut self, key: usize) {
        if self.entity_seen.insert(key) {
            self.visible_entities.push(key);
        }
    }

    pub fn is_dlit(&self, surf: usize) -> bool {
        self.dlight_bits[surf] != 0
    }
}

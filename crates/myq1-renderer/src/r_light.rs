// r_light.rs — lightstyles, dynamic light marking, light sampling at a point

use myq1_common::bspfile::MAXLIGHTMAPS;
use myq1_common::model::{BrushModel, NodeChild, SurfFlags};
use myq1_common::q_shared::{vector_length, vector_lerp, vector_subtract, Vec3};

use crate::r_config::RenderConfig;
use crate::r_local::{DLight, FrameContext, RefError, MAX_DLIGHTS, MAX_LIGHTSTYLES};

/// Style scale for "normal" light, 8.8 fixed point.
pub const NORMAL_LIGHT: i32 = 256;

/// How far below a point `light_point` looks for a lit surface.
const LIGHT_PROBE_DEPTH: f32 = 2048.0;

// ============================================================
// Lightstyles
// ============================================================

/// Animated light levels. Each style is a string of 'a' (dark) to 'z'
/// (double bright) stepped at ten characters per second.
#[derive(Debug, Clone)]
pub struct LightStyles {
    maps: Vec<String>,
    /// Current scale per style index; indices past the string table stay
    /// at normal.
    values: [i32; 256],
}

impl Default for LightStyles {
    fn default() -> Self {
        Self::new()
    }
}

impl LightStyles {
    pub fn new() -> Self {
        LightStyles { maps: vec![String::new(); MAX_LIGHTSTYLES], values: [NORMAL_LIGHT; 256] }
    }

    pub fn set_style(&mut self, index: usize, map: &str) -> Result<(), RefError> {
        let slot = self.maps.get_mut(index).ok_or(RefError::BadLightStyle { index })?;
        *slot = map.to_string();
        Ok(())
    }

    pub fn style(&self, index: usize) -> Option<&str> {
        self.maps.get(index).map(String::as_str)
    }

    /// R_AnimateLight
    pub fn animate(&mut self, time: f32) {
        let i = (time * 10.0) as i32;
        for (j, map) in self.maps.iter().enumerate() {
            let bytes = map.as_bytes();
            if bytes.is_empty() {
                self.values[j] = NORMAL_LIGHT;
                continue;
            }
            let k = i.rem_euclid(bytes.len() as i32) as usize;
            self.values[j] = (bytes[k] as i32 - b'a' as i32) * 22;
        }
    }

    #[inline]
    pub fn value(&self, style: u8) -> i32 {
        self.values[style as usize]
    }
}

// ============================================================
// Dynamic light marking
// ============================================================

/// R_MarkLights: OR `bit` into every surface of the nodes the light's
/// sphere reaches.
pub fn mark_lights(model: &BrushModel, light: &DLight, bit: u32, child: NodeChild, frame: &mut FrameContext) {
    let mut child = child;
    loop {
        let node = match child {
            NodeChild::Leaf(_) => return,
            NodeChild::Node(n) => n,
        };
        let dist = model.node_plane(node).distance(&light.origin);
        let children = model.nodes[node].children;

        if dist > light.radius {
            child = children[0];
            continue;
        }
        if dist < -light.radius {
            child = children[1];
            continue;
        }

        // mark the polygons
        for surf in model.node_surfaces(node) {
            frame.dlight_bits[surf] |= bit;
        }

        mark_lights(model, light, bit, children[0], frame);
        child = children[1];
    }
}

/// R_PushDlights: mark every active light into the frame's surface bits.
pub fn push_dlights(model: &BrushModel, dlights: &[DLight], frame: &mut FrameContext, config: &RenderConfig) {
    if !config.dynamic {
        return;
    }
    let head = NodeChild::Node(model.submodels[0].headnode[0]);
    for (i, light) in dlights.iter().take(MAX_DLIGHTS).enumerate() {
        if !light.is_active(frame.time) {
            continue;
        }
        mark_lights(model, light, 1 << i, head, frame);
    }
}

// ============================================================
// Light point
// ============================================================

/// Where a downward probe met the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSpot {
    pub spot: Vec3,
    /// Index of the plane that was crossed.
    pub plane: usize,
    /// Surface the spot lies on.
    pub surface: usize,
    /// Sampled light, 0..=255 per style at normal scale.
    pub light: i32,
}

fn sample_surface(model: &BrushModel, styles: &LightStyles, surf: usize, mid: &Vec3) -> Option<i32> {
    let s = &model.surfaces[surf];
    if s.flags.contains(SurfFlags::DRAWTILED) {
        // no lightmaps
        return None;
    }

    let tex = model.surface_texinfo(surf);
    let ds = tex.coord(0, mid) as i32 - s.texturemins[0];
    let dt = tex.coord(1, mid) as i32 - s.texturemins[1];
    if ds < 0 || dt < 0 || ds > s.extents[0] || dt > s.extents[1] {
        return None;
    }

    let Some(samples) = s.samples else {
        return Some(0);
    };

    let (smax, tmax) = s.lightmap_size();
    let size = smax * tmax;
    let mut ofs = samples + (dt >> 4) as usize * smax + (ds >> 4) as usize;
    let mut r = 0;
    for &style in s.styles.iter().take(MAXLIGHTMAPS).take_while(|&&st| st != 255) {
        let sample = model.lightdata.get(ofs).copied().unwrap_or(0) as i32;
        r += sample * styles.value(style);
        ofs += size;
    }
    Some(r >> 8)
}

/// RecursiveLightPoint: follow `start..end` down the render tree, front
/// side first, and sample the first lit surface found at a crossing.
pub fn recursive_light_point(
    model: &BrushModel,
    styles: &LightStyles,
    child: NodeChild,
    start: &Vec3,
    end: &Vec3,
) -> Option<LightSpot> {
    let node = match child {
        // didn't hit anything
        NodeChild::Leaf(_) => return None,
        NodeChild::Node(n) => n,
    };

    let plane = model.nodes[node].plane;
    let front = model.planes[plane].distance(start);
    let back = model.planes[plane].distance(end);
    let side = (front < 0.0) as usize;
    let children = model.nodes[node].children;

    if (back < 0.0) == (front < 0.0) {
        return recursive_light_point(model, styles, children[side], start, end);
    }

    let frac = front / (front - back);
    let mid = vector_lerp(start, end, frac);

    // go down front side
    if let Some(hit) = recursive_light_point(model, styles, children[side], start, &mid) {
        return Some(hit);
    }

    // check for impact on this node
    for surf in model.node_surfaces(node) {
        if let Some(light) = sample_surface(model, styles, surf, &mid) {
            return Some(LightSpot { spot: mid, plane, surface: surf, light });
        }
    }

    // go down back side
    recursive_light_point(model, styles, children[side ^ 1], &mid, end)
}

/// R_LightPoint: light level at `p` from the surface below it, plus every
/// active dynamic light within range.
pub fn light_point(model: &BrushModel, styles: &LightStyles, dlights: &[DLight], p: &Vec3, time: f32) -> i32 {
    if model.lightdata.is_empty() {
        return 255;
    }

    let end = [p[0], p[1], p[2] - LIGHT_PROBE_DEPTH];
    let head = NodeChild::Node(model.submodels[0].headnode[0]);
    let mut r = recursive_light_point(model, styles, head, p, &end).map_or(0, |spot| spot.light);

    for l in dlights.iter().take(MAX_DLIGHTS).filter(|l| l.is_active(time)) {
        let add = l.radius - vector_length(&vector_subtract(p, &l.origin));
        if add > 0.0 {
            r += add as i32;
        }
    }
    r
}

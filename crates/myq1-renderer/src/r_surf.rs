// r_surf.rs — visible leaf marking, world walk, texture chains

use log::warn;

use myq1_common::model::{BrushModel, Contents, NodeChild, SurfFlags};
use myq1_common::pvs::{leaf_pvs, VisBits};
use myq1_common::q_shared::{box_on_plane_side, Vec3};

use crate::r_config::RenderConfig;
use crate::r_efrag::Efrags;
use crate::r_local::{FrameContext, ViewParams};

/// Upper bound on `anim_next` steps before a cycle is considered broken.
const MAX_ANIM_STEPS: usize = 100;

// ============================================================
// Leaf marking
// ============================================================

/// Level-scoped visibility stamps for nodes and leafs. A node or leaf is
/// potentially visible when its stamp equals `visframecount`.
#[derive(Debug, Clone)]
pub struct VisMarks {
    pub visframecount: u32,
    node_visframe: Vec<u32>,
    leaf_visframe: Vec<u32>,
    oldviewleaf: Option<usize>,
    /// Nodes stamped by the last `mark_leaves`.
    pub nodes_marked: usize,
}

impl VisMarks {
    pub fn new(model: &BrushModel) -> Self {
        VisMarks {
            visframecount: 0,
            node_visframe: vec![0; model.nodes.len()],
            leaf_visframe: vec![0; model.leafs.len()],
            oldviewleaf: None,
            nodes_marked: 0,
        }
    }

    pub fn node_visible(&self, node: usize) -> bool {
        self.visframecount != 0 && self.node_visframe[node] == self.visframecount
    }

    pub fn leaf_visible(&self, leaf: usize) -> bool {
        self.visframecount != 0 && self.leaf_visframe[leaf] == self.visframecount
    }

    fn child_visible(&self, child: NodeChild) -> bool {
        match child {
            NodeChild::Node(n) => self.node_visible(n),
            NodeChild::Leaf(l) => self.leaf_visible(l),
        }
    }

    /// R_MarkLeaves: stamp every leaf in the view leaf's PVS and all of
    /// their ancestors. Returns false when nothing had to change.
    pub fn mark_leaves(&mut self, model: &BrushModel, viewleaf: usize, novis: bool) -> bool {
        if self.oldviewleaf == Some(viewleaf) && !novis {
            return false;
        }

        self.visframecount += 1;
        self.oldviewleaf = Some(viewleaf);
        self.nodes_marked = 0;

        let vis = if novis {
            VisBits::all(model.vis_row_bytes())
        } else {
            leaf_pvs(model, viewleaf)
        };

        let stamp = self.visframecount;
        for leaf in vis.leafs(model.numleafs) {
            if leaf >= model.leafs.len() {
                break;
            }
            self.leaf_visframe[leaf] = stamp;
            let mut parent = model.leafs[leaf].parent;
            while let Some(n) = parent {
                if self.node_visframe[n] == stamp {
                    break;
                }
                self.node_visframe[n] = stamp;
                self.nodes_marked += 1;
                parent = model.nodes[n].parent;
            }
        }
        true
    }
}

// ============================================================
// Culling & animation
// ============================================================

/// True when the box is entirely behind one of the frustum planes.
pub fn cull_box(view: &ViewParams, mins: &Vec3, maxs: &Vec3) -> bool {
    view.frustum.iter().any(|p| box_on_plane_side(mins, maxs, p) == 2)
}

/// The frame of an animating texture to show at `time`. A non-zero entity
/// frame selects the alternate sequence when the texture has one.
pub fn texture_animation(model: &BrushModel, base: usize, entity_frame: i32, time: f32) -> usize {
    let mut base = base;
    if entity_frame != 0 {
        if let Some(alt) = model.textures[base].alternate_anims {
            base = alt;
        }
    }

    let total = model.textures[base].anim_total;
    if total == 0 {
        return base;
    }

    let relative = ((time * 10.0) as i32).rem_euclid(total);
    let mut tex = base;
    for _ in 0..=MAX_ANIM_STEPS {
        let t = &model.textures[tex];
        if t.anim_min <= relative && relative < t.anim_max {
            return tex;
        }
        match t.anim_next {
            Some(next) => tex = next,
            None => {
                warn!("texture_animation: broken cycle at {}", t.name);
                return base;
            }
        }
    }
    warn!("texture_animation: infinite cycle at {}", model.textures[base].name);
    base
}

// ============================================================
// World walk
// ============================================================

struct WorldWalk<'a> {
    model: &'a BrushModel,
    marks: &'a VisMarks,
    efrags: &'a Efrags,
    view: &'a ViewParams,
    cull: bool,
    frame: &'a mut FrameContext,
}

impl WorldWalk<'_> {
    fn recursive_world_node(&mut self, child: NodeChild) {
        if !self.marks.child_visible(child) {
            return;
        }
        if let NodeChild::Leaf(l) = child {
            if self.model.leafs[l].contents == Contents::Solid {
                return;
            }
        }
        let (mins, maxs) = self.model.child_bounds(child);
        if self.cull && cull_box(self.view, mins, maxs) {
            return;
        }
        self.frame.stats.nodes_visited += 1;

        let node = match child {
            NodeChild::Leaf(l) => {
                let stamp = self.frame.framecount;
                for &surf in self.model.leaf_surfaces(l) {
                    self.frame.surf_visframe[surf] = stamp;
                }
                for &key in self.efrags.leaf_entities(l) {
                    self.frame.add_visible_entity(key);
                }
                return;
            }
            NodeChild::Node(n) => n,
        };

        // node is just a decision point
        let dot = self.model.node_plane(node).distance(&self.view.origin);
        let side = if dot >= 0.0 { 0 } else { 1 };
        let children = self.model.nodes[node].children;

        // recurse down the near side first
        self.recursive_world_node(children[side]);

        let back = dot < 0.0;
        for surf in self.model.node_surfaces(node) {
            if !self.frame.surface_visible(surf) {
                continue;
            }
            let flags = self.model.surfaces[surf].flags;
            // don't backface underwater surfaces, because they warp
            if !flags.contains(SurfFlags::UNDERWATER) && back != flags.contains(SurfFlags::PLANEBACK) {
                continue;
            }
            let base = self.model.surface_texture(surf);
            let tex = texture_animation(self.model, base, 0, self.frame.time);
            self.frame.chains.push(tex, surf);
            self.frame.visible_surfaces.push(surf);
            self.frame.stats.brush_polys += 1;
        }

        self.recursive_world_node(children[side ^ 1]);
    }
}

/// Walk the world from its head node, chaining every visible surface that
/// faces the viewer onto its texture, nearest first.
pub fn build_texture_chains(
    model: &BrushModel,
    marks: &VisMarks,
    efrags: &Efrags,
    view: &ViewParams,
    frame: &mut FrameContext,
    config: &RenderConfig,
) {
    let head = NodeChild::Node(model.submodels[0].headnode[0]);
    let mut walk = WorldWalk { model, marks, efrags, view, cull: !config.nocull, frame };
    walk.recursive_world_node(head);
}

// world.rs — hull traversal: point contents, swept traces, entity clipping

use std::sync::Arc;

use log::warn;

use crate::model::{BrushModel, ClipNode, Contents, Hull, HullChild, NodeChild};
use crate::q_shared::{box_on_plane_side, vector_add, vector_lerp, vector_subtract, CPlane, Vec3};

/// Crossing points are pulled this far back toward the start so the end
/// position never lies on the plane itself.
pub const DIST_EPSILON: f32 = 0.03125;

/// Result of sweeping a point (in hull space) from start to end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trace {
    /// The whole segment is in solid.
    pub allsolid: bool,
    /// The start point is in solid.
    pub startsolid: bool,
    pub inopen: bool,
    pub inwater: bool,
    /// 1.0 = the segment completed without hitting anything.
    pub fraction: f32,
    pub endpos: Vec3,
    /// Plane that was hit, facing the start point.
    pub plane: Option<CPlane>,
    /// Entity key set by `clip_move_to_entity`.
    pub ent: Option<usize>,
}

impl Trace {
    fn begin(end: &Vec3) -> Self {
        Trace {
            allsolid: true,
            startsolid: false,
            inopen: false,
            inwater: false,
            fraction: 1.0,
            endpos: *end,
            plane: None,
            ent: None,
        }
    }
}

#[inline]
fn clipnode(hull: &Hull, num: usize) -> &ClipNode {
    if num < hull.firstclipnode || num > hull.lastclipnode || num >= hull.clipnodes.len() {
        panic!(
            "recursive_hull_check: bad node number {} (hull {}..={})",
            num, hull.firstclipnode, hull.lastclipnode
        );
    }
    &hull.clipnodes[num]
}

// ============================================================
// Point contents
// ============================================================

/// Contents of `p` starting the walk at `num`.
pub fn hull_point_contents(hull: &Hull, mut num: HullChild, p: &Vec3) -> Contents {
    loop {
        match num {
            HullChild::Contents(c) => return c,
            HullChild::Node(n) => {
                let node = clipnode(hull, n);
                let d = hull.planes[node.plane].distance(p);
                num = node.children[if d < 0.0 { 1 } else { 0 }];
            }
        }
    }
}

/// World contents with water currents folded into plain water.
pub fn point_contents(model: &BrushModel, p: &Vec3) -> Contents {
    true_point_contents(model, p).without_currents()
}

pub fn true_point_contents(model: &BrushModel, p: &Vec3) -> Contents {
    let hull = &model.hulls[0];
    hull_point_contents(hull, HullChild::Node(hull.firstclipnode), p)
}

// ============================================================
// Swept traces
// ============================================================

/// Returns false once the trace has been blocked and no further nodes need
/// visiting.
fn recursive_hull_check(
    hull: &Hull,
    num: HullChild,
    p1f: f32,
    p2f: f32,
    p1: &Vec3,
    p2: &Vec3,
    trace: &mut Trace,
) -> bool {
    let n = match num {
        HullChild::Contents(Contents::Solid) => {
            trace.startsolid = true;
            return true;
        }
        HullChild::Contents(c) => {
            trace.allsolid = false;
            if c == Contents::Empty {
                trace.inopen = true;
            } else {
                trace.inwater = true;
            }
            return true;
        }
        HullChild::Node(n) => n,
    };

    let node = clipnode(hull, n);
    let plane = &hull.planes[node.plane];
    let t1 = plane.distance(p1);
    let t2 = plane.distance(p2);

    // a start exactly on the plane counts as the front side
    if t1 >= 0.0 && t2 >= 0.0 {
        return recursive_hull_check(hull, node.children[0], p1f, p2f, p1, p2, trace);
    }
    if t1 < 0.0 && t2 < 0.0 {
        return recursive_hull_check(hull, node.children[1], p1f, p2f, p1, p2, trace);
    }

    // put the crosspoint DIST_EPSILON units on the near side
    let frac = if t1 < 0.0 {
        (t1 + DIST_EPSILON) / (t1 - t2)
    } else {
        (t1 - DIST_EPSILON) / (t1 - t2)
    };
    let mut frac = frac.clamp(0.0, 1.0);
    let mut midf = p1f + (p2f - p1f) * frac;
    let mut mid = vector_lerp(p1, p2, frac);
    let side = (t1 < 0.0) as usize;

    // move up to the node
    if !recursive_hull_check(hull, node.children[side], p1f, midf, p1, &mid, trace) {
        return false;
    }

    // go past the node
    if hull_point_contents(hull, node.children[side ^ 1], &mid) != Contents::Solid {
        return recursive_hull_check(hull, node.children[side ^ 1], midf, p2f, &mid, p2, trace);
    }

    // never got out of the solid area
    if trace.allsolid {
        return false;
    }

    // the other side of the node is solid, this is the impact point
    trace.plane = Some(if side == 0 { *plane } else { plane.flipped() });

    let head = HullChild::Node(hull.firstclipnode);
    while hull_point_contents(hull, head, &mid) == Contents::Solid {
        frac -= 0.1;
        if frac < 0.0 {
            trace.fraction = midf;
            trace.endpos = mid;
            warn!("recursive_hull_check: backup past 0");
            return false;
        }
        midf = p1f + (p2f - p1f) * frac;
        mid = vector_lerp(p1, p2, frac);
    }

    trace.fraction = midf;
    trace.endpos = mid;
    false
}

/// Sweep a point through `hull` from `start` to `end`, both in hull space.
///
/// A segment that never leaves solid comes back with `allsolid`,
/// `startsolid` and a fraction of 0.
pub fn clip_move(hull: &Hull, start: &Vec3, end: &Vec3) -> Trace {
    let mut trace = Trace::begin(end);
    recursive_hull_check(hull, HullChild::Node(hull.firstclipnode), 0.0, 1.0, start, end, &mut trace);
    if trace.allsolid {
        trace.startsolid = true;
        trace.fraction = 0.0;
        trace.endpos = *start;
    }
    trace
}

// ============================================================
// Entity hulls
// ============================================================

/// Six-plane hull for clipping against axis-aligned boxes of entities that
/// have no brush model.
#[derive(Debug, Clone)]
pub struct BoxHull {
    clipnodes: Arc<[ClipNode]>,
}

impl Default for BoxHull {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxHull {
    pub fn new() -> Self {
        let clipnodes = (0..6)
            .map(|i| {
                let side = i & 1;
                let mut children = [HullChild::Contents(Contents::Empty); 2];
                children[side ^ 1] = if i != 5 {
                    HullChild::Node(i + 1)
                } else {
                    HullChild::Contents(Contents::Solid)
                };
                ClipNode { plane: i, children }
            })
            .collect();
        BoxHull { clipnodes }
    }

    /// A hull that is solid inside `mins..maxs`.
    pub fn hull(&self, mins: &Vec3, maxs: &Vec3) -> Hull {
        let planes: Arc<[CPlane]> = (0..6)
            .map(|i| {
                let axis = i >> 1;
                let mut normal = [0.0; 3];
                normal[axis] = 1.0;
                let dist = if i & 1 == 0 { maxs[axis] } else { mins[axis] };
                CPlane::new(normal, dist, axis as u8)
            })
            .collect();
        Hull {
            clipnodes: self.clipnodes.clone(),
            planes,
            firstclipnode: 0,
            lastclipnode: 5,
            clip_mins: [0.0; 3],
            clip_maxs: [0.0; 3],
        }
    }
}

/// Pick the brush hull of `submodel` whose pre-expanded box best fits
/// `mins..maxs`. The returned offset moves the box's origin onto the hull's.
pub fn hull_for_size(model: &BrushModel, submodel: usize, mins: &Vec3, maxs: &Vec3) -> (Hull, Vec3) {
    let size = vector_subtract(maxs, mins);
    let index = if size[0] < 3.0 {
        0
    } else if size[0] <= 32.0 {
        1
    } else {
        2
    };
    let hull = model.submodel_hull(submodel, index);
    let offset = vector_subtract(&hull.clip_mins, mins);
    (hull, offset)
}

#[derive(Debug, Clone, Copy)]
pub enum ClipShape<'a> {
    /// An inline brush model of the level (submodel 0 is the world).
    Brush { model: &'a BrushModel, submodel: usize },
    /// A plain bounding box, relative to the entity origin.
    Box { mins: Vec3, maxs: Vec3 },
}

#[derive(Debug, Clone, Copy)]
pub struct ClipEntity<'a> {
    pub key: usize,
    pub origin: Vec3,
    pub shape: ClipShape<'a>,
}

/// The hull to trace a `mins..maxs` box against `ent`, and the offset
/// from world space into that hull's space.
pub fn hull_for_entity(ent: &ClipEntity<'_>, boxes: &BoxHull, mins: &Vec3, maxs: &Vec3) -> (Hull, Vec3) {
    match ent.shape {
        ClipShape::Brush { model, submodel } => {
            let (hull, offset) = hull_for_size(model, submodel, mins, maxs);
            (hull, vector_add(&offset, &ent.origin))
        }
        ClipShape::Box { mins: emins, maxs: emaxs } => {
            let hullmins = vector_subtract(&emins, maxs);
            let hullmaxs = vector_subtract(&emaxs, mins);
            (boxes.hull(&hullmins, &hullmaxs), ent.origin)
        }
    }
}

/// Sweep a `mins..maxs` box from `start` to `end` against one entity.
pub fn clip_move_to_entity(
    ent: &ClipEntity<'_>,
    boxes: &BoxHull,
    start: &Vec3,
    mins: &Vec3,
    maxs: &Vec3,
    end: &Vec3,
) -> Trace {
    let (hull, offset) = hull_for_entity(ent, boxes, mins, maxs);
    let start_l = vector_subtract(start, &offset);
    let end_l = vector_subtract(end, &offset);

    let mut trace = clip_move(&hull, &start_l, &end_l);
    trace.endpos = vector_add(&trace.endpos, &offset);
    if trace.fraction < 1.0 || trace.startsolid {
        trace.ent = Some(ent.key);
    }
    trace
}

/// Sweep a box through the static world.
pub fn clip_move_to_world(model: &BrushModel, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
    let world = ClipEntity { key: 0, origin: [0.0; 3], shape: ClipShape::Brush { model, submodel: 0 } };
    clip_move_to_entity(&world, &BoxHull::new(), start, mins, maxs, end)
}

/// Every leaf of the render tree touched by a box, sorted.
pub fn box_leafs(model: &BrushModel, mins: &Vec3, maxs: &Vec3) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![NodeChild::Node(model.submodels[0].headnode[0])];
    while let Some(child) = stack.pop() {
        match child {
            NodeChild::Leaf(l) => out.push(l),
            NodeChild::Node(n) => {
                let sides = box_on_plane_side(mins, maxs, model.node_plane(n));
                let children = model.nodes[n].children;
                if sides & 1 != 0 {
                    stack.push(children[0]);
                }
                if sides & 2 != 0 {
                    stack.push(children[1]);
                }
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    const POINT: Vec3 = [0.0; 3];
    const PLAYER_MINS: Vec3 = [-16.0, -16.0, -24.0];
    const PLAYER_MAXS: Vec3 = [16.0, 16.0, 32.0];

    fn world_hull(model: &BrushModel) -> &Hull {
        &model.hulls[0]
    }

    // ============================================================
    // Two-leaf scenario
    // ============================================================

    #[test]
    fn test_trace_hits_wall_at_x0() {
        let m = testkit::load(&testkit::two_leaf_map());
        let tr = clip_move(world_hull(&m), &[-10.0, 0.0, 0.0], &[10.0, 0.0, 0.0]);
        assert!(tr.fraction < 1.0);
        assert!(!tr.startsolid);
        assert!(!tr.allsolid);
        let plane = tr.plane.unwrap();
        assert_eq!(plane.normal, [-1.0, 0.0, 0.0]);
        assert!(tr.endpos[0].abs() <= DIST_EPSILON + 1e-4, "endpos {:?}", tr.endpos);
        assert!(tr.endpos[0] < 0.0);
        assert!((tr.fraction - 0.4984375).abs() < 1e-5);
    }

    #[test]
    fn test_trace_open_space_completes() {
        let m = testkit::load(&testkit::two_leaf_map());
        let tr = clip_move(world_hull(&m), &[-50.0, 0.0, 0.0], &[-20.0, 10.0, 5.0]);
        assert_eq!(tr.fraction, 1.0);
        assert_eq!(tr.endpos, [-20.0, 10.0, 5.0]);
        assert!(tr.plane.is_none());
        assert!(tr.inopen);
    }

    #[test]
    fn test_zero_length_trace_open() {
        let m = testkit::load(&testkit::two_leaf_map());
        let p = [-5.0, 1.0, 2.0];
        let tr = clip_move(world_hull(&m), &p, &p);
        assert_eq!(tr.fraction, 1.0);
        assert!(!tr.startsolid);
    }

    #[test]
    fn test_zero_length_trace_in_solid() {
        let m = testkit::load(&testkit::two_leaf_map());
        let p = [5.0, 1.0, 2.0];
        let tr = clip_move(world_hull(&m), &p, &p);
        assert!(tr.startsolid);
        assert!(tr.allsolid);
        assert_eq!(tr.fraction, 0.0);
    }

    #[test]
    fn test_start_solid_end_open() {
        let m = testkit::load(&testkit::two_leaf_map());
        let tr = clip_move(world_hull(&m), &[10.0, 0.0, 0.0], &[-10.0, 0.0, 0.0]);
        assert!(tr.startsolid);
        assert!(!tr.allsolid);
        assert_eq!(tr.fraction, 1.0);
    }

    #[test]
    fn test_start_on_plane_moving_into_solid() {
        let m = testkit::load(&testkit::two_leaf_map());
        // x = -DIST_EPSILON is where a previous trace stops
        let start = [-DIST_EPSILON, 0.0, 0.0];
        let tr = clip_move(world_hull(&m), &start, &[8.0, 0.0, 0.0]);
        assert!(!tr.startsolid);
        assert!(tr.fraction < 0.01);
        // sliding along the wall is unobstructed
        let slide = clip_move(world_hull(&m), &start, &[-DIST_EPSILON, 40.0, 0.0]);
        assert_eq!(slide.fraction, 1.0);
    }

    // ============================================================
    // Point contents
    // ============================================================

    #[test]
    fn test_point_contents() {
        let m = testkit::load(&testkit::two_leaf_map());
        assert_eq!(point_contents(&m, &[-1.0, 0.0, 0.0]), Contents::Empty);
        assert_eq!(point_contents(&m, &[1.0, 0.0, 0.0]), Contents::Solid);
        assert_eq!(point_contents(&m, &[0.0, 0.0, 0.0]), Contents::Solid);
    }

    #[test]
    fn test_currents_read_as_water() {
        let mut b = testkit::two_leaf_builder();
        b.leafs[1].contents = Contents::Current270.code();
        let m = testkit::load(&b.build());
        let p = [-4.0, 0.0, 0.0];
        assert_eq!(point_contents(&m, &p), Contents::Water);
        assert_eq!(true_point_contents(&m, &p), Contents::Current270);
    }

    // ============================================================
    // Hull selection & entity clipping
    // ============================================================

    #[test]
    fn test_hull_for_size_selects_by_width() {
        let m = testkit::load(&testkit::two_leaf_map());
        let (h, off) = hull_for_size(&m, 0, &POINT, &POINT);
        assert_eq!(h.clip_mins, [0.0; 3]);
        assert_eq!(off, [0.0; 3]);
        let (h, off) = hull_for_size(&m, 0, &PLAYER_MINS, &PLAYER_MAXS);
        assert_eq!(h.clip_mins, PLAYER_MINS);
        assert_eq!(off, [0.0; 3]);
        let (h, _) = hull_for_size(&m, 0, &[-32.0, -32.0, -24.0], &[32.0, 32.0, 64.0]);
        assert_eq!(h.firstclipnode, 1);
        // a box not centred like the hull gets an offset
        let (_, off) = hull_for_size(&m, 0, &[-16.0, -16.0, 0.0], &[16.0, 16.0, 56.0]);
        assert_eq!(off, [0.0, 0.0, -24.0]);
    }

    #[test]
    fn test_player_box_stops_16_short() {
        let m = testkit::load(&testkit::two_leaf_map());
        let tr = clip_move_to_world(&m, &[-40.0, 0.0, 0.0], &PLAYER_MINS, &PLAYER_MAXS, &[10.0, 0.0, 0.0]);
        assert!(tr.fraction < 1.0);
        assert!((tr.endpos[0] + 16.0).abs() < 0.05, "endpos {:?}", tr.endpos);
        assert_eq!(tr.ent, Some(0));
    }

    #[test]
    fn test_large_box_uses_hull2() {
        let m = testkit::load(&testkit::two_leaf_map());
        let tr = clip_move_to_world(
            &m,
            &[-60.0, 0.0, 0.0],
            &[-32.0, -32.0, -24.0],
            &[32.0, 32.0, 64.0],
            &[0.0, 0.0, 0.0],
        );
        assert!((tr.endpos[0] + 32.0).abs() < 0.05, "endpos {:?}", tr.endpos);
    }

    #[test]
    fn test_box_hull_contents() {
        let boxes = BoxHull::new();
        let hull = boxes.hull(&[-8.0, -8.0, -8.0], &[8.0, 8.0, 8.0]);
        let head = HullChild::Node(0);
        assert_eq!(hull_point_contents(&hull, head, &[0.0, 0.0, 0.0]), Contents::Solid);
        assert_eq!(hull_point_contents(&hull, head, &[9.0, 0.0, 0.0]), Contents::Empty);
        assert_eq!(hull_point_contents(&hull, head, &[0.0, -9.0, 0.0]), Contents::Empty);
        assert_eq!(hull_point_contents(&hull, head, &[0.0, 0.0, 7.5]), Contents::Solid);
    }

    #[test]
    fn test_clip_against_box_entity() {
        let boxes = BoxHull::new();
        let ent = ClipEntity {
            key: 42,
            origin: [100.0, 0.0, 0.0],
            shape: ClipShape::Box { mins: [-8.0; 3], maxs: [8.0; 3] },
        };
        let tr = clip_move_to_entity(&ent, &boxes, &[0.0; 3], &POINT, &POINT, &[200.0, 0.0, 0.0]);
        assert_eq!(tr.ent, Some(42));
        assert_eq!(tr.plane.unwrap().normal, [-1.0, 0.0, 0.0]);
        assert!((tr.endpos[0] - 92.0).abs() < 0.05, "endpos {:?}", tr.endpos);

        let miss = clip_move_to_entity(&ent, &boxes, &[0.0, 50.0, 0.0], &POINT, &POINT, &[200.0, 50.0, 0.0]);
        assert_eq!(miss.fraction, 1.0);
        assert_eq!(miss.ent, None);
        assert_eq!(miss.endpos, [200.0, 50.0, 0.0]);
    }

    #[test]
    fn test_box_entity_expands_by_mover_size() {
        let boxes = BoxHull::new();
        let ent = ClipEntity {
            key: 1,
            origin: [100.0, 0.0, 0.0],
            shape: ClipShape::Box { mins: [-8.0; 3], maxs: [8.0; 3] },
        };
        let tr = clip_move_to_entity(&ent, &boxes, &[0.0; 3], &PLAYER_MINS, &PLAYER_MAXS, &[200.0, 0.0, 0.0]);
        // 100 - 8 - 16
        assert!((tr.endpos[0] - 76.0).abs() < 0.05, "endpos {:?}", tr.endpos);
    }

    #[test]
    #[should_panic(expected = "bad node number")]
    fn test_bad_node_number_is_fatal() {
        let m = testkit::load(&testkit::two_leaf_map());
        let mut hull = m.hulls[1].clone();
        hull.firstclipnode = 7;
        hull.lastclipnode = 9;
        clip_move(&hull, &[0.0; 3], &[1.0, 0.0, 0.0]);
    }

    // ============================================================
    // Box leaf enumeration
    // ============================================================

    #[test]
    fn test_box_leafs() {
        let m = testkit::load(&testkit::corridor_map());
        assert_eq!(box_leafs(&m, &[-10.0, -4.0, -4.0], &[-2.0, 4.0, 4.0]), vec![1]);
        assert_eq!(box_leafs(&m, &[-10.0, -4.0, -4.0], &[10.0, 4.0, 4.0]), vec![1, 2]);
        assert_eq!(box_leafs(&m, &[-10.0, -4.0, -4.0], &[100.0, 4.0, 4.0]), vec![1, 2, 3]);
    }
}

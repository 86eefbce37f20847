// model_load.rs — build a BrushModel from BSP version 29 bytes
//
// Every index read from the file is validated here, once. The traversals in
// `world`, `pvs` and the renderer index the arrays directly afterwards.

use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;

use crate::bspfile::*;
use crate::error::{check_index, check_range, BspError};
use crate::md4::com_block_checksum;
use crate::model::*;
use crate::q_shared::{vector_length, CPlane, Vec3};

/// Texture-animation ticks per frame of a `+N` sequence.
const ANIM_CYCLE: i32 = 2;
const MAX_SURFACE_EXTENT: i32 = 512;

/// Parse and validate a level file. The returned model is immutable; share
/// it through an `Arc`.
pub fn load_brush_model(name: &str, data: &[u8]) -> Result<BrushModel, BspError> {
    let header = DHeader::parse(name, data)?;

    let vertexes: Vec<Vec3> = read_lump::<DVertex>(&header, data, LUMP_VERTEXES)?
        .into_iter()
        .map(|v| v.point)
        .collect();
    let edges = load_edges(&header, data, vertexes.len())?;
    let surfedges = load_surfedges(&header, data, edges.len())?;
    let mut texture_slots = load_textures(header.lump_bytes(data, LUMP_TEXTURES)?)?;
    sequence_animations(&mut texture_slots)?;
    let lightdata = header.lump_bytes(data, LUMP_LIGHTING)?.to_vec();
    let planes = load_planes(&header, data)?;
    let texinfo = load_texinfo(&header, data, &texture_slots)?;

    let geometry = FaceGeometry {
        planes: &planes,
        texinfo: &texinfo,
        textures: &texture_slots,
        vertexes: &vertexes,
        edges: &edges,
        surfedges: &surfedges,
        lightdata_len: lightdata.len(),
    };
    let mut surfaces = load_faces(&header, data, &geometry)?;
    let marksurfaces = load_marksurfaces(&header, data, surfaces.len())?;
    let visdata = header.lump_bytes(data, LUMP_VISIBILITY)?.to_vec();
    let mut leafs = load_leafs(&header, data, marksurfaces.len(), visdata.len())?;
    flag_underwater_surfaces(&leafs, &marksurfaces, &mut surfaces);
    let mut nodes = load_nodes(&header, data, planes.len(), leafs.len(), surfaces.len())?;
    let clipnodes = load_clipnodes(&header, data, planes.len())?;
    let entities = String::from_utf8_lossy(header.lump_bytes(data, LUMP_ENTITIES)?)
        .trim_end_matches('\0')
        .to_string();
    let submodels = load_submodels(name, &header, data, nodes.len(), clipnodes.len(), surfaces.len(), leafs.len())?;

    let world = submodels[0];
    if world.visleafs > MAX_MAP_LEAFS {
        return Err(BspError::TooMany { what: "visleafs", count: world.visleafs, max: MAX_MAP_LEAFS });
    }
    set_parents(&mut nodes, &mut leafs, world.headnode[0])?;

    let planes: Arc<[CPlane]> = Arc::from(planes);
    let hull0 = make_hull0(&nodes, &leafs);
    check_hull_tree(&hull0, &submodels, 0)?;
    check_hull_tree(&clipnodes, &submodels, 1)?;
    check_hull_tree(&clipnodes, &submodels, 2)?;
    let numclipnodes = clipnodes.len();
    let clipnodes: Arc<[ClipNode]> = Arc::from(clipnodes);
    let hulls = [
        Hull {
            clipnodes: hull0,
            planes: planes.clone(),
            firstclipnode: world.headnode[0],
            lastclipnode: nodes.len().saturating_sub(1),
            clip_mins: [0.0; 3],
            clip_maxs: [0.0; 3],
        },
        Hull {
            clipnodes: clipnodes.clone(),
            planes: planes.clone(),
            firstclipnode: world.headnode[1],
            lastclipnode: numclipnodes.saturating_sub(1),
            clip_mins: HULL1_MINS,
            clip_maxs: HULL1_MAXS,
        },
        Hull {
            clipnodes,
            planes: planes.clone(),
            firstclipnode: world.headnode[2],
            lastclipnode: numclipnodes.saturating_sub(1),
            clip_mins: HULL2_MINS,
            clip_maxs: HULL2_MAXS,
        },
    ];

    let (checksum, checksum2) = map_checksums(&header, data)?;

    let notexture = texture_slots.len();
    let mut textures: Vec<Texture> = texture_slots
        .into_iter()
        .map(|t| t.unwrap_or_else(notexture_mip))
        .collect();
    textures.push(notexture_mip());
    debug_assert_eq!(textures.len() - 1, notexture);

    debug!(
        "{}: {} planes, {} nodes, {} leafs, {} clipnodes, {} faces, {} textures, {} submodels",
        name,
        planes.len(),
        nodes.len(),
        leafs.len(),
        numclipnodes,
        surfaces.len(),
        textures.len(),
        submodels.len()
    );
    info!("loaded {} ({} visleafs, checksum {:08x})", name, world.visleafs, checksum);

    Ok(BrushModel {
        name: name.to_string(),
        planes,
        vertexes,
        edges,
        surfedges,
        texinfo,
        textures,
        surfaces,
        marksurfaces,
        nodes,
        leafs,
        hulls,
        submodels,
        visdata,
        lightdata,
        entities,
        numleafs: world.visleafs,
        checksum,
        checksum2,
    })
}

// ============================================================
// Geometry lumps
// ============================================================

fn load_planes(header: &DHeader, data: &[u8]) -> Result<Vec<CPlane>, BspError> {
    let planes = read_lump::<DPlane>(header, data, LUMP_PLANES)?
        .into_iter()
        .map(|p| CPlane::new(p.normal, p.dist, p.plane_type.clamp(0, 5) as u8))
        .collect();
    Ok(planes)
}

fn load_edges(header: &DHeader, data: &[u8], numvertexes: usize) -> Result<Vec<MEdge>, BspError> {
    read_lump::<DEdge>(header, data, LUMP_EDGES)?
        .into_iter()
        .map(|e| {
            let v0 = check_index("edge vertex", e.v[0] as i64, numvertexes)?;
            let v1 = check_index("edge vertex", e.v[1] as i64, numvertexes)?;
            Ok(MEdge { v: [v0, v1] })
        })
        .collect()
}

fn load_surfedges(header: &DHeader, data: &[u8], numedges: usize) -> Result<Vec<i32>, BspError> {
    read_lump::<DSurfEdge>(header, data, LUMP_SURFEDGES)?
        .into_iter()
        .map(|se| {
            check_index("surfedge", (se.0 as i64).abs(), numedges)?;
            Ok(se.0)
        })
        .collect()
}

fn load_marksurfaces(header: &DHeader, data: &[u8], numsurfaces: usize) -> Result<Vec<usize>, BspError> {
    read_lump::<DMarkSurface>(header, data, LUMP_MARKSURFACES)?
        .into_iter()
        .map(|m| check_index("marksurface", m.0 as i64, numsurfaces))
        .collect()
}

fn widen(v: [i16; 3]) -> Vec3 {
    [v[0] as f32, v[1] as f32, v[2] as f32]
}

fn load_leafs(
    header: &DHeader,
    data: &[u8],
    nummarksurfaces: usize,
    visdata_len: usize,
) -> Result<Vec<MLeaf>, BspError> {
    read_lump::<DLeaf>(header, data, LUMP_LEAFS)?
        .into_iter()
        .map(|l| {
            let contents = Contents::from_code(l.contents)
                .ok_or(BspError::BadContents { what: "leaf", code: l.contents })?;
            check_range(
                "leaf marksurfaces",
                l.firstmarksurface as i64,
                l.nummarksurfaces as i64,
                nummarksurfaces,
            )?;
            let visofs = match l.visofs {
                -1 => None,
                ofs => Some(check_index("leaf visofs", ofs as i64, visdata_len)?),
            };
            Ok(MLeaf {
                contents,
                mins: widen(l.mins),
                maxs: widen(l.maxs),
                parent: None,
                visofs,
                firstmarksurface: l.firstmarksurface as usize,
                nummarksurfaces: l.nummarksurfaces as usize,
                ambient_level: l.ambient_level,
            })
        })
        .collect()
}

fn load_nodes(
    header: &DHeader,
    data: &[u8],
    numplanes: usize,
    numleafs: usize,
    numsurfaces: usize,
) -> Result<Vec<MNode>, BspError> {
    let raw = read_lump::<DNode>(header, data, LUMP_NODES)?;
    let numnodes = raw.len();
    raw.into_iter()
        .map(|n| {
            let plane = check_index("node plane", n.planenum as i64, numplanes)?;
            let children = [NodeChild::from_disk(n.children[0] as i32), NodeChild::from_disk(n.children[1] as i32)];
            for child in children {
                match child {
                    NodeChild::Node(c) => check_index("node child", c as i64, numnodes)?,
                    NodeChild::Leaf(l) => check_index("leaf child", l as i64, numleafs)?,
                };
            }
            check_range("node faces", n.firstface as i64, n.numfaces as i64, numsurfaces)?;
            Ok(MNode {
                plane,
                children,
                mins: widen(n.mins),
                maxs: widen(n.maxs),
                parent: None,
                firstsurface: n.firstface as usize,
                numsurfaces: n.numfaces as usize,
            })
        })
        .collect()
}

fn load_clipnodes(header: &DHeader, data: &[u8], numplanes: usize) -> Result<Vec<ClipNode>, BspError> {
    let raw = read_lump::<DClipNode>(header, data, LUMP_CLIPNODES)?;
    let count = raw.len();
    raw.into_iter()
        .map(|c| {
            let plane = check_index("clipnode plane", c.planenum as i64, numplanes)?;
            let mut children = [HullChild::Contents(Contents::Solid); 2];
            for (slot, &raw_child) in children.iter_mut().zip(c.children.iter()) {
                *slot = if raw_child >= 0 {
                    HullChild::Node(check_index("clipnode child", raw_child as i64, count)?)
                } else {
                    let code = raw_child as i32;
                    HullChild::Contents(Contents::from_code(code).ok_or(BspError::BadContents { what: "clipnode", code })?)
                };
            }
            Ok(ClipNode { plane, children })
        })
        .collect()
}

fn radius_from_bounds(mins: &Vec3, maxs: &Vec3) -> f32 {
    let mut corner = [0.0; 3];
    for i in 0..3 {
        corner[i] = mins[i].abs().max(maxs[i].abs());
    }
    vector_length(&corner)
}

fn load_submodels(
    name: &str,
    header: &DHeader,
    data: &[u8],
    numnodes: usize,
    numclipnodes: usize,
    numsurfaces: usize,
    numleafs: usize,
) -> Result<Vec<SubModel>, BspError> {
    let raw = read_lump::<DModel>(header, data, LUMP_MODELS)?;
    if raw.is_empty() {
        return Err(BspError::NoModels { name: name.to_string() });
    }
    if raw.len() > MAX_MAP_MODELS {
        return Err(BspError::TooMany { what: "models", count: raw.len(), max: MAX_MAP_MODELS });
    }
    raw.into_iter()
        .map(|m| {
            let mut headnode = [0usize; MAX_MAP_HULLS];
            headnode[0] = check_index("model headnode", m.headnode[0] as i64, numnodes)?;
            for j in 1..3 {
                headnode[j] = check_index("model clip headnode", m.headnode[j] as i64, numclipnodes)?;
            }
            headnode[3] = m.headnode[3].max(0) as usize;
            check_range("model faces", m.firstface as i64, m.numfaces as i64, numsurfaces)?;
            // leafs 1..=visleafs must exist
            check_range("model visleafs", 1, m.visleafs as i64, numleafs)?;

            // spread the mins / maxs by a pixel
            let mut mins = m.mins;
            let mut maxs = m.maxs;
            for j in 0..3 {
                mins[j] -= 1.0;
                maxs[j] += 1.0;
            }
            Ok(SubModel {
                mins,
                maxs,
                origin: m.origin,
                radius: radius_from_bounds(&mins, &maxs),
                headnode,
                visleafs: m.visleafs as usize,
                firstface: m.firstface as usize,
                numfaces: m.numfaces as usize,
            })
        })
        .collect()
}

// ============================================================
// Textures
// ============================================================

/// Decode the miptex lump into one slot per miptex, `None` where the
/// directory entry is -1.
fn load_textures(lump: &[u8]) -> Result<Vec<Option<Texture>>, BspError> {
    if lump.is_empty() {
        return Ok(Vec::new());
    }
    let bad = |reason: String| BspError::BadTexture { name: "<directory>".into(), reason };
    if lump.len() < 4 {
        return Err(bad(format!("lump of {} bytes", lump.len())));
    }
    let nummiptex = read_i32_le(lump, 0);
    if nummiptex < 0 || 4 + nummiptex as usize * 4 > lump.len() {
        return Err(bad(format!("{} entries do not fit", nummiptex)));
    }

    let mut slots = Vec::with_capacity(nummiptex as usize);
    for i in 0..nummiptex as usize {
        let ofs = read_i32_le(lump, 4 + i * 4);
        if ofs == -1 {
            slots.push(None);
            continue;
        }
        slots.push(Some(load_miptex(lump, i, ofs)?));
    }
    Ok(slots)
}

fn load_miptex(lump: &[u8], index: usize, ofs: i32) -> Result<Texture, BspError> {
    if ofs < 0 || ofs as usize + DMiptex::SIZE > lump.len() {
        return Err(BspError::BadTexture {
            name: format!("#{}", index),
            reason: format!("offset {} outside lump", ofs),
        });
    }
    let base = ofs as usize;
    let mt = DMiptex::read(&lump[base..]);
    if mt.width == 0 || mt.height == 0 {
        return Err(BspError::BadTexture { name: mt.name, reason: format!("empty ({}x{})", mt.width, mt.height) });
    }
    if mt.width & 15 != 0 || mt.height & 15 != 0 {
        return Err(BspError::BadTexture { name: mt.name, reason: "not 16 aligned".into() });
    }
    let Some(size) = mt.pixel_size() else {
        return Err(BspError::BadTexture { name: mt.name, reason: format!("{}x{} too large", mt.width, mt.height) });
    };
    let span = base
        .checked_add(mt.offsets[0] as usize)
        .and_then(|start| Some(start..start.checked_add(size)?))
        .filter(|span| span.end <= lump.len());
    let Some(span) = span else {
        return Err(BspError::BadTexture { name: mt.name, reason: "pixel data outside lump".into() });
    };
    Ok(Texture {
        name: mt.name,
        width: mt.width,
        height: mt.height,
        pixels: lump[span].to_vec(),
        ..Default::default()
    })
}

/// 16x16 checkerboard standing in for textures missing from the lump.
fn notexture_mip() -> Texture {
    let mut pixels = Vec::new();
    for m in 0..MIPLEVELS {
        let size = 16 >> m;
        for y in 0..size {
            for x in 0..size {
                let on = (x < size / 2) ^ (y < size / 2);
                pixels.push(if on { 0xff } else { 0 });
            }
        }
    }
    Texture { name: "notexture".into(), width: 16, height: 16, pixels, ..Default::default() }
}

enum AnimFrame {
    Primary(usize),
    Alternate(usize),
}

/// `+0`..`+9` are primary frames, `+a`..`+j` (either case) alternates.
fn anim_frame(name: &str) -> Option<AnimFrame> {
    match name.as_bytes().get(1)?.to_ascii_uppercase() {
        c @ b'0'..=b'9' => Some(AnimFrame::Primary((c - b'0') as usize)),
        c @ b'A'..=b'J' => Some(AnimFrame::Alternate((c - b'A') as usize)),
        _ => None,
    }
}

/// Link `+N` texture sequences into cycles. A missing frame or a frame
/// character outside 0-9/a-j fails the load.
fn sequence_animations(slots: &mut [Option<Texture>]) -> Result<(), BspError> {
    for i in 0..slots.len() {
        let name = match &slots[i] {
            Some(t) if t.name.starts_with('+') && t.anim_total == 0 => t.name.clone(),
            _ => continue,
        };
        let suffix = name.get(2..).unwrap_or("");

        let mut anims: [Option<usize>; 10] = [None; 10];
        let mut altanims: [Option<usize>; 10] = [None; 10];
        let mut max = 0;
        let mut altmax = 0;
        for j in i..slots.len() {
            let Some(t2) = &slots[j] else { continue };
            if !t2.name.starts_with('+') || t2.name.get(2..).unwrap_or("") != suffix {
                continue;
            }
            match anim_frame(&t2.name) {
                Some(AnimFrame::Primary(n)) => {
                    anims[n] = Some(j);
                    max = max.max(n + 1);
                }
                Some(AnimFrame::Alternate(n)) => {
                    altanims[n] = Some(j);
                    altmax = altmax.max(n + 1);
                }
                None => {
                    return Err(BspError::BadAnimation { name: t2.name.clone(), reason: "bad frame character".into() })
                }
            }
        }

        link_cycle(slots, &name, &anims[..max], altanims[0].filter(|_| altmax > 0))?;
        link_cycle(slots, &name, &altanims[..altmax], anims[0].filter(|_| max > 0))?;
    }
    Ok(())
}

fn link_cycle(
    slots: &mut [Option<Texture>],
    name: &str,
    frames: &[Option<usize>],
    alternate: Option<usize>,
) -> Result<(), BspError> {
    let count = frames.len();
    for (j, frame) in frames.iter().enumerate() {
        let missing = || BspError::BadAnimation { name: name.to_string(), reason: format!("missing frame {}", j) };
        let idx = frame.ok_or_else(missing)?;
        let next = frames[(j + 1) % count];
        let tex = slots[idx].as_mut().ok_or_else(missing)?;
        tex.anim_total = count as i32 * ANIM_CYCLE;
        tex.anim_min = j as i32 * ANIM_CYCLE;
        tex.anim_max = (j as i32 + 1) * ANIM_CYCLE;
        tex.anim_next = next;
        tex.alternate_anims = alternate;
    }
    Ok(())
}

fn load_texinfo(header: &DHeader, data: &[u8], slots: &[Option<Texture>]) -> Result<Vec<MTexInfo>, BspError> {
    let notexture = slots.len();
    read_lump::<DTexInfo>(header, data, LUMP_TEXINFO)?
        .into_iter()
        .map(|ti| {
            if slots.is_empty() {
                return Ok(MTexInfo { vecs: ti.vecs, texture: notexture, flags: 0 });
            }
            let idx = check_index("texinfo miptex", ti.miptex as i64, slots.len())?;
            Ok(match slots[idx] {
                Some(_) => MTexInfo { vecs: ti.vecs, texture: idx, flags: ti.flags },
                None => MTexInfo { vecs: ti.vecs, texture: notexture, flags: 0 },
            })
        })
        .collect()
}

// ============================================================
// Faces
// ============================================================

struct FaceGeometry<'a> {
    planes: &'a [CPlane],
    texinfo: &'a [MTexInfo],
    textures: &'a [Option<Texture>],
    vertexes: &'a [Vec3],
    edges: &'a [MEdge],
    surfedges: &'a [i32],
    lightdata_len: usize,
}

impl FaceGeometry<'_> {
    fn texture_name(&self, texinfo: &MTexInfo) -> &str {
        self.textures
            .get(texinfo.texture)
            .and_then(|t| t.as_ref())
            .map_or("", |t| t.name.as_str())
    }

    fn build_surface(&self, index: usize, f: &DFace) -> Result<MSurface, BspError> {
        let plane = check_index("face plane", f.planenum as i64, self.planes.len())?;
        let texinfo = check_index("face texinfo", f.texinfo as i64, self.texinfo.len())?;
        check_range("face edges", f.firstedge as i64, f.numedges as i64, self.surfedges.len())?;
        if f.numedges < 3 {
            return Err(BspError::index("face numedges", f.numedges, 3));
        }

        let mut flags = SurfFlags::empty();
        if f.side != 0 {
            flags |= SurfFlags::PLANEBACK;
        }
        let samples = match f.lightofs {
            -1 => None,
            ofs => Some(check_index("face lightofs", ofs as i64, self.lightdata_len)?),
        };

        let mut surf = MSurface {
            plane,
            flags,
            firstedge: f.firstedge as usize,
            numedges: f.numedges as usize,
            texinfo,
            texturemins: [0; 2],
            extents: [0; 2],
            styles: f.styles,
            samples,
        };
        let tex = &self.texinfo[texinfo];
        self.calc_surface_extents(index, &mut surf, tex)?;

        let texname = self.texture_name(tex);
        if texname.starts_with("sky") {
            surf.flags |= SurfFlags::DRAWSKY | SurfFlags::DRAWTILED;
        } else if texname.starts_with('*') {
            surf.flags |= SurfFlags::DRAWTURB | SurfFlags::DRAWTILED;
            surf.extents = [16384; 2];
            surf.texturemins = [-8192; 2];
        } else if let Some(ofs) = surf.samples {
            let (smax, tmax) = surf.lightmap_size();
            let end = smax
                .checked_mul(tmax)
                .and_then(|n| n.checked_mul(surf.num_styles()))
                .and_then(|n| n.checked_add(ofs));
            match end {
                Some(end) if end <= self.lightdata_len => {}
                _ => return Err(BspError::index("face light samples", end.map_or(i64::MAX, |e| e as i64), self.lightdata_len)),
            }
        }
        Ok(surf)
    }

    /// Texture-space bounds of the polygon, snapped out to the 16-unit
    /// lightmap grid.
    fn calc_surface_extents(&self, index: usize, surf: &mut MSurface, tex: &MTexInfo) -> Result<(), BspError> {
        let mut mins = [f32::MAX; 2];
        let mut maxs = [f32::MIN; 2];
        for i in 0..surf.numedges {
            let e = self.surfedges[surf.firstedge + i];
            let v = if e >= 0 {
                self.edges[e as usize].v[0]
            } else {
                self.edges[(-(e as i64)) as usize].v[1]
            };
            let p = &self.vertexes[v];
            for j in 0..2 {
                let val = tex.coord(j, p);
                mins[j] = mins[j].min(val);
                maxs[j] = maxs[j].max(val);
            }
        }

        for i in 0..2 {
            // float to int casts saturate, so corrupt coordinates land far
            // outside the i32 grid and fail the conversions below
            let bmin = (mins[i] / 16.0).floor() as i64;
            let bmax = (maxs[i] / 16.0).ceil() as i64;
            let extent = bmax.saturating_sub(bmin).saturating_mul(16);
            let bad = BspError::BadSurfaceExtents { face: index, extent };
            if !mins[i].is_finite() || !maxs[i].is_finite() {
                return Err(bad);
            }
            let (Ok(texturemin), Ok(extent32)) = (i32::try_from(bmin.saturating_mul(16)), i32::try_from(extent)) else {
                return Err(bad);
            };
            if extent32 < 0 || (tex.flags & TEX_SPECIAL == 0 && extent32 > MAX_SURFACE_EXTENT) {
                return Err(bad);
            }
            surf.texturemins[i] = texturemin;
            surf.extents[i] = extent32;
        }
        Ok(())
    }
}

fn load_faces(header: &DHeader, data: &[u8], geometry: &FaceGeometry<'_>) -> Result<Vec<MSurface>, BspError> {
    let faces = read_lump::<DFace>(header, data, LUMP_FACES)?;
    if faces.len() >= PARALLEL_LUMP_THRESHOLD {
        faces.par_iter().enumerate().map(|(i, f)| geometry.build_surface(i, f)).collect()
    } else {
        faces.iter().enumerate().map(|(i, f)| geometry.build_surface(i, f)).collect()
    }
}

/// Any surface bounding a non-empty leaf is seen through liquid.
fn flag_underwater_surfaces(leafs: &[MLeaf], marksurfaces: &[usize], surfaces: &mut [MSurface]) {
    for leaf in leafs.iter().filter(|l| l.contents != Contents::Empty) {
        for &s in &marksurfaces[leaf.firstmarksurface..leaf.firstmarksurface + leaf.nummarksurfaces] {
            surfaces[s].flags |= SurfFlags::UNDERWATER;
        }
    }
}

// ============================================================
// Tree fixups
// ============================================================

/// One-pass walk from the world head node recording each node's and leaf's
/// parent. A node reached twice means the tree is corrupt.
fn set_parents(nodes: &mut [MNode], leafs: &mut [MLeaf], root: usize) -> Result<(), BspError> {
    let mut visited = vec![false; nodes.len()];
    let mut stack = vec![(root, None)];
    while let Some((node, parent)) = stack.pop() {
        if visited[node] {
            return Err(BspError::BadTree { node });
        }
        visited[node] = true;
        nodes[node].parent = parent;
        for child in nodes[node].children {
            match child {
                NodeChild::Node(n) => stack.push((n, Some(node))),
                NodeChild::Leaf(l) => leafs[l].parent = Some(node),
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    OnPath,
    Done,
}

/// Depth-first walk of one hull's tree from every submodel's head node.
/// Shared subtrees are allowed; reaching a node that is still on the
/// current path is a loop the hull queries would never leave.
fn check_hull_tree(clipnodes: &[ClipNode], submodels: &[SubModel], hull: usize) -> Result<(), BspError> {
    let mut visit = vec![Visit::Unseen; clipnodes.len()];
    let mut stack = Vec::new();
    for model in submodels {
        let root = model.headnode[hull];
        if visit[root] == Visit::Done {
            continue;
        }
        visit[root] = Visit::OnPath;
        stack.push((root, 0));
        while let Some(top) = stack.last_mut() {
            let (node, side) = *top;
            if side == 2 {
                visit[node] = Visit::Done;
                stack.pop();
                continue;
            }
            top.1 += 1;
            if let HullChild::Node(child) = clipnodes[node].children[side] {
                match visit[child] {
                    Visit::OnPath => return Err(BspError::CyclicClipTree { hull, node: child }),
                    Visit::Unseen => {
                        visit[child] = Visit::OnPath;
                        stack.push((child, 0));
                    }
                    Visit::Done => {}
                }
            }
        }
    }
    Ok(())
}

/// Hull 0 reuses the render tree with leaf children replaced by the
/// leaf's contents.
fn make_hull0(nodes: &[MNode], leafs: &[MLeaf]) -> Arc<[ClipNode]> {
    nodes
        .iter()
        .map(|n| ClipNode {
            plane: n.plane,
            children: n.children.map(|c| match c {
                NodeChild::Node(i) => HullChild::Node(i),
                NodeChild::Leaf(l) => HullChild::Contents(leafs[l].contents),
            }),
        })
        .collect()
}

/// Com_BlockChecksum of every lump but the entities; the second sum also
/// leaves out the lumps a vis/light recompile would change.
fn map_checksums(header: &DHeader, data: &[u8]) -> Result<(u32, u32), BspError> {
    let mut checksum = 0;
    let mut checksum2 = 0;
    for i in 0..HEADER_LUMPS {
        if i == LUMP_ENTITIES {
            continue;
        }
        let c = com_block_checksum(header.lump_bytes(data, i)?);
        checksum ^= c;
        if i == LUMP_VISIBILITY || i == LUMP_LEAFS || i == LUMP_NODES {
            continue;
        }
        checksum2 ^= c;
    }
    Ok((checksum, checksum2))
}

// r_lightmap.rs — lightmap atlas packing and surface light building

use log::info;
use rayon::prelude::*;

use myq1_common::bspfile::MAXLIGHTMAPS;
use myq1_common::model::{BrushModel, SurfFlags};
use myq1_common::q_shared::vector_ma;

use crate::r_config::{LightmapFormat, RenderConfig};
use crate::r_light::LightStyles;
use crate::r_local::{DLight, FrameContext, RefError, MAX_DLIGHTS};

pub const BLOCK_WIDTH: usize = 128;
pub const BLOCK_HEIGHT: usize = 128;

/// Region of a page that changed since the last `take_dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

impl DirtyRect {
    /// Smallest rectangle covering both.
    pub fn union(self, other: DirtyRect) -> DirtyRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let x2 = (self.x + self.w).max(other.x + other.w);
        let y2 = (self.y + self.h).max(other.y + other.h);
        DirtyRect { x, y, w: x2 - x, h: y2 - y }
    }
}

/// One 128x128 luminance page, filled bottom-up by column height.
#[derive(Debug, Clone)]
pub struct LightmapPage {
    allocated: [usize; BLOCK_WIDTH],
    pixels: Vec<u8>,
    dirty: Option<DirtyRect>,
}

impl LightmapPage {
    fn new() -> Self {
        LightmapPage { allocated: [0; BLOCK_WIDTH], pixels: vec![0; BLOCK_WIDTH * BLOCK_HEIGHT], dirty: None }
    }

    /// LM_AllocBlock: lowest spot a `w` x `h` block fits, leftmost on ties.
    fn try_alloc(&mut self, w: usize, h: usize) -> Option<(usize, usize)> {
        let mut best = BLOCK_HEIGHT;
        let mut x = None;

        for i in 0..=BLOCK_WIDTH - w {
            let mut best2 = 0;
            let mut fits = true;
            for &a in &self.allocated[i..i + w] {
                if a >= best {
                    fits = false;
                    break;
                }
                best2 = best2.max(a);
            }
            if fits {
                // this is a valid spot
                x = Some(i);
                best = best2;
            }
        }

        let x = x?;
        if best + h > BLOCK_HEIGHT {
            return None;
        }
        self.allocated[x..x + w].fill(best + h);
        Some((x, best))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn texel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * BLOCK_WIDTH + x]
    }

    pub fn dirty(&self) -> Option<DirtyRect> {
        self.dirty
    }
}

/// Where a surface's lightmap lives in the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceLightmap {
    pub page: usize,
    pub s: usize,
    pub t: usize,
    pub smax: usize,
    pub tmax: usize,
}

#[derive(Debug, Clone)]
pub struct LightmapAtlas {
    pages: Vec<LightmapPage>,
    max_pages: usize,
    placements: Vec<Option<SurfaceLightmap>>,
    /// Style values each surface was last built with.
    cached_light: Vec<[i32; MAXLIGHTMAPS]>,
    /// Whether dynamic light was added at the last build.
    cached_dlight: Vec<bool>,
    format: LightmapFormat,
}

impl LightmapAtlas {
    pub fn new(numsurfaces: usize, config: &RenderConfig) -> Self {
        LightmapAtlas {
            pages: Vec::new(),
            max_pages: config.max_lightmaps,
            placements: vec![None; numsurfaces],
            cached_light: vec![[0; MAXLIGHTMAPS]; numsurfaces],
            cached_dlight: vec![false; numsurfaces],
            format: config.lightmap_format,
        }
    }

    pub fn pages(&self) -> &[LightmapPage] {
        &self.pages
    }

    pub fn placement(&self, surf: usize) -> Option<&SurfaceLightmap> {
        self.placements.get(surf).and_then(Option::as_ref)
    }

    /// Texel `(s, t)` of a surface's lightmap.
    pub fn surface_texel(&self, surf: usize, s: usize, t: usize) -> Option<u8> {
        let p = self.placement(surf)?;
        if s >= p.smax || t >= p.tmax {
            return None;
        }
        Some(self.pages[p.page].texel(p.s + s, p.t + t))
    }

    /// Find room for a `w` x `h` block, opening a new page only when no
    /// existing page has space.
    pub fn alloc_block(&mut self, w: usize, h: usize) -> Result<(usize, usize, usize), RefError> {
        if w == 0 || h == 0 || w > BLOCK_WIDTH || h > BLOCK_HEIGHT {
            return Err(RefError::BlockTooLarge { w, h });
        }

        for (i, page) in self.pages.iter_mut().enumerate() {
            if let Some((x, y)) = page.try_alloc(w, h) {
                return Ok((i, x, y));
            }
        }

        if self.pages.len() >= self.max_pages {
            return Err(RefError::LightmapsFull { max: self.max_pages });
        }
        let mut page = LightmapPage::new();
        let (x, y) = page.try_alloc(w, h).ok_or(RefError::BlockTooLarge { w, h })?;
        self.pages.push(page);
        Ok((self.pages.len() - 1, x, y))
    }

    pub fn mark_dirty(&mut self, page: usize, x: usize, y: usize, w: usize, h: usize) {
        let rect = DirtyRect { x, y, w, h };
        let p = &mut self.pages[page];
        p.dirty = Some(match p.dirty {
            Some(d) => d.union(rect),
            None => rect,
        });
    }

    /// Changed regions since the last call, per page.
    pub fn take_dirty(&mut self) -> Vec<(usize, DirtyRect)> {
        self.pages
            .iter_mut()
            .enumerate()
            .filter_map(|(i, p)| p.dirty.take().map(|d| (i, d)))
            .collect()
    }

    fn blit(&mut self, surf: usize, texels: &[u8]) {
        let Some(p) = self.placements[surf] else {
            return;
        };
        let page = &mut self.pages[p.page];
        for (row, src) in texels.chunks_exact(p.smax).enumerate() {
            let start = (p.t + row) * BLOCK_WIDTH + p.s;
            page.pixels[start..start + p.smax].copy_from_slice(src);
        }
        self.mark_dirty(p.page, p.s, p.t, p.smax, p.tmax);
    }

    fn rebuild_surface(
        &mut self,
        model: &BrushModel,
        surf: usize,
        styles: &LightStyles,
        dlights: &[DLight],
        dlight_bits: u32,
        config: &RenderConfig,
    ) {
        let light = build_surface_light(model, surf, styles, dlights, dlight_bits, config, self.format);
        self.cached_light[surf] = light.cached;
        self.blit(surf, &light.texels);
    }

    fn styles_changed(&self, model: &BrushModel, surf: usize, styles: &LightStyles) -> bool {
        let s = &model.surfaces[surf];
        s.styles[..s.num_styles()]
            .iter()
            .zip(self.cached_light[surf].iter())
            .any(|(&style, &cached)| styles.value(style) != cached)
    }

    /// R_RenderDynamicLightmaps for every surface chained this frame.
    pub fn render_dynamic_lightmaps(
        &mut self,
        model: &BrushModel,
        frame: &mut FrameContext,
        styles: &LightStyles,
        dlights: &[DLight],
        config: &RenderConfig,
    ) {
        let mut rebuilds = 0;
        for &surf in &frame.visible_surfaces {
            if self.placement(surf).is_none() {
                continue;
            }

            let lit = config.dynamic && frame.dlight_bits[surf] != 0;
            let was_lit = config.dynamic && self.cached_dlight[surf];
            if !lit && !was_lit && !self.styles_changed(model, surf, styles) {
                continue;
            }

            let bits = if lit { frame.dlight_bits[surf] } else { 0 };
            self.rebuild_surface(model, surf, styles, dlights, bits, config);
            self.cached_dlight[surf] = lit;
            rebuilds += 1;
        }
        frame.stats.lightmap_rebuilds += rebuilds;
    }
}

// ============================================================
// Light building
// ============================================================

/// Texels and style values from building one surface.
struct SurfaceLight {
    texels: Vec<u8>,
    cached: [i32; MAXLIGHTMAPS],
}

/// max(sd, td) + min(sd, td) / 2, on texel offsets in texture units.
fn approx_distance(sd: i32, td: i32) -> f32 {
    let (sd, td) = (sd.abs(), td.abs());
    if sd > td {
        (sd + (td >> 1)) as f32
    } else {
        (td + (sd >> 1)) as f32
    }
}

/// R_AddDynamicLights
fn add_dynamic_lights(model: &BrushModel, surf: usize, dlights: &[DLight], bits: u32, blocklights: &mut [u32]) {
    let s = &model.surfaces[surf];
    let (smax, tmax) = s.lightmap_size();
    let plane = model.surface_plane(surf);
    let tex = model.surface_texinfo(surf);

    for (lnum, dl) in dlights.iter().enumerate().take(MAX_DLIGHTS) {
        if bits & (1 << lnum) == 0 {
            continue; // not lit by this light
        }

        let dist = plane.distance(&dl.origin);
        let rad = dl.radius - dist.abs();
        if rad < dl.minlight {
            continue;
        }
        let minlight = rad - dl.minlight;

        let impact = vector_ma(&dl.origin, -dist, &plane.normal);
        // texel offsets truncate toward zero only after the grid subtraction
        let local = [
            tex.coord(0, &impact) - s.texturemins[0] as f32,
            tex.coord(1, &impact) - s.texturemins[1] as f32,
        ];

        for t in 0..tmax {
            let td = (local[1] - (t * 16) as f32) as i32;
            for si in 0..smax {
                let d = approx_distance((local[0] - (si * 16) as f32) as i32, td);
                if d < minlight {
                    let b = &mut blocklights[t * smax + si];
                    *b = b.saturating_add(((rad - d) * 256.0) as u32);
                }
            }
        }
    }
}

/// R_BuildLightMap: combine the styled samples and any dynamic lights
/// into 8-bit texels.
fn build_surface_light(
    model: &BrushModel,
    surf: usize,
    styles: &LightStyles,
    dlights: &[DLight],
    dlight_bits: u32,
    config: &RenderConfig,
    format: LightmapFormat,
) -> SurfaceLight {
    let s = &model.surfaces[surf];
    let (smax, tmax) = s.lightmap_size();
    let size = smax * tmax;
    let nstyles = s.num_styles();

    let mut cached = [0; MAXLIGHTMAPS];
    for (c, &style) in cached.iter_mut().zip(&s.styles[..nstyles]) {
        *c = styles.value(style);
    }

    let mut blocklights = vec![0u32; size];
    match s.samples {
        Some(samples) if !config.fullbright && !model.lightdata.is_empty() => {
            for (maps, &scale) in cached[..nstyles].iter().enumerate() {
                let start = samples + maps * size;
                let Some(lightmap) = model.lightdata.get(start..start + size) else {
                    break;
                };
                let scale = scale.max(0) as u32;
                for (b, &l) in blocklights.iter_mut().zip(lightmap) {
                    *b = b.saturating_add(l as u32 * scale);
                }
            }
        }
        _ => blocklights.fill(255 * 256),
    }

    if dlight_bits != 0 {
        add_dynamic_lights(model, surf, dlights, dlight_bits, &mut blocklights);
    }

    let texels = blocklights
        .iter()
        .map(|&b| {
            let t = (b >> 7).min(255) as u8;
            match format {
                LightmapFormat::Luminance => t,
                LightmapFormat::Inverted => 255 - t,
            }
        })
        .collect();

    SurfaceLight { texels, cached }
}

/// GL_BuildLightmaps: place every lightmapped surface of the level and
/// build its static light.
pub fn build_lightmaps(model: &BrushModel, styles: &LightStyles, config: &RenderConfig) -> Result<LightmapAtlas, RefError> {
    let mut atlas = LightmapAtlas::new(model.surfaces.len(), config);

    for (surf, s) in model.surfaces.iter().enumerate() {
        if s.flags.contains(SurfFlags::DRAWTILED) {
            continue;
        }
        let (smax, tmax) = s.lightmap_size();
        let (page, x, y) = atlas.alloc_block(smax, tmax)?;
        atlas.placements[surf] = Some(SurfaceLightmap { page, s: x, t: y, smax, tmax });
    }

    let format = atlas.format;
    let built: Vec<(usize, SurfaceLight)> = atlas
        .placements
        .par_iter()
        .enumerate()
        .filter(|(_, p)| p.is_some())
        .map(|(surf, _)| (surf, build_surface_light(model, surf, styles, &[], 0, config, format)))
        .collect();

    for (surf, light) in built {
        atlas.cached_light[surf] = light.cached;
        atlas.blit(surf, &light.texels);
    }

    info!("{}: {} lightmap pages", model.name, atlas.pages.len());
    Ok(atlas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use myq1_common::testkit;

    fn two_leaf() -> BrushModel {
        testkit::load(&testkit::two_leaf_map())
    }

    fn texels(atlas: &LightmapAtlas, surf: usize) -> Vec<u8> {
        let p = *atlas.placement(surf).unwrap();
        let mut out = Vec::new();
        for t in 0..p.tmax {
            for s in 0..p.smax {
                out.push(atlas.surface_texel(surf, s, t).unwrap());
            }
        }
        out
    }

    // ============================================================
    // Allocation
    // ============================================================

    #[test]
    fn test_alloc_fills_lowest_spot() {
        let mut a = LightmapAtlas::new(0, &RenderConfig::default());
        assert_eq!(a.alloc_block(10, 5), Ok((0, 0, 0)));
        assert_eq!(a.alloc_block(10, 5), Ok((0, 10, 0)));
        assert_eq!(a.alloc_block(20, 3), Ok((0, 20, 0)));
        assert_eq!(a.alloc_block(128, 1), Ok((0, 0, 5)));
        assert_eq!(a.pages().len(), 1);
    }

    #[test]
    fn test_alloc_opens_pages_until_limit() {
        let mut config = RenderConfig::default();
        config.max_lightmaps = 2;
        let mut a = LightmapAtlas::new(0, &config);
        assert_eq!(a.alloc_block(128, 128), Ok((0, 0, 0)));
        assert_eq!(a.alloc_block(128, 100), Ok((1, 0, 0)));
        // still room on page 1
        assert_eq!(a.alloc_block(64, 28), Ok((1, 0, 100)));
        assert_eq!(a.alloc_block(128, 1), Err(RefError::LightmapsFull { max: 2 }));
        assert_eq!(a.alloc_block(129, 4), Err(RefError::BlockTooLarge { w: 129, h: 4 }));
    }

    #[test]
    fn test_packed_blocks_never_overlap() {
        let mut a = LightmapAtlas::new(0, &RenderConfig::default());
        let mut rects = Vec::new();
        for i in 0..200usize {
            let w = 1 + (i * 7) % 18;
            let h = 1 + (i * 13) % 11;
            let (page, x, y) = a.alloc_block(w, h).unwrap();
            assert!(x + w <= BLOCK_WIDTH && y + h <= BLOCK_HEIGHT);
            rects.push((page, x, y, w, h));
        }
        for (i, r) in rects.iter().enumerate() {
            for o in &rects[i + 1..] {
                let apart = r.0 != o.0 || r.1 + r.3 <= o.1 || o.1 + o.3 <= r.1 || r.2 + r.4 <= o.2 || o.2 + o.4 <= r.2;
                assert!(apart, "{r:?} overlaps {o:?}");
            }
        }
    }

    #[test]
    fn test_approx_distance() {
        assert_eq!(approx_distance(16, -8), 20.0);
        assert_eq!(approx_distance(-3, 10), 11.0);
        assert_eq!(approx_distance(0, 0), 0.0);
    }

    // ============================================================
    // Dirty rectangles
    // ============================================================

    #[test]
    fn test_dirty_rects_union_and_drain() {
        let mut a = LightmapAtlas::new(0, &RenderConfig::default());
        a.alloc_block(4, 4).unwrap();
        a.mark_dirty(0, 0, 0, 4, 4);
        a.mark_dirty(0, 10, 2, 2, 8);
        assert_eq!(a.take_dirty(), vec![(0, DirtyRect { x: 0, y: 0, w: 12, h: 10 })]);
        assert!(a.take_dirty().is_empty());
        assert_eq!(a.pages()[0].dirty(), None);
    }

    // ============================================================
    // Building
    // ============================================================

    #[test]
    fn test_surface_without_samples_is_fullbright() {
        let m = two_leaf();
        let a = build_lightmaps(&m, &LightStyles::new(), &RenderConfig::default()).unwrap();
        let p = a.placement(0).unwrap();
        assert_eq!((p.smax, p.tmax), (3, 2));
        assert_eq!(texels(&a, 0), vec![255; 6]);
    }

    #[test]
    fn test_sampled_surface_scales_by_style() {
        let m = two_leaf();
        let a = build_lightmaps(&m, &LightStyles::new(), &RenderConfig::default()).unwrap();
        assert_eq!(a.placement(1).map(|p| (p.page, p.s, p.t)), Some((0, 3, 0)));
        assert_eq!(texels(&a, 1), vec![20, 40, 60, 80, 100, 120]);

        let mut styles = LightStyles::new();
        styles.set_style(0, "a").unwrap();
        styles.animate(0.0);
        let dark = build_lightmaps(&m, &styles, &RenderConfig::default()).unwrap();
        assert_eq!(texels(&dark, 1), vec![0; 6]);
    }

    #[test]
    fn test_inverted_and_fullbright_config() {
        let m = two_leaf();
        let mut config = RenderConfig::default();
        config.lightmap_format = LightmapFormat::Inverted;
        let a = build_lightmaps(&m, &LightStyles::new(), &config).unwrap();
        assert_eq!(texels(&a, 0), vec![0; 6]);
        assert_eq!(texels(&a, 1), vec![235, 215, 195, 175, 155, 135]);

        let mut config = RenderConfig::default();
        config.fullbright = true;
        let a = build_lightmaps(&m, &LightStyles::new(), &config).unwrap();
        assert_eq!(texels(&a, 1), vec![255; 6]);
    }

    #[test]
    fn test_initial_build_marks_pages_dirty() {
        let m = two_leaf();
        let mut a = build_lightmaps(&m, &LightStyles::new(), &RenderConfig::default()).unwrap();
        assert_eq!(a.take_dirty(), vec![(0, DirtyRect { x: 0, y: 0, w: 6, h: 2 })]);
    }

    #[test]
    fn test_too_many_pages_is_fatal() {
        let mut b = testkit::two_leaf_builder();
        // 33x33 blocks, more than one page holds
        let quad = [[0.0, 0.0, 0.0], [0.0, 512.0, 0.0], [0.0, 512.0, 512.0], [0.0, 0.0, 512.0]];
        for _ in 0..12 {
            b.add_face(0, 1, &quad, 0, [0, 255, 255, 255], -1);
        }
        b.models[0].numfaces = b.faces.len() as i32;
        let m = testkit::load(&b.build());
        assert_eq!(m.surfaces[2].lightmap_size(), (33, 33));

        let mut config = RenderConfig::default();
        config.max_lightmaps = 1;
        assert_eq!(
            build_lightmaps(&m, &LightStyles::new(), &config).unwrap_err(),
            RefError::LightmapsFull { max: 1 }
        );
        config.max_lightmaps = 2;
        assert_eq!(build_lightmaps(&m, &LightStyles::new(), &config).unwrap().pages().len(), 2);
    }

    // ============================================================
    // Rebuild triggers
    // ============================================================

    fn frame_with(m: &BrushModel, framecount: u32, surfs: &[usize]) -> FrameContext {
        let mut f = FrameContext::new(m);
        f.begin(framecount, 0.0);
        f.visible_surfaces.extend_from_slice(surfs);
        f
    }

    #[test]
    fn test_style_change_triggers_rebuild() {
        let m = two_leaf();
        let config = RenderConfig::default();
        let mut styles = LightStyles::new();
        let mut a = build_lightmaps(&m, &styles, &config).unwrap();
        a.take_dirty();

        let mut f = frame_with(&m, 1, &[0, 1]);
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[], &config);
        assert_eq!(f.stats.lightmap_rebuilds, 0);

        styles.set_style(0, "c").unwrap();
        styles.animate(0.0);
        let mut f = frame_with(&m, 2, &[1]);
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[], &config);
        assert_eq!(f.stats.lightmap_rebuilds, 1);
        // 'c' = 44 / 256
        assert_eq!(a.surface_texel(1, 0, 0), Some(((10 * 44) >> 7) as u8));
        assert_eq!(a.take_dirty(), vec![(0, DirtyRect { x: 3, y: 0, w: 3, h: 2 })]);

        let mut f = frame_with(&m, 3, &[1]);
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[], &config);
        assert_eq!(f.stats.lightmap_rebuilds, 0);
    }

    #[test]
    fn test_dynamic_light_rebuilds_until_gone() {
        let m = two_leaf();
        let config = RenderConfig::default();
        let styles = LightStyles::new();
        let mut a = build_lightmaps(&m, &styles, &config).unwrap();
        let light = DLight { origin: [-10.0, 16.0, 8.0], radius: 100.0, ..Default::default() };

        let mut f = frame_with(&m, 1, &[1]);
        f.dlight_bits[1] = 1;
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[light], &config);
        assert_eq!(f.stats.lightmap_rebuilds, 1);
        // (20 + 82) * 256 >> 7
        assert_eq!(a.surface_texel(1, 1, 0), Some(204));
        assert_eq!(a.surface_texel(1, 0, 0), Some(20 + 2 * (90 - 20)));

        // lit last build, so it is rebuilt once more to clear the light
        let mut f = frame_with(&m, 2, &[1]);
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[light], &config);
        assert_eq!(f.stats.lightmap_rebuilds, 1);
        assert_eq!(a.surface_texel(1, 1, 0), Some(40));

        let mut f = frame_with(&m, 3, &[1]);
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[light], &config);
        assert_eq!(f.stats.lightmap_rebuilds, 0);
    }

    #[test]
    fn test_dynamic_light_between_texels() {
        let m = two_leaf();
        let config = RenderConfig::default();
        let styles = LightStyles::new();
        let mut a = build_lightmaps(&m, &styles, &config).unwrap();
        // impact at (s, t) = (16.5, 8.5); texel (2, 0) sits 15 units away in s
        let light = DLight { origin: [-10.0, 16.5, 8.5], radius: 100.0, ..Default::default() };

        let mut f = frame_with(&m, 1, &[1]);
        f.dlight_bits[1] = 1;
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[light], &config);
        assert_eq!(a.surface_texel(1, 0, 0), Some((10 + 90 - 20) * 2));
        assert_eq!(a.surface_texel(1, 2, 0), Some((30 + 90 - 19) * 2));
    }

    #[test]
    fn test_huge_dynamic_light_saturates() {
        let m = two_leaf();
        let config = RenderConfig::default();
        let styles = LightStyles::new();
        let mut a = build_lightmaps(&m, &styles, &config).unwrap();
        let light = DLight { origin: [-10.0, 16.0, 8.0], radius: 1.0e12, ..Default::default() };

        let mut f = frame_with(&m, 1, &[1]);
        f.dlight_bits[1] = 1;
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[light], &config);
        for t in 0..2 {
            for si in 0..3 {
                assert_eq!(a.surface_texel(1, si, t), Some(255));
            }
        }
    }

    #[test]
    fn test_dynamic_off_skips_dlights() {
        let m = two_leaf();
        let mut config = RenderConfig::default();
        config.dynamic = false;
        let styles = LightStyles::new();
        let mut a = build_lightmaps(&m, &styles, &config).unwrap();
        let light = DLight { origin: [-10.0, 16.0, 8.0], radius: 100.0, ..Default::default() };

        let mut f = frame_with(&m, 1, &[0, 1]);
        f.dlight_bits[1] = 1;
        a.render_dynamic_lightmaps(&m, &mut f, &styles, &[light], &config);
        assert_eq!(f.stats.lightmap_rebuilds, 0);
        assert_eq!(a.surface_texel(1, 1, 0), Some(40));
    }
}

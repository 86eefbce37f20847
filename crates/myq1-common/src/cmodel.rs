// cmodel.rs — the process-wide loaded world and free-function queries on it

use std::sync::Arc;

use log::info;
use parking_lot::RwLock;

use crate::error::BspError;
use crate::model::{point_in_leaf, BrushModel, Contents};
use crate::model_load::load_brush_model;
use crate::pvs::{fat_pvs, VisBits};
use crate::q_shared::Vec3;
use crate::world::{clip_move_to_world, point_contents, Trace};

// ============================================================
// Global singleton
// ============================================================

static WORLD: RwLock<Option<Arc<BrushModel>>> = RwLock::new(None);

/// Load a level and make it the current world, replacing any previous one.
/// On error the previous world stays loaded.
pub fn cm_load_world(name: &str, data: &[u8]) -> Result<Arc<BrushModel>, BspError> {
    let model = Arc::new(load_brush_model(name, data)?);
    let previous = WORLD.write().replace(model.clone());
    if let Some(prev) = previous {
        info!("replaced world {} with {}", prev.name, model.name);
    }
    Ok(model)
}

/// Drop the current world.
pub fn cm_unload_world() {
    WORLD.write().take();
}

/// Shared handle to the current world.
pub fn cm_world() -> Option<Arc<BrushModel>> {
    WORLD.read().clone()
}

/// Run `f` against the current world under the read lock. Returns None if
/// no world is loaded.
pub fn with_world<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&BrushModel) -> R,
{
    let g = WORLD.read();
    g.as_deref().map(f)
}

/// Number of inline models, the world included.
pub fn cm_num_inline_models() -> usize {
    with_world(|w| w.submodels.len()).unwrap_or(0)
}

pub fn cm_entity_string() -> String {
    with_world(|w| w.entities.clone()).unwrap_or_default()
}

/// (checksum, checksum2) of the current world.
pub fn cm_checksums() -> Option<(u32, u32)> {
    with_world(|w| (w.checksum, w.checksum2))
}

/// World contents at `p`, with currents as water. Empty when nothing is
/// loaded.
pub fn cm_point_contents(p: &Vec3) -> Contents {
    with_world(|w| point_contents(w, p)).unwrap_or(Contents::Empty)
}

pub fn cm_point_leaf(p: &Vec3) -> usize {
    with_world(|w| point_in_leaf(w, p)).unwrap_or(0)
}

pub fn cm_fat_pvs(org: &Vec3) -> Option<VisBits> {
    with_world(|w| fat_pvs(w, org))
}

/// Sweep a box through the world. With nothing loaded the move completes.
pub fn cm_trace(start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
    with_world(|w| clip_move_to_world(w, start, mins, maxs, end)).unwrap_or(Trace {
        allsolid: false,
        startsolid: false,
        inopen: true,
        inwater: false,
        fraction: 1.0,
        endpos: *end,
        plane: None,
        ent: None,
    })
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use parking_lot::Mutex;

    // the world is process-wide; tests touching it take turns
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn test_no_world_defaults() {
        let _g = SERIAL.lock();
        cm_unload_world();
        assert!(cm_world().is_none());
        assert_eq!(cm_num_inline_models(), 0);
        assert_eq!(cm_point_contents(&[1.0, 2.0, 3.0]), Contents::Empty);
        let tr = cm_trace(&[0.0; 3], &[0.0; 3], &[0.0; 3], &[5.0, 0.0, 0.0]);
        assert_eq!(tr.fraction, 1.0);
        assert_eq!(tr.endpos, [5.0, 0.0, 0.0]);
        assert!(cm_checksums().is_none());
    }

    #[test]
    fn test_load_and_query_world() {
        let _g = SERIAL.lock();
        let w = cm_load_world("maps/two.bsp", &testkit::two_leaf_map()).unwrap();
        assert_eq!(w.name, "maps/two.bsp");
        assert_eq!(cm_num_inline_models(), 1);
        assert!(cm_entity_string().contains("worldspawn"));
        assert_eq!(cm_point_contents(&[-5.0, 0.0, 0.0]), Contents::Empty);
        assert_eq!(cm_point_contents(&[5.0, 0.0, 0.0]), Contents::Solid);
        assert_eq!(cm_point_leaf(&[-5.0, 0.0, 0.0]), 1);
        assert_eq!(cm_fat_pvs(&[-20.0, 0.0, 0.0]).unwrap().as_bytes()[0], 0x01);

        let tr = cm_trace(&[-10.0, 0.0, 0.0], &[0.0; 3], &[0.0; 3], &[10.0, 0.0, 0.0]);
        assert!(tr.fraction < 1.0);
        assert!(tr.endpos[0].abs() < 0.05);

        let handle = cm_world().unwrap();
        assert!(Arc::ptr_eq(&handle, &w));
        assert_eq!(cm_checksums(), Some((w.checksum, w.checksum2)));
        cm_unload_world();
        // outstanding handles stay valid
        assert_eq!(handle.leafs.len(), 2);
    }

    #[test]
    fn test_failed_load_keeps_previous_world() {
        let _g = SERIAL.lock();
        cm_load_world("maps/corridor.bsp", &testkit::corridor_map()).unwrap();
        let mut bad = testkit::corridor_map();
        bad[0] = 30;
        assert!(matches!(cm_load_world("maps/bad.bsp", &bad), Err(BspError::BadVersion { .. })));
        assert_eq!(with_world(|w| w.name.clone()).as_deref(), Some("maps/corridor.bsp"));
        cm_unload_world();
    }
}

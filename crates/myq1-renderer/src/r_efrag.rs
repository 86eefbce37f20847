// r_efrag.rs — entity fragments: which leafs each entity's box touches

use std::collections::HashMap;

use myq1_common::model::{BrushModel, Contents};
use myq1_common::q_shared::Vec3;
use myq1_common::world::box_leafs;

/// Leaf-to-entity links for entities that don't move every frame. The world
/// walk reports the entities of every visible leaf.
#[derive(Debug, Clone, Default)]
pub struct Efrags {
    leaf_entities: Vec<Vec<usize>>,
    entity_leafs: HashMap<usize, Vec<usize>>,
}

impl Efrags {
    pub fn new(model: &BrushModel) -> Self {
        Efrags { leaf_entities: vec![Vec::new(); model.leafs.len()], entity_leafs: HashMap::new() }
    }

    /// Link `key` into every non-solid leaf its box touches, replacing any
    /// previous links.
    pub fn add_entity(&mut self, model: &BrushModel, key: usize, mins: &Vec3, maxs: &Vec3) {
        self.remove_entity(key);
        let leafs: Vec<usize> = box_leafs(model, mins, maxs)
            .into_iter()
            .filter(|&l| model.leafs[l].contents != Contents::Solid)
            .collect();
        for &l in &leafs {
            self.leaf_entities[l].push(key);
        }
        self.entity_leafs.insert(key, leafs);
    }

    pub fn remove_entity(&mut self, key: usize) {
        if let Some(leafs) = self.entity_leafs.remove(&key) {
            for l in leafs {
                self.leaf_entities[l].retain(|&k| k != key);
            }
        }
    }

    pub fn clear(&mut self) {
        for l in &mut self.leaf_entities {
            l.clear();
        }
        self.entity_leafs.clear();
    }

    pub fn leaf_entities(&self, leaf: usize) -> &[usize] {
        self.leaf_entities.get(leaf).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entity_leafs(&self, key: usize) -> &[usize] {
        self.entity_leafs.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myq1_common::testkit;

    #[test]
    fn test_add_splits_across_leafs() {
        let m = testkit::load(&testkit::corridor_map());
        let mut e = Efrags::new(&m);
        e.add_entity(&m, 4, &[-8.0, 0.0, 0.0], &[8.0, 8.0, 8.0]);
        assert_eq!(e.entity_leafs(4), &[1, 2]);
        assert_eq!(e.leaf_entities(1), &[4]);
        assert_eq!(e.leaf_entities(2), &[4]);
        assert!(e.leaf_entities(3).is_empty());
    }

    #[test]
    fn test_solid_leafs_skipped() {
        let m = testkit::load(&testkit::two_leaf_map());
        let mut e = Efrags::new(&m);
        e.add_entity(&m, 1, &[-8.0, 0.0, 0.0], &[8.0, 8.0, 8.0]);
        assert_eq!(e.entity_leafs(1), &[1]);
        assert!(e.leaf_entities(0).is_empty());
    }

    #[test]
    fn test_relink_and_remove() {
        let m = testkit::load(&testkit::corridor_map());
        let mut e = Efrags::new(&m);
        e.add_entity(&m, 2, &[-8.0, 0.0, 0.0], &[8.0, 8.0, 8.0]);
        e.add_entity(&m, 3, &[10.0, 0.0, 0.0], &[20.0, 8.0, 8.0]);
        // moving entity 2 drops its old links
        e.add_entity(&m, 2, &[100.0, 0.0, 0.0], &[110.0, 8.0, 8.0]);
        assert!(e.leaf_entities(1).is_empty());
        assert_eq!(e.leaf_entities(2), &[3]);
        assert_eq!(e.leaf_entities(3), &[2]);

        e.remove_entity(3);
        assert!(e.leaf_entities(2).is_empty());
        assert!(e.entity_leafs(3).is_empty());

        e.clear();
        assert!(e.leaf_entities(3).is_empty());
        assert!(e.entity_leafs(2).is_empty());
    }
}

// pvs.rs — potentially visible set rows: run-length codec, per-leaf rows, fat PVS

use log::warn;

use crate::model::{BrushModel, Contents, NodeChild};
use crate::q_shared::Vec3;

/// Distance from a splitting plane within which `fat_pvs` takes both sides.
const FAT_PVS_RADIUS: f32 = 8.0;

/// A decompressed visibility row. Bit `i` stands for leaf `i + 1`; leaf 0
/// is the shared solid leaf and has no bit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisBits(Vec<u8>);

impl VisBits {
    pub fn zeroed(bytes: usize) -> Self {
        VisBits(vec![0; bytes])
    }

    /// Every leaf visible.
    pub fn all(bytes: usize) -> Self {
        VisBits(vec![0xff; bytes])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `leaf` is in the set. Leaf 0 never is.
    pub fn contains_leaf(&self, leaf: usize) -> bool {
        if leaf == 0 {
            return false;
        }
        let bit = leaf - 1;
        self.0.get(bit >> 3).is_some_and(|b| b & (1 << (bit & 7)) != 0)
    }

    /// Leaf indices in the set, limited to the first `numleafs` bits.
    pub fn leafs(&self, numleafs: usize) -> impl Iterator<Item = usize> + '_ {
        (0..numleafs.min(self.0.len() * 8))
            .filter(move |&i| self.0[i >> 3] & (1 << (i & 7)) != 0)
            .map(|i| i + 1)
    }

    /// OR `other` into this set over their common length.
    pub fn union_with(&mut self, other: &VisBits) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= *b;
        }
    }
}

// ============================================================
// Run-length codec
// ============================================================

/// Expand a compressed row into `row_bytes` bytes. A zero byte is followed
/// by a count of zero bytes; any other byte is literal. `None` means the
/// leaf carries no visibility information and sees everything.
pub fn decompress_row(input: Option<&[u8]>, row_bytes: usize) -> VisBits {
    let input = match input {
        Some(input) => input,
        None => return VisBits::all(row_bytes),
    };

    let mut out = Vec::with_capacity(row_bytes);
    let mut pos = 0;
    while out.len() < row_bytes {
        let Some(&b) = input.get(pos) else {
            warn!("decompress_row: vis overrun ({} of {} bytes)", out.len(), row_bytes);
            break;
        };
        if b != 0 {
            out.push(b);
            pos += 1;
            continue;
        }
        let Some(&count) = input.get(pos + 1) else {
            warn!("decompress_row: vis overrun in zero run");
            break;
        };
        pos += 2;
        let run = (count as usize).min(row_bytes - out.len());
        out.resize(out.len() + run, 0);
    }
    out.resize(row_bytes, 0);
    VisBits(out)
}

/// Compress a row the way the vis tool does. Zero runs are capped at 255.
pub fn compress_vis(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len());
    let mut j = 0;
    while j < row.len() {
        out.push(row[j]);
        if row[j] != 0 {
            j += 1;
            continue;
        }
        let mut rep = 1u8;
        j += 1;
        while j < row.len() && row[j] == 0 && rep < 255 {
            rep += 1;
            j += 1;
        }
        out.push(rep);
    }
    out
}

/// Decompress the row at `offset` into the level's visibility data.
pub fn decompress_vis(model: &BrushModel, offset: Option<usize>) -> VisBits {
    let row = model.vis_row_bytes();
    match offset {
        Some(ofs) => decompress_row(Some(model.visdata.get(ofs..).unwrap_or(&[])), row),
        None => decompress_row(None, row),
    }
}

/// Mod_LeafPVS: the row of leafs visible from `leaf`.
pub fn leaf_pvs(model: &BrushModel, leaf: usize) -> VisBits {
    if leaf == 0 {
        return VisBits::all(model.vis_row_bytes());
    }
    decompress_vis(model, model.leafs[leaf].visofs)
}

// ============================================================
// Fat PVS
// ============================================================

/// Union of the PVS of every non-solid leaf within 8 units of `org`.
/// The row is sized to whole 32-bit words.
pub fn fat_pvs(model: &BrushModel, org: &Vec3) -> VisBits {
    let mut fat = VisBits::zeroed((model.numleafs + 31) >> 3);
    add_to_fat_pvs(model, org, NodeChild::Node(model.submodels[0].headnode[0]), &mut fat);
    fat
}

fn add_to_fat_pvs(model: &BrushModel, org: &Vec3, mut child: NodeChild, fat: &mut VisBits) {
    loop {
        let node = match child {
            NodeChild::Leaf(l) => {
                if model.leafs[l].contents != Contents::Solid {
                    fat.union_with(&leaf_pvs(model, l));
                }
                return;
            }
            NodeChild::Node(n) => n,
        };

        let d = model.node_plane(node).distance(org);
        let children = model.nodes[node].children;
        if d > FAT_PVS_RADIUS {
            child = children[0];
        } else if d < -FAT_PVS_RADIUS {
            child = children[1];
        } else {
            // go down both
            add_to_fat_pvs(model, org, children[0], fat);
            child = children[1];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    // ============================================================
    // Codec
    // ============================================================

    #[test]
    fn test_decompress_literals_and_runs() {
        let row = decompress_row(Some(&[0x12, 0x00, 0x03, 0x80]), 5);
        assert_eq!(row.as_bytes(), &[0x12, 0, 0, 0, 0x80]);
    }

    #[test]
    fn test_decompress_none_is_all_visible() {
        let row = decompress_row(None, 3);
        assert_eq!(row.as_bytes(), &[0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_decompress_stops_at_row_size() {
        // run overshoots the row
        let row = decompress_row(Some(&[0x00, 0x10]), 2);
        assert_eq!(row.as_bytes(), &[0, 0]);
        // trailing bytes past the row are ignored
        let row = decompress_row(Some(&[0x01, 0x02, 0x03, 0x04]), 2);
        assert_eq!(row.as_bytes(), &[0x01, 0x02]);
    }

    #[test]
    fn test_decompress_truncated_input() {
        let row = decompress_row(Some(&[0xff]), 3);
        assert_eq!(row.as_bytes(), &[0xff, 0, 0]);
        let row = decompress_row(Some(&[0xff, 0x00]), 3);
        assert_eq!(row.as_bytes(), &[0xff, 0, 0]);
    }

    #[test]
    fn test_compress_matches_vis_tool_output() {
        assert_eq!(compress_vis(&[0, 0, 0, 0x12, 0xff, 0]), vec![0, 3, 0x12, 0xff, 0, 1]);
        let zeros = vec![0u8; 600];
        assert_eq!(compress_vis(&zeros), vec![0, 255, 0, 255, 0, 90]);
    }

    #[test]
    fn test_codec_roundtrip() {
        let rows: [&[u8]; 4] = [
            &[0xff, 0x00, 0x00, 0x01],
            &[0x00; 7],
            &[0x01, 0x02, 0x04, 0x08, 0x10],
            &[0x00, 0x80, 0x00, 0x00, 0x00, 0x40, 0x00],
        ];
        for row in rows {
            let packed = compress_vis(row);
            assert_eq!(decompress_row(Some(&packed), row.len()).as_bytes(), row);
            // canonical input compresses back to itself
            assert_eq!(compress_vis(decompress_row(Some(&packed), row.len()).as_bytes()), packed);
        }
    }

    // ============================================================
    // Level rows
    // ============================================================

    #[test]
    fn test_leaf_pvs_two_leaf_map() {
        let m = testkit::load(&testkit::two_leaf_map());
        assert_eq!(leaf_pvs(&m, 1).as_bytes(), &[0x01]);
        assert_eq!(leaf_pvs(&m, 0).as_bytes(), &[0xff]);
    }

    #[test]
    fn test_leaf_without_vis_sees_everything() {
        let mut b = testkit::corridor_builder();
        b.leafs[3].visofs = -1;
        let m = testkit::load(&b.build());
        let row = leaf_pvs(&m, 3);
        assert_eq!(row.as_bytes(), &[0xff]);
        assert_eq!(row.leafs(m.numleafs).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_no_vis_rows_span_bytes() {
        let m = testkit::load(&testkit::hall_builder(21).build());
        assert_eq!(m.numleafs, 21);
        assert_eq!(m.vis_row_bytes(), 3);
        let every: Vec<usize> = (1..=21).collect();
        for leaf in [1, 8, 9, 16, 17, 21] {
            let row = leaf_pvs(&m, leaf);
            assert_eq!(row.as_bytes(), &[0xff; 3]);
            assert_eq!(row.leafs(m.numleafs).collect::<Vec<_>>(), every);
        }
    }

    #[test]
    fn test_row_bits_past_first_byte() {
        let mut b = testkit::hall_builder(21);
        // leafs 1 and 21
        b.visdata = compress_vis(&[0x01, 0x00, 0x10]);
        b.leafs[1].visofs = 0;
        let m = testkit::load(&b.build());
        let row = leaf_pvs(&m, 1);
        assert_eq!(row.as_bytes(), &[0x01, 0x00, 0x10]);
        assert_eq!(row.leafs(m.numleafs).collect::<Vec<_>>(), vec![1, 21]);
        assert!(row.contains_leaf(21));
        assert!(!row.contains_leaf(20));
        assert!(!row.contains_leaf(22));
    }

    #[test]
    fn test_corridor_rows() {
        let m = testkit::load(&testkit::corridor_map());
        let from1 = leaf_pvs(&m, 1);
        assert!(from1.contains_leaf(1));
        assert!(from1.contains_leaf(2));
        assert!(!from1.contains_leaf(3));
        assert!(!from1.contains_leaf(0));
        assert_eq!(leaf_pvs(&m, 2).leafs(m.numleafs).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(leaf_pvs(&m, 3).leafs(m.numleafs).collect::<Vec<_>>(), vec![2, 3]);
    }

    // ============================================================
    // Fat PVS
    // ============================================================

    #[test]
    fn test_fat_pvs_single_leaf() {
        let m = testkit::load(&testkit::corridor_map());
        let fat = fat_pvs(&m, &[-100.0, 0.0, 0.0]);
        assert_eq!(fat.len(), 4);
        assert_eq!(fat.as_bytes(), &[0x03, 0, 0, 0]);
        let fat = fat_pvs(&m, &[100.0, 0.0, 0.0]);
        assert_eq!(fat.as_bytes()[0], 0x06);
    }

    #[test]
    fn test_fat_pvs_merges_near_plane() {
        let m = testkit::load(&testkit::corridor_map());
        // within 8 units of x = 64: leafs 2 and 3
        let fat = fat_pvs(&m, &[62.0, 0.0, 0.0]);
        assert_eq!(fat.as_bytes()[0], 0x07);
        // 9 units away only sees leaf 2's row
        let fat = fat_pvs(&m, &[55.0, 0.0, 0.0]);
        assert_eq!(fat.as_bytes()[0], 0x07);
        let fat = fat_pvs(&m, &[-9.0, 0.0, 0.0]);
        assert_eq!(fat.as_bytes()[0], 0x03);
    }

    #[test]
    fn test_fat_pvs_without_vis_reaches_every_leaf() {
        let m = testkit::load(&testkit::hall_builder(21).build());
        // on the x = 640 split: leafs 11 and 12
        let fat = fat_pvs(&m, &[640.0, 0.0, 0.0]);
        assert_eq!(fat.len(), 6);
        assert_eq!(&fat.as_bytes()[..3], &[0xff; 3]);
        assert_eq!(&fat.as_bytes()[3..], &[0; 3]);
        assert_eq!(fat.leafs(m.numleafs).collect::<Vec<_>>(), (1..=21).collect::<Vec<_>>());
    }

    #[test]
    fn test_fat_pvs_multi_byte_row() {
        let mut b = testkit::hall_builder(21);
        b.visdata = compress_vis(&[0x01, 0x00, 0x10]);
        b.leafs[1].visofs = 0;
        let m = testkit::load(&b.build());
        let fat = fat_pvs(&m, &[-32.0, 0.0, 0.0]);
        assert_eq!(fat.as_bytes(), &[0x01, 0x00, 0x10, 0, 0, 0]);
    }

    #[test]
    fn test_fat_pvs_skips_solid_leaf() {
        let m = testkit::load(&testkit::two_leaf_map());
        // straddles the wall: solid leaf 0 would add an all-visible row
        let fat = fat_pvs(&m, &[4.0, 0.0, 0.0]);
        assert_eq!(fat.as_bytes(), &[0x01, 0, 0, 0]);
    }
}

// md4.rs — block checksums used to fingerprint a level

use md4::{Digest, Md4};

/// MD4 the block and fold the four digest words together with XOR.
pub fn com_block_checksum(data: &[u8]) -> u32 {
    let digest = Md4::digest(data);
    digest
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0, |acc, w| acc ^ w)
}

//! Magic-prefixed in-memory forest blobs
//!
//! The blob is the `.mrf` body behind a 12-byte prologue: the magic
//! `MRSF`, the total blob length, and the byte offset of the root node's
//! bounding box. A host that only needs culling bounds can read the box
//! straight out of the blob without parsing the rest.

use byteorder::{ByteOrder, LittleEndian};
use multires_core::{Forest, Point3f, Vector3f};

use crate::binary::{self, HEADER_LEN, NODE_BBOX_OFFSET, NODE_RECORD_LEN};
use crate::error::{IoError, Result};

pub const MAGIC: [u8; 4] = *b"MRSF";
const PROLOGUE_LEN: usize = 12;

fn root_bbox_offset(forest: &Forest) -> usize {
    // Prologue, header, error params, the nil node record, then the
    // root record up to its bounding-box fields
    PROLOGUE_LEN + HEADER_LEN + 4 * forest.error_params().len() + NODE_RECORD_LEN + NODE_BBOX_OFFSET
}

/// Serialize `forest` into a self-describing memory blob.
pub fn write_forest_to_memory(forest: &Forest) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(PROLOGUE_LEN + HEADER_LEN);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&[0u8; 8]); // size and bbox offset, patched below
    binary::write_body(&mut buf, forest)?;
    let len = buf.len() as u32;
    LittleEndian::write_u32(&mut buf[4..8], len);
    LittleEndian::write_u32(&mut buf[8..12], root_bbox_offset(forest) as u32);
    Ok(buf)
}

/// Deserialize a forest from a blob produced by [`write_forest_to_memory`].
pub fn read_forest_from_memory(blob: &[u8]) -> Result<Forest> {
    if blob.len() < PROLOGUE_LEN || blob[..4] != MAGIC {
        return Err(IoError::InvalidData("missing MRSF magic".into()));
    }
    let size = LittleEndian::read_u32(&blob[4..8]) as usize;
    if size != blob.len() {
        return Err(IoError::InvalidData(format!(
            "blob length {} disagrees with recorded size {}",
            blob.len(),
            size
        )));
    }
    let bbox_offset = LittleEndian::read_u32(&blob[8..12]) as usize;
    if bbox_offset + 24 > blob.len() {
        return Err(IoError::InvalidData(
            "bounding-box offset points past the blob".into(),
        ));
    }
    binary::read_body(&mut &blob[PROLOGUE_LEN..])
}

/// Read the root bounding box straight out of a blob without parsing it.
pub fn peek_root_bounding_box(blob: &[u8]) -> Result<(Point3f, Vector3f)> {
    if blob.len() < PROLOGUE_LEN || blob[..4] != MAGIC {
        return Err(IoError::InvalidData("missing MRSF magic".into()));
    }
    let off = LittleEndian::read_u32(&blob[8..12]) as usize;
    if off + 24 > blob.len() {
        return Err(IoError::InvalidData(
            "bounding-box offset points past the blob".into(),
        ));
    }
    let mut f = [0f32; 6];
    for (i, v) in f.iter_mut().enumerate() {
        *v = LittleEndian::read_f32(&blob[off + 4 * i..]);
    }
    Ok((
        Point3f::new(f[0], f[1], f[2]),
        Vector3f::new(f[3], f[4], f[5]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use multires_core::ROOT;

    use crate::test_fixtures::sample_forest;

    #[test]
    fn test_memory_roundtrip() {
        let forest = sample_forest();
        let blob = write_forest_to_memory(&forest).unwrap();
        assert_eq!(&blob[..4], b"MRSF");
        let loaded = read_forest_from_memory(&blob).unwrap();
        assert_eq!(loaded.node_count(), forest.node_count());
        assert_eq!(loaded.tri_count(), forest.tri_count());
    }

    #[test]
    fn test_peek_bounding_box_matches_root() {
        let forest = sample_forest();
        let blob = write_forest_to_memory(&forest).unwrap();
        let (center, half) = peek_root_bounding_box(&blob).unwrap();
        assert_eq!(center, forest.node(ROOT).center);
        assert_eq!(half, forest.node(ROOT).half_extents);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let forest = sample_forest();
        let mut blob = write_forest_to_memory(&forest).unwrap();
        blob[0] = b'X';
        assert!(read_forest_from_memory(&blob).is_err());
    }

    #[test]
    fn test_recorded_size_must_match() {
        let forest = sample_forest();
        let mut blob = write_forest_to_memory(&forest).unwrap();
        blob.push(0);
        assert!(read_forest_from_memory(&blob).is_err());
    }
}

//! The `.mrf` persisted-hierarchy format
//!
//! Little-endian throughout, fixed field order: a header, the
//! error-parameter array, the node array (slot 0 written as nil), the
//! vertex attributes, then the triangle array (slot 0 nil). The node
//! array is stored in its depth-first order so a load needs no
//! renumbering pass.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use multires_core::{Forest, GeometryStore, Node, Point3f, Tri, Vector3f};

use crate::error::{IoError, Result};

pub const FORMAT_MAJOR: u32 = 1;
pub const FORMAT_MINOR: u32 = 0;

/// Byte length of the fixed header
pub(crate) const HEADER_LEN: usize = 36;
/// Byte length of one serialized node record
pub(crate) const NODE_RECORD_LEN: usize = 58;
/// Offset of the bounding-box fields inside a node record
pub(crate) const NODE_BBOX_OFFSET: usize = 26;

struct Header {
    colors_present: bool,
    normals_present: bool,
    num_textures: u32,
    num_nodes: u32,
    num_node_positions: u32,
    num_tris: u32,
    num_patches: u16,
    num_error_params: u32,
    error_param_size: i32,
}

fn write_header<W: Write>(w: &mut W, forest: &Forest) -> Result<()> {
    let geo = forest.geometry();
    w.write_u32::<LittleEndian>(FORMAT_MAJOR)?;
    w.write_u32::<LittleEndian>(FORMAT_MINOR)?;
    w.write_u8(geo.colors.is_some() as u8)?;
    w.write_u8(geo.normals.is_some() as u8)?;
    w.write_u32::<LittleEndian>(geo.texcoords.len() as u32)?;
    w.write_u32::<LittleEndian>(forest.node_count() as u32)?;
    w.write_u32::<LittleEndian>(geo.positions.len() as u32)?;
    w.write_u32::<LittleEndian>(forest.tri_count() as u32)?;
    w.write_u16::<LittleEndian>(forest.num_patches())?;
    w.write_u32::<LittleEndian>(forest.error_params().len() as u32)?;
    w.write_i32::<LittleEndian>(forest.error_param_size() as i32)?;
    Ok(())
}

fn read_header<R: Read>(r: &mut R) -> Result<Header> {
    let major = r.read_u32::<LittleEndian>()?;
    let minor = r.read_u32::<LittleEndian>()?;
    if major != FORMAT_MAJOR || minor != FORMAT_MINOR {
        return Err(IoError::VersionMismatch {
            found_major: major,
            found_minor: minor,
            expected_major: FORMAT_MAJOR,
            expected_minor: FORMAT_MINOR,
        });
    }
    Ok(Header {
        colors_present: r.read_u8()? != 0,
        normals_present: r.read_u8()? != 0,
        num_textures: r.read_u32::<LittleEndian>()?,
        num_nodes: r.read_u32::<LittleEndian>()?,
        num_node_positions: r.read_u32::<LittleEndian>()?,
        num_tris: r.read_u32::<LittleEndian>()?,
        num_patches: r.read_u16::<LittleEndian>()?,
        num_error_params: r.read_u32::<LittleEndian>()?,
        error_param_size: r.read_i32::<LittleEndian>()?,
    })
}

fn write_node<W: Write>(w: &mut W, n: &Node) -> Result<()> {
    w.write_u32::<LittleEndian>(n.parent)?;
    w.write_u32::<LittleEndian>(n.left_sibling)?;
    w.write_u32::<LittleEndian>(n.right_sibling)?;
    w.write_u32::<LittleEndian>(n.first_child)?;
    w.write_u32::<LittleEndian>(n.first_subtri)?;
    w.write_u32::<LittleEndian>(n.coincident)?;
    w.write_u16::<LittleEndian>(n.patch)?;
    for i in 0..3 {
        w.write_f32::<LittleEndian>(n.center[i])?;
    }
    for i in 0..3 {
        w.write_f32::<LittleEndian>(n.half_extents[i])?;
    }
    w.write_u32::<LittleEndian>(n.attribute)?;
    w.write_u32::<LittleEndian>(n.error_param)?;
    Ok(())
}

fn read_node<R: Read>(r: &mut R) -> Result<Node> {
    let parent = r.read_u32::<LittleEndian>()?;
    let left_sibling = r.read_u32::<LittleEndian>()?;
    let right_sibling = r.read_u32::<LittleEndian>()?;
    let first_child = r.read_u32::<LittleEndian>()?;
    let first_subtri = r.read_u32::<LittleEndian>()?;
    let coincident = r.read_u32::<LittleEndian>()?;
    let patch = r.read_u16::<LittleEndian>()?;
    let mut center = [0f32; 3];
    let mut half = [0f32; 3];
    for c in center.iter_mut() {
        *c = r.read_f32::<LittleEndian>()?;
    }
    for h in half.iter_mut() {
        *h = r.read_f32::<LittleEndian>()?;
    }
    let attribute = r.read_u32::<LittleEndian>()?;
    let error_param = r.read_u32::<LittleEndian>()?;
    Ok(Node {
        parent,
        left_sibling,
        right_sibling,
        first_child,
        first_subtri,
        coincident,
        patch,
        center: Point3f::new(center[0], center[1], center[2]),
        half_extents: Vector3f::new(half[0], half[1], half[2]),
        attribute,
        error_param,
    })
}

fn write_tri<W: Write>(w: &mut W, t: &Tri) -> Result<()> {
    for &c in &t.corners {
        w.write_u32::<LittleEndian>(c)?;
    }
    w.write_u16::<LittleEndian>(t.patch)?;
    w.write_u32::<LittleEndian>(t.next_subtri)?;
    Ok(())
}

fn read_tri<R: Read>(r: &mut R) -> Result<Tri> {
    let mut corners = [0u32; 3];
    for c in corners.iter_mut() {
        *c = r.read_u32::<LittleEndian>()?;
    }
    let patch = r.read_u16::<LittleEndian>()?;
    let next_subtri = r.read_u32::<LittleEndian>()?;
    Ok(Tri {
        corners,
        patch,
        next_subtri,
    })
}

/// Serialize the whole forest body (header included) into `w`.
pub(crate) fn write_body<W: Write>(w: &mut W, forest: &Forest) -> Result<()> {
    write_header(w, forest)?;
    for &p in forest.error_params() {
        w.write_f32::<LittleEndian>(p)?;
    }
    for node in forest.nodes() {
        write_node(w, node)?;
    }
    let geo = forest.geometry();
    for p in &geo.positions {
        for i in 0..3 {
            w.write_f32::<LittleEndian>(p[i])?;
        }
    }
    if let Some(normals) = &geo.normals {
        for n in normals {
            for i in 0..3 {
                w.write_f32::<LittleEndian>(n[i])?;
            }
        }
    }
    if let Some(colors) = &geo.colors {
        for c in colors {
            w.write_all(c)?;
        }
    }
    for layer in &geo.texcoords {
        for uv in layer {
            w.write_f32::<LittleEndian>(uv[0])?;
            w.write_f32::<LittleEndian>(uv[1])?;
        }
    }
    for tri in forest.tris() {
        write_tri(w, tri)?;
    }
    Ok(())
}

/// Deserialize a forest body (header included) from `r`.
pub(crate) fn read_body<R: Read>(r: &mut R) -> Result<Forest> {
    let h = read_header(r)?;
    if h.error_param_size < 0 {
        return Err(IoError::InvalidData(format!(
            "negative error-parameter record size {}",
            h.error_param_size
        )));
    }

    let mut error_params = Vec::with_capacity(h.num_error_params as usize);
    for _ in 0..h.num_error_params {
        error_params.push(r.read_f32::<LittleEndian>()?);
    }

    let mut nodes = Vec::with_capacity(h.num_nodes as usize + 1);
    for _ in 0..=h.num_nodes {
        nodes.push(read_node(r)?);
    }

    let np = h.num_node_positions as usize;
    let mut positions = Vec::with_capacity(np);
    for _ in 0..np {
        let x = r.read_f32::<LittleEndian>()?;
        let y = r.read_f32::<LittleEndian>()?;
        let z = r.read_f32::<LittleEndian>()?;
        positions.push(Point3f::new(x, y, z));
    }
    let normals = if h.normals_present {
        let mut normals = Vec::with_capacity(np);
        for _ in 0..np {
            let x = r.read_f32::<LittleEndian>()?;
            let y = r.read_f32::<LittleEndian>()?;
            let z = r.read_f32::<LittleEndian>()?;
            normals.push(Vector3f::new(x, y, z));
        }
        Some(normals)
    } else {
        None
    };
    let colors = if h.colors_present {
        let mut colors = vec![[0u8; 3]; np];
        for c in colors.iter_mut() {
            r.read_exact(c)?;
        }
        Some(colors)
    } else {
        None
    };
    let mut texcoords = Vec::with_capacity(h.num_textures as usize);
    for _ in 0..h.num_textures {
        let mut layer = Vec::with_capacity(np);
        for _ in 0..np {
            let u = r.read_f32::<LittleEndian>()?;
            let v = r.read_f32::<LittleEndian>()?;
            layer.push([u, v]);
        }
        texcoords.push(layer);
    }

    let mut tris = Vec::with_capacity(h.num_tris as usize + 1);
    for _ in 0..=h.num_tris {
        tris.push(read_tri(r)?);
    }

    let geometry = GeometryStore {
        positions,
        normals,
        colors,
        texcoords,
    };
    Ok(Forest::from_parts(
        nodes,
        tris,
        geometry,
        error_params,
        h.error_param_size as usize,
        h.num_patches,
    )?)
}

/// Write a forest to a `.mrf` file.
pub fn write_mrf<P: AsRef<Path>>(forest: &Forest, path: P) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_body(&mut w, forest)?;
    w.flush()?;
    Ok(())
}

/// Read a forest from a `.mrf` file.
pub fn read_mrf<P: AsRef<Path>>(path: P) -> Result<Forest> {
    let mut r = BufReader::new(File::open(path)?);
    read_body(&mut r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::sample_forest;

    #[test]
    fn test_binary_roundtrip_preserves_forest() {
        let forest = sample_forest();
        let mut buf = Vec::new();
        write_body(&mut buf, &forest).unwrap();
        let loaded = read_body(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.node_count(), forest.node_count());
        assert_eq!(loaded.tri_count(), forest.tri_count());
        assert_eq!(loaded.num_patches(), forest.num_patches());
        assert_eq!(loaded.error_params(), forest.error_params());
        assert_eq!(loaded.error_param_size(), forest.error_param_size());
        for i in 1..=forest.node_count() {
            let (a, b) = (forest.node(i as u32), loaded.node(i as u32));
            assert_eq!(a.parent, b.parent);
            assert_eq!(a.first_child, b.first_child);
            assert_eq!(a.first_subtri, b.first_subtri);
            assert_eq!(a.coincident, b.coincident);
            assert_eq!(a.attribute, b.attribute);
            assert_eq!(a.center, b.center);
            assert_eq!(a.half_extents, b.half_extents);
        }
        for t in 1..=forest.tri_count() {
            assert_eq!(forest.tri(t as u32).corners, loaded.tri(t as u32).corners);
            assert_eq!(
                forest.tri(t as u32).next_subtri,
                loaded.tri(t as u32).next_subtri
            );
        }
        assert_eq!(loaded.geometry().positions, forest.geometry().positions);
        assert_eq!(loaded.geometry().texcoords, forest.geometry().texcoords);
    }

    #[test]
    fn test_major_version_mismatch_is_fatal() {
        let forest = sample_forest();
        let mut buf = Vec::new();
        write_body(&mut buf, &forest).unwrap();
        buf[0] = FORMAT_MAJOR as u8 + 1; // bump the stored major version
        match read_body(&mut buf.as_slice()) {
            Err(IoError::VersionMismatch { found_major, .. }) => {
                assert_eq!(found_major, FORMAT_MAJOR + 1);
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_minor_version_mismatch_is_fatal() {
        let forest = sample_forest();
        let mut buf = Vec::new();
        write_body(&mut buf, &forest).unwrap();
        buf[4] = FORMAT_MINOR as u8 + 1; // bump the stored minor version
        match read_body(&mut buf.as_slice()) {
            Err(IoError::VersionMismatch { found_minor, .. }) => {
                assert_eq!(found_minor, FORMAT_MINOR + 1);
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_truncated_file_is_fatal() {
        let forest = sample_forest();
        let mut buf = Vec::new();
        write_body(&mut buf, &forest).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(matches!(
            read_body(&mut buf.as_slice()),
            Err(IoError::Io(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let forest = sample_forest();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.mrf");
        write_mrf(&forest, &path).unwrap();
        let loaded = read_mrf(&path).unwrap();
        assert_eq!(loaded.node_count(), forest.node_count());
        assert_eq!(loaded.geometry().positions, forest.geometry().positions);
    }
}

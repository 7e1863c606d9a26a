//! The VIF text interchange format
//!
//! A line-oriented format meant for tool pipelines and hand-built test
//! hierarchies. The leading letter of each record names its kind; indexed
//! records must appear in index order so a bad generator fails loudly
//! rather than shuffling data:
//!
//! ```text
//! VIF1.0
//! format: pcnx2
//! counts <positions> <vertices> <tris> <patches> <errorRecords> <merges>
//! p<i> x y z
//! c<i> r g b
//! n<i> x y z
//! x<layer> u v
//! v<i> posIdx patch [coincidentIdx]
//! t a b c patch
//! e<i> f0 .. f(size-1)
//! m<parentIdx> [e<rec>] child0 child1 ...
//! ```
//!
//! The per-record error-parameter size is taken from the first `e`
//! record; every later record must match it.
//!
//! The reader feeds a [`ForestBuilder`], so a parsed file passes the full
//! topology validation before a `Forest` comes back.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use multires_core::{Forest, ForestBuilder, Point3f, Vector3f, NIL};

use crate::error::{IoError, Result};

pub const VIF_MAJOR: u32 = 1;
pub const VIF_MINOR: u32 = 0;

fn parse_err(line: usize, message: impl Into<String>) -> IoError {
    IoError::ParseError {
        line,
        message: message.into(),
    }
}

/// Parses every remaining token of a record; any non-numeric token is fatal.
fn parse_fields<T: std::str::FromStr>(
    toks: &mut dyn Iterator<Item = &str>,
    line: usize,
) -> Result<Vec<T>> {
    toks.map(|t| {
        t.parse()
            .map_err(|_| parse_err(line, format!("bad numeric field '{}'", t)))
    })
    .collect()
}

/// Splits a record tag like `v12` into its letter and index.
fn split_tag(tok: &str) -> Option<(char, Option<usize>)> {
    let mut chars = tok.chars();
    let letter = chars.next()?;
    let rest = chars.as_str();
    if rest.is_empty() {
        Some((letter, None))
    } else {
        rest.parse().ok().map(|i| (letter, Some(i)))
    }
}

struct Counts {
    positions: usize,
    vertices: usize,
    tris: usize,
    patches: usize,
    error_records: usize,
    merges: usize,
}

/// Read a forest from VIF text.
pub fn read_vif<R: BufRead>(r: R) -> Result<Forest> {
    let mut lines = r.lines().enumerate();

    // Header line: VIF<major>.<minor>
    let (_, header) = lines
        .next()
        .ok_or_else(|| parse_err(1, "empty file"))
        .and_then(|(i, l)| Ok((i, l?)))?;
    let version = header
        .strip_prefix("VIF")
        .ok_or_else(|| parse_err(1, "missing VIF header"))?;
    let (major, minor) = version
        .split_once('.')
        .and_then(|(a, b)| Some((a.parse().ok()?, b.trim().parse().ok()?)))
        .ok_or_else(|| parse_err(1, format!("bad version '{}'", version)))?;
    if major != VIF_MAJOR || minor != VIF_MINOR {
        return Err(IoError::VersionMismatch {
            found_major: major,
            found_minor: minor,
            expected_major: VIF_MAJOR,
            expected_minor: VIF_MINOR,
        });
    }

    let mut builder = ForestBuilder::new();
    let mut counts: Option<Counts> = None;
    let mut has_colors = false;
    let mut has_normals = false;
    let mut num_textures = 0usize;

    let mut n_positions = 0usize;
    let mut n_vertices = 0usize;
    let mut n_tris = 0usize;
    let mut normals = Vec::new();
    let mut colors = Vec::new();
    let mut texcoords: Vec<Vec<[f32; 2]>> = Vec::new();
    let mut error_params = Vec::new();
    let mut error_param_size: Option<usize> = None;
    let mut n_error_records = 0usize;
    let mut n_merges = 0usize;
    let mut max_patch: Option<u16> = None;

    for (idx, line) in lines {
        let lineno = idx + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut toks = line.split_whitespace();
        let tag = toks.next().unwrap_or_default();

        if tag == "format:" {
            let f = toks
                .next()
                .ok_or_else(|| parse_err(lineno, "format line without a format string"))?;
            let f = f
                .strip_prefix('p')
                .ok_or_else(|| parse_err(lineno, "format must start with 'p'"))?;
            let mut rest = f;
            if let Some(r) = rest.strip_prefix('c') {
                has_colors = true;
                rest = r;
            }
            if let Some(r) = rest.strip_prefix('n') {
                has_normals = true;
                rest = r;
            }
            if let Some(r) = rest.strip_prefix('x') {
                num_textures = r
                    .parse()
                    .map_err(|_| parse_err(lineno, format!("bad texture count '{}'", r)))?;
                rest = "";
            }
            if !rest.is_empty() {
                return Err(parse_err(lineno, format!("unrecognized format flags '{}'", rest)));
            }
            texcoords = vec![Vec::new(); num_textures];
            continue;
        }
        if tag == "counts" {
            let mut next = |name: &str| -> Result<usize> {
                toks.next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| parse_err(lineno, format!("bad or missing {} count", name)))
            };
            counts = Some(Counts {
                positions: next("position")?,
                vertices: next("vertex")?,
                tris: next("triangle")?,
                patches: next("patch")?,
                error_records: next("error-record")?,
                merges: next("merge")?,
            });
            continue;
        }

        let (letter, tag_index) = split_tag(tag)
            .ok_or_else(|| parse_err(lineno, format!("unrecognized record '{}'", tag)))?;
        let floats = |toks: &mut dyn Iterator<Item = &str>, n: usize| -> Result<Vec<f32>> {
            let vals: Vec<f32> = parse_fields(toks, lineno)?;
            if vals.len() != n {
                Err(parse_err(lineno, format!("expected {} numeric fields", n)))
            } else {
                Ok(vals)
            }
        };
        let expect_index = |got: Option<usize>, want: usize| -> Result<()> {
            match got {
                Some(i) if i == want => Ok(()),
                _ => Err(parse_err(
                    lineno,
                    format!("record index {:?} out of order (expected {})", got, want),
                )),
            }
        };

        match letter {
            'p' => {
                expect_index(tag_index, n_positions)?;
                let f = floats(&mut toks, 3)?;
                builder.add_position(Point3f::new(f[0], f[1], f[2]));
                n_positions += 1;
            }
            'c' => {
                expect_index(tag_index, colors.len())?;
                let vals: Vec<u8> = parse_fields(&mut toks, lineno)?;
                if vals.len() != 3 {
                    return Err(parse_err(lineno, "color record needs r g b"));
                }
                colors.push([vals[0], vals[1], vals[2]]);
            }
            'n' => {
                expect_index(tag_index, normals.len())?;
                let f = floats(&mut toks, 3)?;
                normals.push(Vector3f::new(f[0], f[1], f[2]));
            }
            'x' => {
                let layer = tag_index
                    .filter(|&j| j < num_textures)
                    .ok_or_else(|| parse_err(lineno, "texcoord record for unknown layer"))?;
                let f = floats(&mut toks, 2)?;
                texcoords[layer].push([f[0], f[1]]);
            }
            'v' => {
                expect_index(tag_index, n_vertices)?;
                let fields: Vec<usize> = parse_fields(&mut toks, lineno)?;
                let (pos, patch, coincident) = match fields.as_slice() {
                    [p, patch] => (*p, *patch, None),
                    [p, patch, co] => (*p, *patch, Some(*co)),
                    _ => return Err(parse_err(lineno, "vertex record needs posIdx patch [coincident]")),
                };
                let patch = u16::try_from(patch)
                    .map_err(|_| parse_err(lineno, "patch id out of range"))?;
                max_patch = Some(max_patch.map_or(patch, |m| m.max(patch)));
                builder.add_vertex(pos, patch, coincident);
                n_vertices += 1;
            }
            't' => {
                let fields: Vec<usize> = parse_fields(&mut toks, lineno)?;
                let [a, b, c, patch] = fields.as_slice() else {
                    return Err(parse_err(lineno, "triangle record needs a b c patch"));
                };
                let patch = u16::try_from(*patch)
                    .map_err(|_| parse_err(lineno, "patch id out of range"))?;
                max_patch = Some(max_patch.map_or(patch, |m| m.max(patch)));
                builder.add_tri([*a, *b, *c], patch);
                n_tris += 1;
            }
            'e' => {
                expect_index(tag_index, n_error_records)?;
                let f: Vec<f32> = parse_fields(&mut toks, lineno)?;
                match error_param_size {
                    None if f.is_empty() => {
                        return Err(parse_err(lineno, "empty error-parameter record"));
                    }
                    None => error_param_size = Some(f.len()),
                    Some(size) if f.len() != size => {
                        return Err(parse_err(
                            lineno,
                            format!("expected {} error parameters, found {}", size, f.len()),
                        ));
                    }
                    Some(_) => {}
                }
                error_params.extend_from_slice(&f);
                n_error_records += 1;
            }
            'm' => {
                let parent = tag_index
                    .ok_or_else(|| parse_err(lineno, "merge record without a parent index"))?;
                let mut children = Vec::new();
                let mut error_param = None;
                for tok in toks {
                    if let Some(rest) = tok.strip_prefix('e') {
                        if let Ok(rec) = rest.parse::<usize>() {
                            error_param = Some(rec);
                            continue;
                        }
                    }
                    let child: usize = tok
                        .parse()
                        .map_err(|_| parse_err(lineno, format!("bad child index '{}'", tok)))?;
                    children.push(child);
                }
                builder.add_merge(parent, &children, error_param);
                n_merges += 1;
            }
            other => {
                return Err(parse_err(lineno, format!("unrecognized record '{}'", other)));
            }
        }
    }

    let counts = counts.ok_or_else(|| parse_err(0, "missing counts line"))?;
    if n_positions != counts.positions
        || n_vertices != counts.vertices
        || n_tris != counts.tris
        || n_error_records != counts.error_records
        || n_merges != counts.merges
    {
        return Err(IoError::InvalidData(format!(
            "counts line promised {}/{}/{}/{}/{} records, file holds {}/{}/{}/{}/{}",
            counts.positions,
            counts.vertices,
            counts.tris,
            counts.error_records,
            counts.merges,
            n_positions,
            n_vertices,
            n_tris,
            n_error_records,
            n_merges
        )));
    }
    if let Some(mp) = max_patch {
        if mp as usize >= counts.patches {
            return Err(IoError::InvalidData(format!(
                "patch id {} out of range for {} patches",
                mp, counts.patches
            )));
        }
    }
    if has_normals {
        builder.set_normals(normals);
    }
    if has_colors {
        builder.set_colors(colors);
    }
    for layer in texcoords {
        builder.add_texcoord_layer(layer);
    }
    if let Some(size) = error_param_size {
        builder.set_error_params(error_params, size);
    }
    Ok(builder.build()?)
}

/// Write a forest as VIF text.
pub fn write_vif<W: Write>(w: &mut W, forest: &Forest) -> Result<()> {
    let geo = forest.geometry();
    writeln!(w, "VIF{}.{}", VIF_MAJOR, VIF_MINOR)?;

    let mut format = String::from("p");
    if geo.colors.is_some() {
        format.push('c');
    }
    if geo.normals.is_some() {
        format.push('n');
    }
    if !geo.texcoords.is_empty() {
        format.push('x');
        format.push_str(&geo.texcoords.len().to_string());
    }
    writeln!(w, "format: {}", format)?;

    let size = forest.error_param_size();
    let error_records = if size > 0 {
        forest.error_params().len() / size
    } else {
        0
    };
    let merges = (1..=forest.node_count() as u32)
        .filter(|&i| forest.node(i).first_child != NIL)
        .count();
    writeln!(
        w,
        "counts {} {} {} {} {} {}",
        geo.positions.len(),
        forest.node_count(),
        forest.tri_count(),
        forest.num_patches(),
        error_records,
        merges
    )?;

    for (i, p) in geo.positions.iter().enumerate() {
        writeln!(w, "p{} {} {} {}", i, p.x, p.y, p.z)?;
    }
    if let Some(colors) = &geo.colors {
        for (i, c) in colors.iter().enumerate() {
            writeln!(w, "c{} {} {} {}", i, c[0], c[1], c[2])?;
        }
    }
    if let Some(normals) = &geo.normals {
        for (i, n) in normals.iter().enumerate() {
            writeln!(w, "n{} {} {} {}", i, n.x, n.y, n.z)?;
        }
    }
    for (j, layer) in geo.texcoords.iter().enumerate() {
        for uv in layer {
            writeln!(w, "x{} {} {}", j, uv[0], uv[1])?;
        }
    }

    // Nodes in depth-first order; node i becomes vertex i-1, so a
    // rebuild reproduces the same numbering
    for i in 1..=forest.node_count() as u32 {
        let n = forest.node(i);
        if n.coincident != NIL {
            writeln!(
                w,
                "v{} {} {} {}",
                i - 1,
                n.attribute,
                n.patch,
                n.coincident - 1
            )?;
        } else {
            writeln!(w, "v{} {} {}", i - 1, n.attribute, n.patch)?;
        }
    }
    for t in 1..=forest.tri_count() as u32 {
        let tri = forest.tri(t);
        writeln!(
            w,
            "t {} {} {} {}",
            tri.corners[0] - 1,
            tri.corners[1] - 1,
            tri.corners[2] - 1,
            tri.patch
        )?;
    }
    if size > 0 {
        for (i, rec) in forest.error_params().chunks(size).enumerate() {
            write!(w, "e{}", i)?;
            for f in rec {
                write!(w, " {}", f)?;
            }
            writeln!(w)?;
        }
    }
    for i in 1..=forest.node_count() as u32 {
        let n = forest.node(i);
        if n.first_child == NIL {
            continue;
        }
        write!(w, "m{}", i - 1)?;
        if n.error_param != 0 {
            write!(w, " e{}", n.error_param - 1)?;
        }
        for child in forest.children(i) {
            write!(w, " {}", child - 1)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Read a forest from a `.vif` file.
pub fn read_vif_file<P: AsRef<Path>>(path: P) -> Result<Forest> {
    read_vif(BufReader::new(File::open(path)?))
}

/// Write a forest to a `.vif` file.
pub fn write_vif_file<P: AsRef<Path>>(forest: &Forest, path: P) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_vif(&mut w, forest)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use multires_core::ROOT;

    use crate::test_fixtures::sample_forest;

    #[test]
    fn test_vif_roundtrip_is_isomorphic() {
        let forest = sample_forest();
        let mut text = Vec::new();
        write_vif(&mut text, &forest).unwrap();
        let loaded = read_vif(text.as_slice()).unwrap();

        assert_eq!(loaded.node_count(), forest.node_count());
        assert_eq!(loaded.tri_count(), forest.tri_count());
        assert_eq!(loaded.num_patches(), forest.num_patches());
        for i in 1..=forest.node_count() as u32 {
            let (a, b) = (forest.node(i), loaded.node(i));
            assert_eq!(a.parent, b.parent);
            assert_eq!(a.first_child, b.first_child);
            assert_eq!(a.attribute, b.attribute);
            assert_eq!(a.patch, b.patch);
            assert_eq!(a.coincident, b.coincident);
            assert_eq!(a.error_param, b.error_param);
        }
        for t in 1..=forest.tri_count() as u32 {
            assert_eq!(forest.tri(t).corners, loaded.tri(t).corners);
        }
        assert_eq!(loaded.error_params(), forest.error_params());
        assert_eq!(loaded.node(ROOT).center, forest.node(ROOT).center);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let text = "VIF9.0\nformat: p\ncounts 0 0 0 0 0 0\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::VersionMismatch { found_major: 9, .. })
        ));
    }

    #[test]
    fn test_newer_minor_version_rejected() {
        let text = "VIF1.1\nformat: p\ncounts 0 0 0 0 0 0\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::VersionMismatch {
                found_major: 1,
                found_minor: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_out_of_order_record_rejected() {
        let text = "VIF1.0\nformat: p\ncounts 2 1 0 1 0 0\np1 0 0 0\np0 1 0 0\nv0 0 0\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::ParseError { line: 4, .. })
        ));
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let text = "VIF1.0\nformat: p\ncounts 2 1 0 1 0 0\np0 0 0 0\nv0 0 0\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::InvalidData(_))
        ));
    }

    #[test]
    fn test_merge_count_mismatch_rejected() {
        let text = "VIF1.0\nformat: p\ncounts 4 4 1 1 0 0\n\
                    p0 0 0 0\np1 1 0 0\np2 0 1 0\np3 0.3 0.3 0\n\
                    v0 0 0\nv1 1 0\nv2 2 0\nv3 3 0\n\
                    t 0 1 2 0\n\
                    m3 0 1 2\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::InvalidData(_))
        ));
    }

    #[test]
    fn test_patch_id_beyond_patch_count_rejected() {
        let text = "VIF1.0\nformat: p\ncounts 4 4 1 1 0 1\n\
                    p0 0 0 0\np1 1 0 0\np2 0 1 0\np3 0.3 0.3 0\n\
                    v0 0 1\nv1 1 1\nv2 2 1\nv3 3 1\n\
                    t 0 1 2 1\n\
                    m3 0 1 2\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::InvalidData(_))
        ));
    }

    #[test]
    fn test_malformed_vertex_rejected() {
        let text = "VIF1.0\nformat: p\ncounts 1 1 0 1 0 0\np0 0 0 0\nv0\n";
        assert!(read_vif(text.as_bytes()).is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let text = "VIF1.0\nformat: p\ncounts 4 4 1 1 0 1\n\
                    p0 0 0 0\np1 1 0 0\np2 0 1 0\np3 0.3 0.3 0\n\
                    v0 0 0\nv1 1 0\nv2 2 0\nv3 3 0\n\
                    t 0 1 2 0 zz\n\
                    m3 0 1 2\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::ParseError { line: 12, .. })
        ));
    }

    #[test]
    fn test_ragged_error_record_rejected() {
        let text = "VIF1.0\nformat: p\ncounts 4 4 1 1 2 1\n\
                    p0 0 0 0\np1 1 0 0\np2 0 1 0\np3 0.3 0.3 0\n\
                    v0 0 0\nv1 1 0\nv2 2 0\nv3 3 0\n\
                    t 0 1 2 0\n\
                    e0 0.5 0.5\ne1 0.5\n\
                    m3 e1 0 1 2\n";
        assert!(matches!(
            read_vif(text.as_bytes()),
            Err(IoError::ParseError { line: 14, .. })
        ));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let text = "VIF1.0\n# tiny single-triangle forest\nformat: p\n\ncounts 4 4 1 1 0 1\n\
                    p0 0 0 0\np1 1 0 0\np2 0 1 0\np3 0.3 0.3 0\n\
                    v0 0 0\nv1 1 0\nv2 2 0\nv3 3 0\n\
                    t 0 1 2 0\n\
                    m3 0 1 2\n";
        let forest = read_vif(text.as_bytes()).unwrap();
        assert_eq!(forest.node_count(), 4);
        assert_eq!(forest.tri_count(), 1);
    }
}

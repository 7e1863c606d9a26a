//! Format round-trip demo
//!
//! Parses a small hand-written VIF hierarchy, persists it as binary and
//! as an in-memory blob, and reads everything back.

use multires_io::{
    peek_root_bounding_box, read_forest, read_vif, write_forest, write_forest_to_memory,
};

const SAMPLE_VIF: &str = "\
VIF1.0
# one quad split into two triangles, merged into a single root
format: p
counts 5 5 2 1 0 1
p0 0 0 0
p1 1 0 0
p2 0 1 0
p3 1 1 0
p4 0.5 0.5 0
v0 0 0
v1 1 0
v2 2 0
v3 3 0
v4 4 0
t 0 1 2 0
t 1 3 2 0
m4 0 1 2 3
";

fn main() -> anyhow::Result<()> {
    println!("VIF / MRF round-trip");
    println!("====================");

    let forest = read_vif(SAMPLE_VIF.as_bytes())?;
    println!(
        "Parsed VIF: {} nodes, {} triangles, {} patch(es)",
        forest.node_count(),
        forest.tri_count(),
        forest.num_patches()
    );

    let dir = std::env::temp_dir();
    let vif_path = dir.join("demo_forest.vif");
    let mrf_path = dir.join("demo_forest.mrf");

    write_forest(&forest, &vif_path)?;
    write_forest(&forest, &mrf_path)?;
    println!("Wrote {} and {}", vif_path.display(), mrf_path.display());

    let from_text = read_forest(&vif_path)?;
    let from_binary = read_forest(&mrf_path)?;
    println!(
        "Read back: text {} nodes, binary {} nodes",
        from_text.node_count(),
        from_binary.node_count()
    );

    let blob = write_forest_to_memory(&forest)?;
    let (center, half) = peek_root_bounding_box(&blob)?;
    println!(
        "Memory blob: {} bytes; root bbox center ({}, {}, {}), half extents ({}, {}, {})",
        blob.len(),
        center.x,
        center.y,
        center.z,
        half.x,
        half.y,
        half.z
    );

    std::fs::remove_file(&vif_path).ok();
    std::fs::remove_file(&mrf_path).ok();
    Ok(())
}

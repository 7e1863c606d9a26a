//! Budget-driven simplification walkthrough
//!
//! Builds a three-level strip hierarchy, then drives a cut through a
//! series of triangle budgets and prints what the renderer would draw
//! at each stop.

use std::sync::Arc;

use multires_core::{Forest, ForestBuilder, Point3f};
use multires_cut::{BoundBoxDiagonal, Cut, DebugContext, Simplifier};

fn strip_hierarchy() -> anyhow::Result<Arc<Forest>> {
    let mut b = ForestBuilder::new();

    // Eight leaves along a zig-zag strip
    for i in 0..8 {
        b.add_position(Point3f::new(i as f32, (i % 2) as f32 * 0.4, 0.0));
    }
    // Cluster midpoints for the three merge levels
    for i in 0..4 {
        b.add_position(Point3f::new(0.5 + 2.0 * i as f32, 0.2, 0.0));
    }
    b.add_position(Point3f::new(1.5, 0.2, 0.0));
    b.add_position(Point3f::new(5.5, 0.2, 0.0));
    b.add_position(Point3f::new(3.5, 0.2, 0.0));

    let leaves: Vec<usize> = (0..8).map(|i| b.add_vertex(i, 0, None)).collect();
    let clusters: Vec<usize> = (0..4).map(|i| b.add_vertex(8 + i, 0, None)).collect();
    let mids = [b.add_vertex(12, 0, None), b.add_vertex(13, 0, None)];
    let root = b.add_vertex(14, 0, None);

    for i in 0..6 {
        b.add_tri([leaves[i], leaves[i + 1], leaves[i + 2]], 0);
    }
    for i in 0..4 {
        b.add_merge(clusters[i], &[leaves[2 * i], leaves[2 * i + 1]], None);
    }
    b.add_merge(mids[0], &[clusters[0], clusters[1]], None);
    b.add_merge(mids[1], &[clusters[2], clusters[3]], None);
    b.add_merge(root, &[mids[0], mids[1]], None);

    Ok(Arc::new(b.build()?))
}

fn main() -> anyhow::Result<()> {
    println!("Budget walkthrough");
    println!("==================");

    let forest = strip_hierarchy()?;
    println!(
        "Built a forest with {} nodes and {} triangles",
        forest.node_count(),
        forest.tri_count()
    );

    let simplifier = Simplifier::new(Box::new(BoundBoxDiagonal));
    let mut cut = Cut::new(forest);
    simplifier.update_node_errors(&mut cut);

    for limit in [6usize, 3, 1, 0, 6] {
        let outcome = simplifier.simplify_budget(&mut cut, limit, true)?;
        println!(
            "\nbudget {:>2}: {} live triangles, {} active vertices ({} ops, converged: {})",
            limit,
            cut.live_tri_count(),
            cut.active_vertex_count(),
            outcome.ops,
            outcome.converged
        );
        let verts = cut.renderer().vertex_array().len();
        let indices = cut.renderer().patch_index_array(0).len();
        println!("  packed arrays: {} vertex slots, {} index triples", verts, indices);
        cut.validate(&DebugContext::default())?;
    }

    println!("\nAll states validated cleanly.");
    Ok(())
}

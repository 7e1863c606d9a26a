//! View-dependent refinement demo
//!
//! Moves an eye point past a terrain-like grid and re-runs the threshold
//! policy each step, so resolution concentrates near the viewer.

use std::sync::Arc;

use multires_core::{Forest, ForestBuilder, Point3f};
use multires_cut::{Cut, ScreenSpaceError, Simplifier};

/// 4x2-cell ground grid: two merge levels so the front can vary by region.
fn ground_grid() -> anyhow::Result<Arc<Forest>> {
    let mut b = ForestBuilder::new();
    // 5x3 leaf vertices
    for y in 0..3 {
        for x in 0..5 {
            b.add_position(Point3f::new(x as f32, y as f32, 0.0));
        }
    }
    let left = b.add_position(Point3f::new(1.0, 1.0, 0.0));
    let right = b.add_position(Point3f::new(3.0, 1.0, 0.0));
    let top = b.add_position(Point3f::new(2.0, 1.0, 0.0));

    let leaves: Vec<usize> = (0..15).map(|i| b.add_vertex(i, 0, None)).collect();
    let v_left = b.add_vertex(left, 0, None);
    let v_right = b.add_vertex(right, 0, None);
    let v_top = b.add_vertex(top, 0, None);

    for y in 0..2usize {
        for x in 0..4usize {
            let tl = y * 5 + x;
            let bl = (y + 1) * 5 + x;
            b.add_tri([leaves[tl], leaves[bl], leaves[tl + 1]], 0);
            b.add_tri([leaves[tl + 1], leaves[bl], leaves[bl + 1]], 0);
        }
    }

    // Left block owns columns 0..=2, right block columns 3..=4
    let mut left_leaves = Vec::new();
    let mut right_leaves = Vec::new();
    for y in 0..3usize {
        for x in 0..5usize {
            if x <= 2 {
                left_leaves.push(leaves[y * 5 + x]);
            } else {
                right_leaves.push(leaves[y * 5 + x]);
            }
        }
    }
    b.add_merge(v_left, &left_leaves, None);
    b.add_merge(v_right, &right_leaves, None);
    b.add_merge(v_top, &[v_left, v_right], None);

    Ok(Arc::new(b.build()?))
}

fn main() -> anyhow::Result<()> {
    println!("View-dependent refinement");
    println!("=========================");

    let forest = ground_grid()?;
    let mut cut = Cut::new(forest);

    for step in 0..5 {
        let eye = Point3f::new(step as f32, 1.0, 1.5);
        let simplifier = Simplifier::new(Box::new(ScreenSpaceError::new(eye)));
        simplifier.update_node_errors(&mut cut);
        simplifier.simplify_threshold(&mut cut, 0.6)?;
        println!(
            "eye at x={:.1}: {} live triangles, {} active vertices",
            eye.x,
            cut.live_tri_count(),
            cut.active_vertex_count()
        );
    }
    Ok(())
}

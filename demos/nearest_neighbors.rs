//! Nearest-neighbour queries on the KD-tree
//!
//! Compares the tree against the brute-force reference on random points.

use rand::{Rng, SeedableRng};
use surfrecon_algorithms::{BruteForceSearch, KdTree};
use surfrecon_core::{NearestNeighborSearch, Point3d};

fn main() -> anyhow::Result<()> {
    println!("=== KD-Tree Queries ===\n");

    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let points: Vec<Point3d> = (0..10_000)
        .map(|_| {
            Point3d::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            )
        })
        .collect();

    let tree = KdTree::from_points(&points);
    let brute = BruteForceSearch::new(&points);
    println!("Built tree over {} points, depth {}", tree.len(), tree.depth());

    let query = Point3d::new(0.1, -0.2, 0.3);

    let nearest = tree.nearest(&query)?;
    println!("Nearest to {:?}: {:?}", query, nearest.position);
    println!("  brute force agrees: {}", brute.find_nearest(&query)?.0 == tree.find_nearest(&query)?.0);

    let neighbours = tree.find_k_nearest(&query, 5);
    println!("\n5 nearest:");
    for (index, distance) in &neighbours {
        println!("  #{:<5} at {:.4}", index, distance);
    }

    let radius = 0.1;
    let in_ball = tree.inside_ball(&query, radius);
    println!(
        "\n{} points within {} (brute force: {})",
        in_ball.len(),
        radius,
        brute.find_radius_neighbors(&query, radius).len()
    );

    Ok(())
}

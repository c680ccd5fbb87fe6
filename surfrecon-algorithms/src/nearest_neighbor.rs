//! Nearest neighbor search implementations
//!
//! [`KdTree`] is a balanced, immutable KD-tree whose split axis at every node
//! is the axis of maximum variance of the points below it. Nodes live in an
//! arena and refer to their children by index. Queries walk the tree with a
//! private stack, so a built tree can be shared between threads.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use surfrecon_core::{
    Axis, AxisAccess, Error, NearestNeighborSearch, Point3d, Result, SampleRecord,
};

/// A node in the KD-tree
#[derive(Debug, Clone)]
struct Node {
    record: SampleRecord,
    /// Insertion order of the record
    ordinal: usize,
    /// `None` for leaves
    axis: Option<Axis>,
    left: Option<usize>,
    right: Option<usize>,
}

/// KD-Tree implementation for nearest neighbor search
#[derive(Debug, Clone, Default)]
pub struct KdTree {
    nodes: Vec<Node>,
    root: Option<usize>,
}

/// Candidate in a k-nearest query, ordered by distance for a max-heap
#[derive(Debug, PartialEq)]
struct Neighbour {
    distance: f64,
    node: usize,
}

impl Eq for Neighbour {}

impl PartialOrd for Neighbour {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbour {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.node.cmp(&other.node))
    }
}

impl KdTree {
    /// Build a tree over `records`. Every record ends up in exactly one node.
    pub fn new(records: Vec<SampleRecord>) -> Self {
        let mut items: Vec<(usize, SampleRecord)> = records.into_iter().enumerate().collect();
        let mut tree = Self {
            nodes: Vec::with_capacity(items.len()),
            root: None,
        };
        let len = items.len();
        tree.root = tree.build(&mut items, 0, len);
        tree
    }

    /// Build a tree over plain points; each record's owner index is its position in `points`
    pub fn from_points(points: &[Point3d]) -> Self {
        Self::new(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| SampleRecord::new(*p).with_index(i))
                .collect(),
        )
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut stack: Vec<(usize, usize)> = self.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((index, level)) = stack.pop() {
            depth = depth.max(level);
            let node = &self.nodes[index];
            stack.extend(node.left.map(|c| (c, level + 1)));
            stack.extend(node.right.map(|c| (c, level + 1)));
        }
        depth
    }

    /// Recursively build the subtree over `items[lo..hi]`, returning its arena index
    fn build(&mut self, items: &mut [(usize, SampleRecord)], lo: usize, hi: usize) -> Option<usize> {
        if lo >= hi {
            return None;
        }

        if hi - lo == 1 {
            let (ordinal, record) = items[lo];
            return Some(self.push_node(record, ordinal, None, None, None));
        }

        let axis = max_variance_axis(&items[lo..hi]);

        // `sort_by` is stable, so ties keep their input order
        items[lo..hi].sort_by(|a, b| {
            a.1.position
                .coord(axis)
                .total_cmp(&b.1.position.coord(axis))
        });

        let mid = (lo + hi) / 2;
        let left = self.build(items, lo, mid);
        let right = self.build(items, mid + 1, hi);
        let (ordinal, record) = items[mid];
        Some(self.push_node(record, ordinal, Some(axis), left, right))
    }

    fn push_node(
        &mut self,
        record: SampleRecord,
        ordinal: usize,
        axis: Option<Axis>,
        left: Option<usize>,
        right: Option<usize>,
    ) -> usize {
        self.nodes.push(Node {
            record,
            ordinal,
            axis,
            left,
            right,
        });
        self.nodes.len() - 1
    }

    /// Arena index of the node closest to `query`
    fn nearest_node(&self, query: &Point3d) -> Result<(usize, f64)> {
        let root = self
            .root
            .ok_or_else(|| Error::InvalidState("nearest query on an empty KD-tree".to_string()))?;

        let mut best = (root, f64::INFINITY);
        // Each entry carries a lower bound on the distance to anything in its subtree
        let mut stack = vec![(root, 0.0_f64)];

        while let Some((index, bound)) = stack.pop() {
            if bound >= best.1 {
                continue;
            }

            let node = &self.nodes[index];
            let dist = node.record.distance(query);
            if dist < best.1 {
                best = (index, dist);
            }

            if let Some(axis) = node.axis {
                let diff = query.coord(axis) - node.record.position.coord(axis);
                let (near, far) = if diff < 0.0 {
                    (node.left, node.right)
                } else {
                    (node.right, node.left)
                };

                // Far side first so the near side is popped next
                if let Some(far) = far {
                    stack.push((far, diff.abs()));
                }
                if let Some(near) = near {
                    stack.push((near, 0.0));
                }
            }
        }

        Ok(best)
    }

    /// The stored record closest to `query`
    pub fn nearest(&self, query: &Point3d) -> Result<SampleRecord> {
        let (index, _) = self.nearest_node(query)?;
        Ok(self.nodes[index].record)
    }

    /// Arena indices and distances of all nodes within `radius` of `query`
    fn ball_nodes(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        let mut found = Vec::new();
        let mut stack: Vec<usize> = self.root.into_iter().collect();

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            let dist = node.record.distance(query);
            if dist <= radius {
                found.push((index, dist));
            }

            if let Some(axis) = node.axis {
                let diff = query.coord(axis) - node.record.position.coord(axis);
                let (near, far) = if diff < 0.0 {
                    (node.left, node.right)
                } else {
                    (node.right, node.left)
                };

                stack.extend(near);
                if diff.abs() <= radius {
                    stack.extend(far);
                }
            }
        }

        found
    }

    /// All stored records within `radius` (inclusive) of `query`, in no particular order
    pub fn inside_ball(&self, query: &Point3d, radius: f64) -> Vec<SampleRecord> {
        self.ball_nodes(query, radius)
            .into_iter()
            .map(|(index, _)| self.nodes[index].record)
            .collect()
    }

    /// Arena indices and distances of the `k` nearest nodes, closest first
    fn k_nearest_nodes(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        if k == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<Neighbour> = BinaryHeap::with_capacity(k + 1);
        let mut stack: Vec<(usize, f64)> = self.root.map(|r| (r, 0.0)).into_iter().collect();

        while let Some((index, bound)) = stack.pop() {
            let worst = if heap.len() == k {
                heap.peek().map_or(f64::INFINITY, |n| n.distance)
            } else {
                f64::INFINITY
            };
            if bound >= worst {
                continue;
            }

            let node = &self.nodes[index];
            let dist = node.record.distance(query);
            if heap.len() < k {
                heap.push(Neighbour { distance: dist, node: index });
            } else if dist < worst {
                heap.pop();
                heap.push(Neighbour { distance: dist, node: index });
            }

            if let Some(axis) = node.axis {
                let diff = query.coord(axis) - node.record.position.coord(axis);
                let (near, far) = if diff < 0.0 {
                    (node.left, node.right)
                } else {
                    (node.right, node.left)
                };

                if let Some(far) = far {
                    stack.push((far, diff.abs()));
                }
                if let Some(near) = near {
                    stack.push((near, 0.0));
                }
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|n| (n.node, n.distance))
            .collect()
    }

    /// The `k` stored records closest to `query` with their distances, closest first
    pub fn k_nearest(&self, query: &Point3d, k: usize) -> Vec<(SampleRecord, f64)> {
        self.k_nearest_nodes(query, k)
            .into_iter()
            .map(|(index, dist)| (self.nodes[index].record, dist))
            .collect()
    }
}

/// Axis with the largest population variance; ties go to the lower axis
fn max_variance_axis(items: &[(usize, SampleRecord)]) -> Axis {
    let count = items.len() as f64;
    let mean = items
        .iter()
        .fold(nalgebra::Vector3::<f64>::zeros(), |acc, (_, r)| acc + r.position.coords)
        / count;

    let variance = items.iter().fold(nalgebra::Vector3::<f64>::zeros(), |acc, (_, r)| {
        let d = r.position.coords - mean;
        acc + d.component_mul(&d)
    }) / count;

    let mut axis = Axis::X;
    for candidate in [Axis::Y, Axis::Z] {
        if variance[candidate.index()] > variance[axis.index()] {
            axis = candidate;
        }
    }
    axis
}

impl NearestNeighborSearch for KdTree {
    fn find_nearest(&self, query: &Point3d) -> Result<(usize, f64)> {
        let (index, dist) = self.nearest_node(query)?;
        Ok((self.nodes[index].ordinal, dist))
    }

    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        self.k_nearest_nodes(query, k)
            .into_iter()
            .map(|(index, dist)| (self.nodes[index].ordinal, dist))
            .collect()
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        self.ball_nodes(query, radius)
            .into_iter()
            .map(|(index, dist)| (self.nodes[index].ordinal, dist))
            .collect()
    }
}

/// Simple brute force nearest neighbor search for small datasets
pub struct BruteForceSearch {
    points: Vec<Point3d>,
}

impl BruteForceSearch {
    pub fn new(points: &[Point3d]) -> Self {
        Self {
            points: points.to_vec(),
        }
    }

    fn distances(&self, query: &Point3d) -> impl Iterator<Item = (usize, f64)> + '_ {
        let query = *query;
        self.points
            .iter()
            .enumerate()
            .map(move |(idx, point)| (idx, (point - query).norm()))
    }
}

impl NearestNeighborSearch for BruteForceSearch {
    fn find_nearest(&self, query: &Point3d) -> Result<(usize, f64)> {
        self.distances(query)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| Error::InvalidState("nearest query on an empty point set".to_string()))
    }

    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        let mut distances: Vec<(usize, f64)> = self.distances(query).collect();

        // Sort by distance and take k nearest
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(k);
        distances
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        self.distances(query)
            .filter(|(_, distance)| *distance <= radius)
            .collect()
    }
}

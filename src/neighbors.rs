//! A static KD-tree for Euclidean k-nearest-neighbour queries over particle positions.

use ndarray::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy)]
struct Node {
    point: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// KD-tree over the rows of an N × D matrix.
///
/// The tree is built once and is read-only afterwards, so a single tree can be
/// shared between all particle slots of an iteration.
#[derive(Debug, Clone)]
pub struct KdTree {
    points: Array2<f64>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist2: f64,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Ties on distance are broken by index so queries are deterministic.
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2
            .total_cmp(&other.dist2)
            .then(self.index.cmp(&other.index))
    }
}

impl KdTree {
    pub fn new(points: ArrayView2<f64>) -> Self {
        let mut tree = Self {
            points: points.to_owned(),
            nodes: Vec::with_capacity(points.nrows()),
            root: None,
        };
        let mut indices: Vec<usize> = (0..points.nrows()).collect();
        tree.root = tree.build(&mut indices, 0);
        tree
    }

    /// The indexed points, one per row.
    pub fn points(&self) -> ArrayView2<'_, f64> {
        self.points.view()
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    fn build(&mut self, indices: &mut [usize], depth: usize) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }
        let dim = self.points.ncols().max(1);
        let axis = depth % dim;
        let mid = indices.len() / 2;
        if self.points.ncols() > 0 {
            let points = &self.points;
            indices.select_nth_unstable_by(mid, |&a, &b| {
                points[[a, axis]]
                    .total_cmp(&points[[b, axis]])
                    .then(a.cmp(&b))
            });
        }
        let point = indices[mid];
        let (lower, upper) = indices.split_at_mut(mid);
        let left = self.build(lower, depth + 1);
        let right = self.build(&mut upper[1..], depth + 1);
        self.nodes.push(Node {
            point,
            axis,
            left,
            right,
        });
        Some(self.nodes.len() - 1)
    }

    /// Returns the indices of the `k` rows closest to `query`, nearest first.
    ///
    /// A query point that is itself stored in the tree is its own nearest
    /// neighbour. Fewer than `k` indices come back when the tree is smaller.
    pub fn nearest(&self, query: ArrayView1<f64>, k: usize) -> Vec<usize> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = self.root {
            self.search(root, query, k, &mut heap);
        }
        heap.into_sorted_vec().into_iter().map(|c| c.index).collect()
    }

    fn search(&self, node: usize, query: ArrayView1<f64>, k: usize, heap: &mut BinaryHeap<Candidate>) {
        let Node {
            point,
            axis,
            left,
            right,
        } = self.nodes[node];
        let row = self.points.row(point);
        let dist2 = row
            .iter()
            .zip(query.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>();
        let candidate = Candidate {
            dist2,
            index: point,
        };
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }

        if self.points.ncols() == 0 {
            for child in [left, right].into_iter().flatten() {
                self.search(child, query, k, heap);
            }
            return;
        }
        let diff = query[axis] - row[axis];
        let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
        if let Some(near) = near {
            self.search(near, query, k, heap);
        }
        if let Some(far) = far {
            let must_visit = heap.len() < k || heap.peek().is_some_and(|worst| diff * diff <= worst.dist2);
            if must_visit {
                self.search(far, query, k, heap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(points: &Array2<f64>, query: ArrayView1<f64>, k: usize) -> Vec<usize> {
        let mut all: Vec<Candidate> = points
            .rows()
            .into_iter()
            .enumerate()
            .map(|(index, row)| Candidate {
                dist2: (&row - &query).mapv(|x| x * x).sum(),
                index,
            })
            .collect();
        all.sort();
        all.into_iter().take(k).map(|c| c.index).collect()
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = SmallRng::seed_from_u64(42);
        let points = Array2::from_shape_fn((200, 3), |_| rng.gen::<f64>());
        let tree = KdTree::new(points.view());
        assert_eq!(tree.len(), 200);
        for _ in 0..20 {
            let query = Array1::from_shape_fn(3, |_| rng.gen::<f64>());
            for k in [1, 5, 17] {
                assert_eq!(tree.nearest(query.view(), k), brute_force(&points, query.view(), k));
            }
        }
    }

    #[test]
    fn stored_point_is_its_own_nearest_neighbour() {
        let points = arr2(&[[0.0], [1.0], [2.0], [10.0]]);
        let tree = KdTree::new(points.view());
        assert_eq!(tree.points(), points);
        assert_eq!(tree.nearest(points.row(1), 3), vec![1, 0, 2]);
    }

    #[test]
    fn k_larger_than_tree_returns_everything() {
        let points = arr2(&[[0.0, 0.0], [1.0, 1.0]]);
        let tree = KdTree::new(points.view());
        assert_eq!(tree.nearest(arr1(&[0.9, 0.9]).view(), 5), vec![1, 0]);
        assert!(tree.nearest(arr1(&[0.0, 0.0]).view(), 0).is_empty());
    }
}

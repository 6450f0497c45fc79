//! k-nearest-neighbour queries over a fixed set of positions.

use glam::Vec3;
use rstar::RTree;
use rstar::primitives::GeomWithData;

type IndexedPoint = GeomWithData<[f32; 3], usize>;

/// R-tree over point positions, each tagged with its index in the buffer.
pub(crate) struct PointIndex {
    tree: RTree<IndexedPoint>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

impl PointIndex {
    pub(crate) fn new(positions: &[Vec3]) -> Self {
        let points = positions
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint::new(p.to_array(), i))
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// The `k` nearest points to `query`, closest first, equal distances in
    /// index order. `skip` excludes one index, typically the query point
    /// itself.
    pub(crate) fn nearest(&self, query: Vec3, k: usize, skip: Option<usize>) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let mut found: Vec<(f32, usize)> = Vec::with_capacity(k + 1);
        for (point, dist2) in self
            .tree
            .nearest_neighbor_iter_with_distance_2(&query.to_array())
        {
            if skip == Some(point.data) {
                continue;
            }
            // The iterator is ordered by distance. Past k, only ties with the
            // k-th neighbour can still change the result.
            if found.len() >= k && found.last().is_some_and(|&(last, _)| dist2 > last) {
                break;
            }
            found.push((dist2, point.data));
        }
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.truncate(k);
        found
            .into_iter()
            .map(|(dist2, index)| Neighbor {
                index,
                distance: dist2.sqrt(),
            })
            .collect()
    }
}

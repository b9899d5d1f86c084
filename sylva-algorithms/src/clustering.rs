use anyhow::{bail, Result};
use rayon::prelude::*;
use rstar::{primitives::GeomWithData, RTree};
use sylva_core::nalgebra::Point3;

/// Partitions a point set into clusters. The label of each point is either `Some(cluster)` or `None`
/// if the point is noise
pub trait Clusterer {
    fn cluster(&self, positions: &[Point3<f64>]) -> Result<Vec<Option<usize>>>;
}

/// Density-based clustering (DBSCAN).
///
/// A point is a core point if at least `min_samples` points, the point itself included, lie within
/// a distance of `eps`. Clusters are grown from core points in input order, so labels are numbered in the
/// order in which their first core point appears. Neighbourhoods are looked up in an R-tree in parallel,
/// the expansion itself is sequential, which makes the result deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    pub eps: f64,
    pub min_samples: usize,
}

type IndexedPoint = GeomWithData<[f64; 3], usize>;

/// indices of all points within `eps` of `p`, including the point itself, in ascending order
fn region_query(tree: &RTree<IndexedPoint>, p: &Point3<f64>, eps: f64) -> Vec<usize> {
    let mut neighbours: Vec<usize> = tree
        .locate_within_distance([p.x, p.y, p.z], eps * eps)
        .map(|neighbour| neighbour.data)
        .collect();
    neighbours.sort_unstable();
    neighbours
}

impl Clusterer for Dbscan {
    fn cluster(&self, positions: &[Point3<f64>]) -> Result<Vec<Option<usize>>> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            bail!("DBSCAN eps must be a positive number, got {}", self.eps);
        }
        if self.min_samples == 0 {
            bail!("DBSCAN min_samples must be at least 1");
        }

        let tree = RTree::bulk_load(
            positions
                .iter()
                .enumerate()
                .map(|(index, p)| IndexedPoint::new([p.x, p.y, p.z], index))
                .collect(),
        );
        let neighbourhoods: Vec<Vec<usize>> = positions
            .par_iter()
            .map(|p| region_query(&tree, p, self.eps))
            .collect();
        let is_core: Vec<bool> = neighbourhoods
            .iter()
            .map(|neighbours| neighbours.len() >= self.min_samples)
            .collect();

        let mut labels: Vec<Option<usize>> = vec![None; positions.len()];
        let mut next_label = 0;
        let mut stack = vec![];
        for seed in 0..positions.len() {
            if labels[seed].is_some() || !is_core[seed] {
                continue;
            }
            labels[seed] = Some(next_label);
            stack.push(seed);
            // grow the cluster, only core points propagate it further
            while let Some(current) = stack.pop() {
                for neighbour in &neighbourhoods[current] {
                    if labels[*neighbour].is_none() {
                        labels[*neighbour] = Some(next_label);
                        if is_core[*neighbour] {
                            stack.push(*neighbour);
                        }
                    }
                }
            }
            next_label += 1;
        }

        Ok(labels)
    }
}

/// Counts the members of each cluster. Entry `i` is the size of cluster `i`, noise is not counted
pub fn cluster_sizes(labels: &[Option<usize>]) -> Vec<usize> {
    let num_clusters = labels.iter().flatten().max().map_or(0, |max| max + 1);
    let mut sizes = vec![0; num_clusters];
    for label in labels.iter().flatten() {
        sizes[*label] += 1;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbscan_clustering() {
        let mut points = vec![];
        // cluster 0: 5 points around (0,0,0)
        for i in 0..5 {
            points.push(Point3::new(f64::from(i) * 0.1, 0.0, 0.0));
        }
        // cluster 1: 5 points around (10,10,10)
        for i in 0..5 {
            points.push(Point3::new(10.0, 10.0, 10.0 + f64::from(i) * 0.1));
        }
        // noise
        points.push(Point3::new(5.0, 5.0, 5.0));

        let labels = Dbscan {
            eps: 1.0,
            min_samples: 3,
        }
        .cluster(&points)
        .unwrap();

        assert!(labels[0..5].iter().all(|l| *l == Some(0)));
        assert!(labels[5..10].iter().all(|l| *l == Some(1)));
        assert_eq!(labels[10], None);
        assert_eq!(cluster_sizes(&labels), vec![5, 5]);
    }

    #[test]
    fn test_border_points_join_the_cluster() {
        // a chain of points 0.5 apart, both ends only reach a single neighbour
        let points: Vec<_> = (0..6)
            .map(|i| Point3::new(f64::from(i) * 0.5, 0.0, 0.0))
            .chain(std::iter::once(Point3::new(2.9, 0.0, 0.0)))
            .collect();
        let labels = Dbscan {
            eps: 0.6,
            min_samples: 3,
        }
        .cluster(&points)
        .unwrap();
        // the end points are not core points but are reachable from one
        assert!(labels.iter().all(|l| *l == Some(0)));
    }

    #[test]
    fn test_region_query() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(0.0, 0.9, 0.0),
            Point3::new(0.0, 0.0, -1.0),
            Point3::new(0.7, 0.7, 0.7),
        ];
        let tree = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(index, p)| IndexedPoint::new([p.x, p.y, p.z], index))
                .collect(),
        );
        // (0.7, 0.7, 0.7) is about 1.21 away from the origin
        assert_eq!(region_query(&tree, &points[0], 1.0), vec![0, 2, 3]);
        assert_eq!(region_query(&tree, &points[1], 1.0), vec![1]);
        assert_eq!(
            region_query(&tree, &Point3::new(0.0, 0.5, 0.0), 0.5),
            vec![0, 2]
        );
    }

    #[test]
    fn test_eps_is_inclusive() {
        let points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.5, 0.0, 0.0)];
        let labels = Dbscan {
            eps: 0.5,
            min_samples: 2,
        }
        .cluster(&points)
        .unwrap();
        assert_eq!(labels, vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_isolated_points_are_noise() {
        let points: Vec<_> = (0..4)
            .map(|i| Point3::new(f64::from(i) * 10.0, 0.0, 0.0))
            .collect();
        let labels = Dbscan {
            eps: 1.0,
            min_samples: 2,
        }
        .cluster(&points)
        .unwrap();
        assert!(labels.iter().all(Option::is_none));
        assert!(cluster_sizes(&labels).is_empty());
    }

    #[test]
    fn test_membership_does_not_depend_on_parallelism() {
        let points: Vec<_> = (0..200)
            .map(|i| {
                let t = f64::from(i);
                Point3::new((t * 0.37).sin() * 3.0, (t * 0.11).cos() * 3.0, t * 0.05)
            })
            .collect();
        let dbscan = Dbscan {
            eps: 0.6,
            min_samples: 2,
        };
        let first = dbscan.cluster(&points).unwrap();
        let second = dbscan.cluster(&points).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_parameters() {
        let points = vec![Point3::new(0.0, 0.0, 0.0)];
        assert!(Dbscan {
            eps: 0.0,
            min_samples: 2
        }
        .cluster(&points)
        .is_err());
        assert!(Dbscan {
            eps: 1.0,
            min_samples: 0
        }
        .cluster(&points)
        .is_err());
    }
}

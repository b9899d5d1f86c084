//! Assignment of every point of a (voxelized) cloud to its nearest tree axis.
//!
//! Two strategies are available. [`assign_exact`] projects the whole cloud into the PCA frame of every stem
//! and keeps, per point, the closest axis. [`assign_approximate`] samples points along every axis, pools the
//! samples of all axes into one kd-tree and looks up the nearest sample of each point. The approximate strategy
//! is much faster on large plots but measures the distance to the nearest *sample* instead of the axis itself.

use std::time::Instant;

use anyhow::{bail, Result};
use kd_tree::{KdPoint, KdTree};
use log::{debug, info, warn};
use rayon::prelude::*;
use sylva_core::{
    math::AABB,
    nalgebra::{Point3, Vector3},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::axes::{FittedStem, TreeAxis, TreeId};

/// Selects how points are assigned to tree axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssignmentStrategy {
    /// Perpendicular distance to every axis, see [`assign_exact`]
    Exact,
    /// Distance to the nearest sample along the axes, see [`assign_approximate`]
    Approximate,
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        AssignmentStrategy::Approximate
    }
}

/// Per-point distance to the nearest tree axis and the id of that tree.
///
/// `tree_id[i]` is `None` exactly if `distance_to_axis[i]` is `None` or not smaller than the maximum
/// assignment distance that was used to compute the assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub distance_to_axis: Vec<Option<f64>>,
    pub tree_id: Vec<Option<TreeId>>,
}

impl Assignment {
    /// An assignment of `len` points that are not assigned to any tree
    pub fn unassigned(len: usize) -> Self {
        Self {
            distance_to_axis: vec![None; len],
            tree_id: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.tree_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree_id.is_empty()
    }

    /// Number of points that belong to some tree
    pub fn num_assigned(&self) -> usize {
        self.tree_id.iter().filter(|id| id.is_some()).count()
    }
}

impl AssignmentStrategy {
    /// Assigns `positions` to the axes of `stems` with this strategy. `sample_step` is only used by the
    /// approximate strategy
    pub fn assign(
        &self,
        positions: &[Point3<f64>],
        stems: &[FittedStem],
        d_max: f64,
        sample_step: f64,
    ) -> Result<Assignment> {
        match self {
            AssignmentStrategy::Exact => Ok(assign_exact(positions, stems, d_max)),
            AssignmentStrategy::Approximate => {
                assign_approximate(positions, stems, d_max, sample_step)
            }
        }
    }
}

/// Assigns every point to the closest axis whose perpendicular distance is below `d_max`.
///
/// For each stem, all points are expressed in the PCA frame of that stem and the distance to the axis is the norm
/// of the second and third coordinate. A later stem takes over a point only if it is strictly closer, so the result
/// is the closest axis no matter in which order the stems are processed (ties go to the first stem).
pub fn assign_exact(positions: &[Point3<f64>], stems: &[FittedStem], d_max: f64) -> Assignment {
    let t_start = Instant::now();
    let mut assignment = Assignment::unassigned(positions.len());

    for stem in stems {
        for (index, position) in positions.iter().enumerate() {
            let distance = stem.pca.distance_to_principal_axis(position);
            let closer = match assignment.distance_to_axis[index] {
                Some(current) => distance < current,
                None => true,
            };
            if distance < d_max && closer {
                assignment.distance_to_axis[index] = Some(distance);
                assignment.tree_id[index] = Some(stem.axis.id);
            }
        }
    }

    info!(
        "Exact axis distances for {} points and {} axes took {:.3}s",
        positions.len(),
        stems.len(),
        t_start.elapsed().as_secs_f64()
    );
    assignment
}

const PARALLEL_EPS: f64 = 1.0e-6;

/// Intersects the line through `axis_pos` along `axis_dir` with the plane through `plane_pos` with normal
/// `plane_normal`. Returns `None` if the line is parallel to the plane
/// ```
/// # use sylva_algorithms::assignment::vector_plane_intersection;
/// # use sylva_core::nalgebra::{Point3, Vector3};
/// let hit = vector_plane_intersection(
///     &Point3::new(1.0, 1.0, 0.0),
///     &Vector3::new(0.0, 0.0, 1.0),
///     &Point3::new(0.0, 0.0, 5.0),
///     &Vector3::new(0.0, 0.0, -1.0),
/// );
/// assert_eq!(hit, Some(Point3::new(1.0, 1.0, 5.0)));
/// ```
pub fn vector_plane_intersection(
    axis_pos: &Point3<f64>,
    axis_dir: &Vector3<f64>,
    plane_pos: &Point3<f64>,
    plane_normal: &Vector3<f64>,
) -> Option<Point3<f64>> {
    let denom = axis_dir.dot(plane_normal);
    if denom.abs() < PARALLEL_EPS {
        return None;
    }
    let t = plane_normal.dot(&(plane_pos - axis_pos)) / denom;
    Some(axis_pos + axis_dir * t)
}

/// Intersections of an axis with the bottom and the top plane of `bounds`, in that order
pub fn axis_bounds_intersection(
    axis: &TreeAxis,
    bounds: &AABB<f64>,
) -> Result<(Point3<f64>, Point3<f64>)> {
    let top = vector_plane_intersection(
        &axis.centroid,
        &axis.direction,
        bounds.max(),
        &Vector3::new(0.0, 0.0, -1.0),
    );
    let bottom = vector_plane_intersection(
        &axis.centroid,
        &axis.direction,
        bounds.min(),
        &Vector3::new(0.0, 0.0, 1.0),
    );
    match (bottom, top) {
        (Some(bottom), Some(top)) => Ok((bottom, top)),
        _ => bail!(
            "Axis of tree {} can't be parallel to the top or the bottom plane of the bounding box",
            axis.id
        ),
    }
}

/// Evenly spaced points along `axis` between its bottom and top intersection with `bounds`, `step` apart and
/// ordered upwards
pub fn sample_axis(axis: &TreeAxis, bounds: &AABB<f64>, step: f64) -> Result<Vec<Point3<f64>>> {
    let (bottom, top) = axis_bounds_intersection(axis, bounds)?;
    let num_samples = ((top - bottom).norm() / step) as usize;
    let upward = axis.upward_direction();
    Ok((0..num_samples)
        .map(|i| bottom + upward * (i as f64 * step))
        .collect())
}

/// Sample point on an axis, tagged with the index of the axis it belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisSample {
    position: [f64; 3],
    axis: usize,
}

impl AxisSample {
    fn probe(position: &Point3<f64>) -> Self {
        Self {
            position: [position.x, position.y, position.z],
            axis: usize::MAX,
        }
    }
}

impl KdPoint for AxisSample {
    type Scalar = f64;
    type Dim = typenum::U3;
    fn at(&self, k: usize) -> f64 {
        self.position[k]
    }
}

/// Assigns every point to the axis of its nearest axis sample.
///
/// Samples are placed `sample_step` apart along every axis, between the bottom and the top plane of the bounding
/// box of `positions`. Points whose nearest sample is at least `d_max` away are not assigned and their distance is
/// clamped to `d_max`.
///
/// Fails if an axis is parallel to the bounding planes. Without any axis sample, all points stay unassigned.
pub fn assign_approximate(
    positions: &[Point3<f64>],
    stems: &[FittedStem],
    d_max: f64,
    sample_step: f64,
) -> Result<Assignment> {
    if !sample_step.is_finite() || sample_step <= 0.0 {
        bail!("sample_step must be a positive number, got {}", sample_step);
    }
    let t_start = Instant::now();
    let bounds = match AABB::from_points(positions) {
        Some(bounds) => bounds,
        None => return Ok(Assignment::unassigned(0)),
    };

    let mut samples = vec![];
    for (axis_index, stem) in stems.iter().enumerate() {
        let axis_samples = sample_axis(&stem.axis, &bounds, sample_step)?;
        debug!(
            "Tree {}: {} samples along the axis",
            stem.axis.id,
            axis_samples.len()
        );
        samples.extend(axis_samples.iter().map(|p| AxisSample {
            position: [p.x, p.y, p.z],
            axis: axis_index,
        }));
    }
    if samples.is_empty() {
        warn!("No axis samples available, no point is assigned to a tree");
        return Ok(Assignment::unassigned(positions.len()));
    }
    info!(
        "Sampled {} points along {} axes (bounding box extent {:?})",
        samples.len(),
        stems.len(),
        bounds.extent()
    );

    let kd_tree = KdTree::build_by_ordered_float(samples);
    let (distance_to_axis, tree_id): (Vec<_>, Vec<_>) = positions
        .par_iter()
        .map(|position| {
            let nearest = kd_tree.nearest(&AxisSample::probe(position));
            match nearest {
                Some(nearest) => {
                    let distance = nearest.squared_distance.sqrt();
                    if distance >= d_max {
                        (Some(d_max), None)
                    } else {
                        (Some(distance), Some(stems[nearest.item.axis].axis.id))
                    }
                }
                None => (None, None),
            }
        })
        .unzip();

    info!(
        "Approximate axis distances for {} points took {:.3}s",
        positions.len(),
        t_start.elapsed().as_secs_f64()
    );
    Ok(Assignment {
        distance_to_axis,
        tree_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::PrincipalAxes;
    use assert_approx_eq::assert_approx_eq;

    fn vertical_stem(id: TreeId, x: f64, y: f64) -> FittedStem {
        let points: Vec<_> = (0..40)
            .map(|i| {
                let z = f64::from(i) * 0.1;
                let offset = if i % 2 == 0 { 0.01 } else { -0.01 };
                Point3::new(x + offset, y - offset, z)
            })
            .collect();
        let pca = PrincipalAxes::fit(&points).unwrap();
        FittedStem {
            axis: TreeAxis {
                id,
                direction: *pca.principal_direction(),
                centroid: pca.mean,
                height_offset: 0.0,
                deviation_deg: 0.0,
            },
            pca,
        }
    }

    fn grid_points() -> Vec<Point3<f64>> {
        let mut points = vec![];
        for i in 0..40 {
            for j in 0..10 {
                for k in 0..8 {
                    points.push(Point3::new(
                        f64::from(i) * 0.25 - 2.0,
                        f64::from(j) * 0.2 - 1.0,
                        f64::from(k) * 0.5,
                    ));
                }
            }
        }
        points
    }

    fn check_invariant(assignment: &Assignment, d_max: f64) {
        for (distance, id) in assignment
            .distance_to_axis
            .iter()
            .zip(assignment.tree_id.iter())
        {
            let unassigned = match distance {
                None => true,
                Some(distance) => *distance >= d_max,
            };
            assert_eq!(id.is_none(), unassigned);
        }
    }

    #[test]
    fn test_exact_assigns_closest_axis() {
        let stems = vec![vertical_stem(1, 0.0, 0.0), vertical_stem(2, 5.0, 0.0)];
        let points = grid_points();
        let assignment = assign_exact(&points, &stems, 2.0);
        check_invariant(&assignment, 2.0);

        for (p, id) in points.iter().zip(assignment.tree_id.iter()) {
            let d1 = p.x.hypot(p.y);
            let d2 = (p.x - 5.0).hypot(p.y);
            if d1 < 1.9 && d1 < d2 - 0.1 {
                assert_eq!(*id, Some(1));
            } else if d2 < 1.9 && d2 < d1 - 0.1 {
                assert_eq!(*id, Some(2));
            } else if d1 > 2.1 && d2 > 2.1 {
                assert_eq!(*id, None);
            }
        }
    }

    #[test]
    fn test_exact_does_not_depend_on_stem_order() {
        let points = grid_points();
        let forward = vec![vertical_stem(1, 0.0, 0.0), vertical_stem(2, 1.5, 0.5)];
        let backward = vec![forward[1], forward[0]];
        let a = assign_exact(&points, &forward, 3.0);
        let b = assign_exact(&points, &backward, 3.0);
        for i in 0..points.len() {
            assert_eq!(a.distance_to_axis[i], b.distance_to_axis[i]);
            if a.distance_to_axis[i].is_some() {
                let p = points[i];
                let d1 = forward[0].pca.distance_to_principal_axis(&p);
                let d2 = forward[1].pca.distance_to_principal_axis(&p);
                if d1 != d2 {
                    assert_eq!(a.tree_id[i], b.tree_id[i]);
                }
            }
        }
    }

    #[test]
    fn test_approximate_clamps_distances() {
        let stems = vec![vertical_stem(1, 0.0, 0.0), vertical_stem(2, 5.0, 0.0)];
        let points = grid_points();
        let d_max = 1.0;
        let assignment = assign_approximate(&points, &stems, d_max, 0.05).unwrap();
        check_invariant(&assignment, d_max);
        for distance in assignment.distance_to_axis.iter() {
            assert!(distance.unwrap() <= d_max);
        }
        // (0, 0, z) lies on the first axis
        let on_axis = points
            .iter()
            .position(|p| p.x.abs() < 1e-12 && p.y.abs() < 1e-12)
            .unwrap();
        assert_eq!(assignment.tree_id[on_axis], Some(1));
        assert!(assignment.distance_to_axis[on_axis].unwrap() < 0.1);
    }

    #[test]
    fn test_strategies_agree_on_a_single_stem() {
        let stems = vec![vertical_stem(9, 0.0, 0.0)];
        let points: Vec<_> = (0..500)
            .map(|i| {
                let angle = f64::from(i) * 0.7;
                let radius = 0.1 + 0.8 * f64::from(i % 10) / 10.0;
                Point3::new(
                    radius * angle.cos(),
                    radius * angle.sin(),
                    f64::from(i) * 0.01,
                )
            })
            .collect();
        let step = 0.01;
        let exact = assign_exact(&points, &stems, 1.5);
        let approximate = assign_approximate(&points, &stems, 1.5, step).unwrap();

        assert!(exact.tree_id.iter().all(|id| *id == Some(9)));
        assert!(approximate.tree_id.iter().all(|id| *id == Some(9)));
        for (e, a) in exact
            .distance_to_axis
            .iter()
            .zip(approximate.distance_to_axis.iter())
        {
            assert_approx_eq!(e.unwrap(), a.unwrap(), step);
        }
    }

    #[test]
    fn test_approximate_without_stems() {
        let points = grid_points();
        let assignment = assign_approximate(&points, &[], 1.0, 0.1).unwrap();
        assert_eq!(assignment.len(), points.len());
        assert_eq!(assignment.num_assigned(), 0);
    }

    #[test]
    fn test_horizontal_axis_fails() {
        let points = grid_points();
        let mut stem = vertical_stem(1, 0.0, 0.0);
        stem.axis.direction = Vector3::new(1.0, 0.0, 0.0);
        let err = assign_approximate(&points, &[stem], 1.0, 0.1).unwrap_err();
        assert!(err.to_string().contains("parallel"));
    }

    #[test]
    fn test_sample_axis_goes_upwards() {
        let bounds = AABB::from_min_max_unchecked(Point3::new(-1.0, -1.0, 0.0), Point3::new(1.0, 1.0, 2.0));
        let axis = TreeAxis {
            id: 1,
            direction: Vector3::new(0.0, 0.0, -1.0),
            centroid: Point3::new(0.5, 0.5, 1.0),
            height_offset: 0.0,
            deviation_deg: 0.0,
        };
        let samples = sample_axis(&axis, &bounds, 0.5).unwrap();
        assert_eq!(samples.len(), 4);
        assert_approx_eq!(samples[0].z, 0.0);
        assert_approx_eq!(samples[3].z, 1.5);
        assert_approx_eq!(samples[3].x, 0.5);
        for pair in samples.windows(2) {
            assert_approx_eq!(pair[1].z - pair[0].z, 0.5);
        }
        assert!(samples.iter().all(|sample| sample.x == 0.5 && sample.y == 0.5));
    }

    #[test]
    fn test_strategy_dispatch() {
        let stems = vec![vertical_stem(1, 0.0, 0.0)];
        let points = grid_points();
        let exact = AssignmentStrategy::Exact
            .assign(&points, &stems, 1.0, 0.1)
            .unwrap();
        assert_eq!(exact, assign_exact(&points, &stems, 1.0));
        let approximate = AssignmentStrategy::Approximate
            .assign(&points, &stems, 1.0, 0.1)
            .unwrap();
        assert_eq!(approximate, assign_approximate(&points, &stems, 1.0, 0.1).unwrap());
    }
}

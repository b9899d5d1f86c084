use std::collections::HashMap;

use anyhow::{bail, Result};
use sylva_core::{math::AABB, nalgebra::Point3};

/// Result of quantizing a point set into voxels
#[derive(Debug, Clone, PartialEq)]
pub struct Voxelization {
    /// One coarse point per voxel, located at the voxel centre
    pub positions: Vec<Point3<f64>>,
    /// For every input point, the index of the voxel that contains it
    pub point_to_voxel: Vec<usize>,
    /// For every voxel, the index of the first input point that fell into it
    pub voxel_to_point: Vec<usize>,
    /// Number of input points per voxel, only present if requested
    pub points_per_voxel: Option<Vec<usize>>,
}

impl Voxelization {
    /// Number of voxels
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Copies one value per voxel back onto every input point
    /// ```
    /// # use sylva_algorithms::voxel_grid::{VoxelGrid, Voxelizer};
    /// # use sylva_core::nalgebra::Point3;
    /// let points = vec![
    ///     Point3::new(0.1, 0.1, 0.1),
    ///     Point3::new(5.0, 5.0, 5.0),
    ///     Point3::new(0.2, 0.2, 0.2),
    /// ];
    /// let voxels = VoxelGrid::default().voxelize(&points, 1.0, 1.0).unwrap();
    /// let per_point = voxels.broadcast(&["first", "second"]).unwrap();
    /// assert_eq!(per_point, vec!["first", "second", "first"]);
    /// assert!(voxels.broadcast(&["first"]).is_err());
    /// ```
    ///
    /// Fails if `per_voxel` does not hold one value per voxel or a point refers to a voxel that does not exist
    pub fn broadcast<T: Clone>(&self, per_voxel: &[T]) -> Result<Vec<T>> {
        if per_voxel.len() != self.len() {
            bail!(
                "Got {} values to broadcast onto {} voxels",
                per_voxel.len(),
                self.len()
            );
        }
        self.point_to_voxel
            .iter()
            .enumerate()
            .map(|(point, voxel)| match per_voxel.get(*voxel) {
                Some(value) => Ok(value.clone()),
                None => bail!("Point {} refers to voxel {} of {}", point, voxel, self.len()),
            })
            .collect()
    }
}

/// Quantizes a point set into a regular grid
pub trait Voxelizer {
    /// Voxelizes `positions` with cells of `resolution_xy` in X and Y and `resolution_z` in Z
    fn voxelize(
        &self,
        positions: &[Point3<f64>],
        resolution_xy: f64,
        resolution_z: f64,
    ) -> Result<Voxelization>;
}

/// Regular voxel grid anchored at the minimum corner of the bounding box of the input points.
///
/// Voxels are numbered in the order in which their first point appears in the input, so the output is
/// fully determined by the input order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    /// Voxel centres are rounded to this many decimal digits
    pub n_digits: u32,
    /// Whether to count the points per voxel
    pub with_point_counts: bool,
}

impl Default for VoxelGrid {
    fn default() -> Self {
        Self {
            n_digits: 5,
            with_point_counts: false,
        }
    }
}

struct Voxel {
    pos: (i64, i64, i64),
    first_point: usize,
    num_points: usize,
}

/// finds the cell of point p relative to the grid origin
fn find_leaf(p: &Point3<f64>, origin: &Point3<f64>, leafsize: &[f64; 3]) -> (i64, i64, i64) {
    (
        ((p.x - origin.x) / leafsize[0]).floor() as i64,
        ((p.y - origin.y) / leafsize[1]).floor() as i64,
        ((p.z - origin.z) / leafsize[2]).floor() as i64,
    )
}

fn round_to_digits(value: f64, n_digits: u32) -> f64 {
    let factor = 10f64.powi(n_digits as i32);
    (value * factor).round() / factor
}

fn check_resolution(name: &str, resolution: f64) -> Result<()> {
    if !resolution.is_finite() || resolution <= 0.0 {
        bail!("{} must be a positive number, got {}", name, resolution);
    }
    Ok(())
}

impl Voxelizer for VoxelGrid {
    fn voxelize(
        &self,
        positions: &[Point3<f64>],
        resolution_xy: f64,
        resolution_z: f64,
    ) -> Result<Voxelization> {
        check_resolution("resolution_xy", resolution_xy)?;
        check_resolution("resolution_z", resolution_z)?;

        let aabb = match AABB::from_points(positions) {
            Some(aabb) => aabb,
            None => {
                return Ok(Voxelization {
                    positions: vec![],
                    point_to_voxel: vec![],
                    voxel_to_point: vec![],
                    points_per_voxel: self.with_point_counts.then(Vec::new),
                })
            }
        };
        let origin = *aabb.min();
        let leafsize = [resolution_xy, resolution_xy, resolution_z];

        let mut voxels: Vec<Voxel> = vec![];
        let mut voxel_lookup: HashMap<(i64, i64, i64), usize> = HashMap::new();
        let mut point_to_voxel = Vec::with_capacity(positions.len());

        // create the VoxelGrid
        for (i, p) in positions.iter().enumerate() {
            let pos = find_leaf(p, &origin, &leafsize);
            let index = *voxel_lookup.entry(pos).or_insert_with(|| {
                voxels.push(Voxel {
                    pos,
                    first_point: i,
                    num_points: 0,
                });
                voxels.len() - 1
            });
            voxels[index].num_points += 1;
            point_to_voxel.push(index);
        }

        let centre = |cell: i64, axis: usize| {
            let coordinate = origin[axis] + (cell as f64 + 0.5) * leafsize[axis];
            round_to_digits(coordinate, self.n_digits)
        };
        let voxel_positions = voxels
            .iter()
            .map(|v| Point3::new(centre(v.pos.0, 0), centre(v.pos.1, 1), centre(v.pos.2, 2)))
            .collect();

        Ok(Voxelization {
            positions: voxel_positions,
            point_to_voxel,
            voxel_to_point: voxels.iter().map(|v| v.first_point).collect(),
            points_per_voxel: if self.with_point_counts {
                Some(voxels.iter().map(|v| v.num_points).collect())
            } else {
                None
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn setup_point_cloud() -> Vec<Point3<f64>> {
        let mut points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0)];
        // three points per unit cell: 1.5, 1.6, 1.7 ...
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..10 {
                    for offset in [0.5, 0.6, 0.7] {
                        points.push(Point3::new(
                            f64::from(i) + offset,
                            f64::from(j) + offset,
                            f64::from(k) + offset,
                        ));
                    }
                }
            }
        }
        points
    }

    #[test]
    fn test_voxel_grid() {
        let points = setup_point_cloud();
        assert_eq!(points.len(), 3002);
        let grid = VoxelGrid {
            n_digits: 5,
            with_point_counts: true,
        };
        let voxels = grid.voxelize(&points, 1.0, 1.0).unwrap();
        // (0,0,0) shares the first cell, (10,10,10) gets a cell of its own
        assert_eq!(voxels.len(), 1001);
        assert_eq!(voxels.point_to_voxel.len(), points.len());

        let counts = voxels.points_per_voxel.as_ref().unwrap();
        assert_eq!(counts.iter().sum::<usize>(), points.len());
        assert_eq!(counts[0], 4);
        assert_eq!(counts[1], 1);

        // voxel centres
        assert_approx_eq!(voxels.positions[0].x, 0.5);
        assert_approx_eq!(voxels.positions[1].z, 10.5);
        let cell = voxels.point_to_voxel[2 + 3];
        assert_approx_eq!(voxels.positions[cell].z, 1.5);
    }

    #[test]
    fn test_every_point_maps_to_the_voxel_containing_it() {
        let points = setup_point_cloud();
        let voxels = VoxelGrid::default().voxelize(&points, 0.5, 2.0).unwrap();
        for (p, voxel) in points.iter().zip(voxels.point_to_voxel.iter()) {
            let centre = voxels.positions[*voxel];
            assert!((p.x - centre.x).abs() <= 0.25 + 1e-9);
            assert!((p.y - centre.y).abs() <= 0.25 + 1e-9);
            assert!((p.z - centre.z).abs() <= 1.0 + 1e-9);
        }
        for (voxel, first) in voxels.voxel_to_point.iter().enumerate() {
            assert_eq!(voxels.point_to_voxel[*first], voxel);
        }
        assert!(voxels.points_per_voxel.is_none());
    }

    #[test]
    fn test_voxel_centres_are_rounded() {
        let points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)];
        let grid = VoxelGrid {
            n_digits: 1,
            with_point_counts: false,
        };
        let voxels = grid.voxelize(&points, 0.25, 0.25).unwrap();
        // 0.125 rounds to 0.1
        assert_eq!(voxels.positions[0].x, 0.1);
    }

    #[test]
    fn test_broadcast_round_trip() {
        let points = setup_point_cloud();
        let voxels = VoxelGrid::default().voxelize(&points, 2.0, 2.0).unwrap();
        let ids: Vec<usize> = (0..voxels.len()).collect();
        let per_point = voxels.broadcast(&ids).unwrap();
        assert_eq!(per_point, voxels.point_to_voxel);
    }

    #[test]
    fn test_broadcast_rejects_inconsistent_maps() {
        let points = setup_point_cloud();
        let mut voxels = VoxelGrid::default().voxelize(&points, 2.0, 2.0).unwrap();
        let ids: Vec<usize> = (0..voxels.len()).collect();
        assert!(voxels.broadcast(&ids[1..]).is_err());

        voxels.point_to_voxel[0] = voxels.len();
        assert!(voxels.broadcast(&ids).is_err());
    }

    #[test]
    fn test_empty_input() {
        let voxels = VoxelGrid::default().voxelize(&[], 1.0, 1.0).unwrap();
        assert!(voxels.is_empty());
        assert!(voxels.point_to_voxel.is_empty());
    }

    #[test]
    fn test_invalid_resolution() {
        let points = setup_point_cloud();
        assert!(VoxelGrid::default().voxelize(&points, 0.0, 1.0).is_err());
        assert!(VoxelGrid::default().voxelize(&points, 1.0, f64::NAN).is_err());
    }
}

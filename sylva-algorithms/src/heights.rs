//! Tree height estimation.
//!
//! Isolated points above the canopy (birds, noise, overhanging branches of neighbours) would be mistaken for tree
//! tops. The cloud is therefore voxelized again at a coarse resolution and clustered, and only points in coarse
//! clusters with more than [`MIN_CLUSTER_VOXELS`] voxels take part in the search for the highest point of a tree.

use std::{collections::HashMap, time::Instant};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use sylva_core::nalgebra::Point3;

use crate::{
    assignment::Assignment,
    axes::{DetectedTrees, TreeId},
    clustering::{cluster_sizes, Clusterer, Dbscan},
    voxel_grid::{VoxelGrid, Voxelizer},
};

/// Coarse clusters with this many voxels or less are treated as noise
pub const MIN_CLUSTER_VOXELS: usize = 3;

/// Highest point and height of one tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeHeight {
    pub tree_id: TreeId,
    /// `None` if every point of the tree was filtered out
    pub highest_point: Option<Point3<f64>>,
    /// Raw elevation of the highest point minus the height offset of the stem
    pub normalized_height: Option<f64>,
    /// Whether the axis of the tree deviates from the vertical by at most the maximum deviation
    pub valid: bool,
}

impl TreeHeight {
    /// `[x, y, z, normalized_height, valid]`, missing values are `NaN` and `valid` is `0.0` or `1.0`
    pub fn to_row(&self) -> [f64; 5] {
        let point = self
            .highest_point
            .unwrap_or_else(|| Point3::new(f64::NAN, f64::NAN, f64::NAN));
        [
            point.x,
            point.y,
            point.z,
            self.normalized_height.unwrap_or(f64::NAN),
            if self.valid { 1.0 } else { 0.0 },
        ]
    }
}

/// Finds the highest trustworthy point of every detected tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightEstimator {
    /// Points at least this far from their axis are ignored
    pub d: f64,
    /// Maximum deviation from the vertical (degrees) of a valid tree
    pub max_dev: f64,
    /// Voxel size of the coarse grid used for outlier filtering
    pub resolution_heights: f64,
    /// Voxel centres of the coarse grid are rounded to this many decimal digits
    pub n_digits: u32,
}

impl Default for HeightEstimator {
    fn default() -> Self {
        Self {
            d: 15.0,
            max_dev: 25.0,
            resolution_heights: 0.3,
            n_digits: 5,
        }
    }
}

impl HeightEstimator {
    /// Clustering of the coarse grid, touching voxels (diagonals included) end up in the same cluster
    pub fn clusterer(&self) -> Dbscan {
        Dbscan {
            eps: self.resolution_heights * 1.9,
            min_samples: 2,
        }
    }

    /// Estimates the heights of `trees` with the default coarse voxel grid and clustering
    pub fn estimate(
        &self,
        positions: &[Point3<f64>],
        trees: &DetectedTrees,
        assignment: &Assignment,
    ) -> Result<Vec<TreeHeight>> {
        let voxelizer = VoxelGrid {
            n_digits: self.n_digits,
            with_point_counts: false,
        };
        self.estimate_with(positions, trees, assignment, &voxelizer, &self.clusterer())
    }

    /// Estimates the heights of `trees`, one entry per tree in the same order.
    ///
    /// `positions` and `assignment` belong to the same (fine) cloud. The highest point of a tree is the point with
    /// the largest Z among the points assigned to it that are closer than `d` to the axis and belong to a coarse
    /// cluster with more than [`MIN_CLUSTER_VOXELS`] voxels. On equal Z, the first such point wins.
    pub fn estimate_with<V: Voxelizer + ?Sized, C: Clusterer + ?Sized>(
        &self,
        positions: &[Point3<f64>],
        trees: &DetectedTrees,
        assignment: &Assignment,
        voxelizer: &V,
        clusterer: &C,
    ) -> Result<Vec<TreeHeight>> {
        if assignment.len() != positions.len() {
            bail!(
                "Assignment has {} entries but the cloud has {} points",
                assignment.len(),
                positions.len()
            );
        }
        if trees.is_empty() {
            return Ok(vec![]);
        }
        let t_start = Instant::now();

        let coarse = voxelizer
            .voxelize(
                positions,
                self.resolution_heights,
                self.resolution_heights,
            )
            .context("Voxelization for height estimation failed")?;
        let coarse_labels = clusterer
            .cluster(&coarse.positions)
            .context("Clustering for height estimation failed")?;
        if coarse.point_to_voxel.len() != positions.len() {
            bail!(
                "Coarse voxelization maps {} points but the cloud has {} points",
                coarse.point_to_voxel.len(),
                positions.len()
            );
        }
        if coarse_labels.len() != coarse.len() {
            bail!(
                "Clustering returned {} labels for {} coarse voxels",
                coarse_labels.len(),
                coarse.len()
            );
        }
        let sizes = cluster_sizes(&coarse_labels);
        let labels = coarse.broadcast(&coarse_labels)?;

        let trusted = |index: usize| -> bool {
            let close = matches!(assignment.distance_to_axis[index], Some(distance) if distance < self.d);
            let dense = matches!(labels[index], Some(label) if sizes[label] > MIN_CLUSTER_VOXELS);
            close && dense
        };

        let tree_indices: HashMap<TreeId, usize> = trees
            .iter()
            .enumerate()
            .map(|(tree_index, tree)| (tree.id, tree_index))
            .collect();
        let mut highest: Vec<Option<usize>> = vec![None; trees.len()];
        for (index, id) in assignment.tree_id.iter().enumerate() {
            let id = match id {
                Some(id) => *id,
                None => continue,
            };
            if !trusted(index) {
                continue;
            }
            let tree_index = match tree_indices.get(&id) {
                Some(tree_index) => *tree_index,
                None => continue,
            };
            let higher = match highest[tree_index] {
                Some(current) => positions[index].z > positions[current].z,
                None => true,
            };
            if higher {
                highest[tree_index] = Some(index);
            }
        }

        let heights: Vec<TreeHeight> = trees
            .iter()
            .zip(highest.iter())
            .map(|(tree, highest)| {
                let highest_point = highest.map(|index| positions[index]);
                if highest_point.is_none() {
                    warn!("No point left to measure the height of tree {}", tree.id);
                }
                TreeHeight {
                    tree_id: tree.id,
                    highest_point,
                    normalized_height: highest_point.map(|p| p.z - tree.height_offset),
                    valid: tree.deviation_deg <= self.max_dev,
                }
            })
            .collect();

        info!(
            "Heights of {} trees ({} coarse voxels, {} clusters) took {:.3}s",
            trees.len(),
            coarse.len(),
            sizes.len(),
            t_start.elapsed().as_secs_f64()
        );
        Ok(heights)
    }
}

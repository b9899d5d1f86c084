//! Tree individualization pipeline.
//!
//! [`Individualizer`] runs all stages on a height-normalized cloud and a clustered stripe of trunk candidates:
//!
//! 1. voxelize the cloud at `resolution_xy` / `resolution_z`
//! 2. fit one axis per stem cluster of the stripe ([`AxisFitter`])
//! 3. assign every voxel to its nearest axis ([`AssignmentStrategy`])
//! 4. estimate the height of every tree ([`HeightEstimator`])
//! 5. copy the voxel assignment back onto the points of the input cloud
//!
//! ```
//! # use sylva_algorithms::individualize::{individualize_trees, IndividualizationParams};
//! # use sylva_core::containers::PointCloud;
//! // a single vertical stem, rows are [x, y, z, z0] for the cloud and [x, y, z, z0, cluster] for the stripe
//! let cloud = PointCloud::from_rows((0..100).map(|i| {
//!     let z = 0.2 + f64::from(i) * 0.05;
//!     [0.05 * f64::from(i % 3), 0.05 * f64::from(i % 2), z, z]
//! }))
//! .unwrap();
//! let stripe = PointCloud::from_rows(cloud.rows().filter(|row| row[3] > 0.7 && row[3] < 3.5).map(|row| {
//!     [row[0], row[1], row[2], row[3], 1.0]
//! }))
//! .unwrap();
//! let params = IndividualizationParams { h_range: 0.5, ..IndividualizationParams::default() };
//! let result = individualize_trees(&cloud, &stripe, &params, None).unwrap();
//! assert_eq!(result.trees.len(), 1);
//! assert!(result.annotated.tree_id.iter().all(|id| *id == Some(1)));
//! ```

use std::{cmp::Ordering, time::Instant};

use anyhow::{bail, Context, Result};
use log::info;
use sylva_core::{
    containers::{FieldLayout, PointCloud},
    nalgebra::Point3,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    assignment::{Assignment, AssignmentStrategy},
    axes::{group_stem_clusters, AxisFitter, DetectedTrees, ProgressHook, TreeId},
    clustering::{Clusterer, Dbscan},
    heights::{HeightEstimator, TreeHeight},
    voxel_grid::{VoxelGrid, Voxelizer},
};

/// Parameters of the individualization pipeline. Lengths are in the units of the cloud, angles in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IndividualizationParams {
    /// Voxel size in X and Y. Also the sampling step of the approximate assignment
    pub resolution_xy: f64,
    /// Voxel size in Z
    pub resolution_z: f64,
    /// Lower normalized elevation of the stripe
    pub stripe_lower_limit: f64,
    /// Upper normalized elevation of the stripe
    pub stripe_upper_limit: f64,
    /// Fraction of the stripe height a stem must cover
    pub h_range: f64,
    /// Maximum distance of a point to the axis of its tree
    pub d_max: f64,
    /// Minimum number of stripe points of a stem
    pub min_points: usize,
    /// Maximum distance to the axis of points used for height estimation
    pub d: f64,
    /// Maximum deviation of a valid tree from the vertical
    pub max_dev: f64,
    /// Voxel size used to filter outliers before height estimation
    pub resolution_heights: f64,
    /// Voxel centres are rounded to this many decimal digits
    pub n_digits: u32,
    pub strategy: AssignmentStrategy,
    /// Columns of the cloud and of the stripe
    pub fields: FieldLayout,
}

impl Default for IndividualizationParams {
    fn default() -> Self {
        Self {
            resolution_xy: 0.035,
            resolution_z: 0.035,
            stripe_lower_limit: 0.7,
            stripe_upper_limit: 3.5,
            h_range: 1.0,
            d_max: 1.5,
            min_points: 20,
            d: 15.0,
            max_dev: 25.0,
            resolution_heights: 0.3,
            n_digits: 5,
            strategy: AssignmentStrategy::default(),
            fields: FieldLayout::default(),
        }
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{} must be a positive number, got {}", name, value);
    }
    Ok(())
}

impl IndividualizationParams {
    /// Checks that the parameters describe a meaningful configuration
    /// ```
    /// # use sylva_algorithms::individualize::IndividualizationParams;
    /// assert!(IndividualizationParams::default().validate().is_ok());
    /// let inverted = IndividualizationParams { stripe_lower_limit: 4.0, ..IndividualizationParams::default() };
    /// assert!(inverted.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        check_positive("resolution_xy", self.resolution_xy)?;
        check_positive("resolution_z", self.resolution_z)?;
        check_positive("resolution_heights", self.resolution_heights)?;
        check_positive("d_max", self.d_max)?;
        check_positive("d", self.d)?;
        if self.stripe_lower_limit.partial_cmp(&self.stripe_upper_limit) != Some(Ordering::Less) {
            bail!(
                "Stripe lower limit {} must be below the upper limit {}",
                self.stripe_lower_limit,
                self.stripe_upper_limit
            );
        }
        if self.h_range.is_nan() || self.h_range < 0.0 {
            bail!("h_range must not be negative, got {}", self.h_range);
        }
        if self.max_dev.is_nan() {
            bail!("max_dev must be a number");
        }
        Ok(())
    }

    pub fn axis_fitter(&self) -> AxisFitter {
        AxisFitter::new(
            self.stripe_lower_limit,
            self.stripe_upper_limit,
            self.h_range,
        )
    }

    pub fn height_estimator(&self) -> HeightEstimator {
        HeightEstimator {
            d: self.d,
            max_dev: self.max_dev,
            resolution_heights: self.resolution_heights,
            n_digits: self.n_digits,
        }
    }
}

/// The input cloud with the tree id and the distance to the tree axis of every point
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedCloud {
    pub cloud: PointCloud,
    pub tree_id: Vec<Option<TreeId>>,
    pub distance_to_axis: Vec<Option<f64>>,
}

impl AnnotatedCloud {
    /// Number of points that belong to a tree
    pub fn num_assigned(&self) -> usize {
        self.tree_id.iter().filter(|id| id.is_some()).count()
    }

    /// Appends the columns `tree_id` and `distance_to_axis` to the cloud, missing values become `NaN`
    pub fn into_point_cloud(self) -> Result<PointCloud> {
        let tree_id: Vec<f64> = self
            .tree_id
            .iter()
            .map(|id| id.map_or(f64::NAN, |id| id as f64))
            .collect();
        let distance: Vec<f64> = self
            .distance_to_axis
            .iter()
            .map(|distance| distance.unwrap_or(f64::NAN))
            .collect();
        self.cloud.with_columns(&[&tree_id, &distance])
    }
}

/// Result of [`Individualizer::run`]
#[derive(Debug, Clone, PartialEq)]
pub struct Individualization {
    pub annotated: AnnotatedCloud,
    pub trees: DetectedTrees,
    /// One entry per tree, in the order of `trees`
    pub heights: Vec<TreeHeight>,
}

/// Detected trees and the assignment of a voxelized cloud to them
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLocations {
    pub trees: DetectedTrees,
    pub assignment: Assignment,
}

/// Separates the trees of a forest plot and measures their heights.
///
/// The voxel grid used for the input cloud and for height estimation and the clustering used to filter
/// outliers can be replaced through [`Individualizer::with_collaborators`].
#[derive(Debug, Clone)]
pub struct Individualizer<V = VoxelGrid, C = Dbscan> {
    params: IndividualizationParams,
    voxelizer: V,
    clusterer: C,
}

impl Individualizer<VoxelGrid, Dbscan> {
    /// Individualizer with the default voxel grid and DBSCAN clustering
    pub fn new(params: IndividualizationParams) -> Self {
        let height_estimator = params.height_estimator();
        Self {
            voxelizer: VoxelGrid {
                n_digits: params.n_digits,
                with_point_counts: false,
            },
            clusterer: height_estimator.clusterer(),
            params,
        }
    }
}

impl<V: Voxelizer, C: Clusterer> Individualizer<V, C> {
    pub fn with_collaborators(params: IndividualizationParams, voxelizer: V, clusterer: C) -> Self {
        Self {
            params,
            voxelizer,
            clusterer,
        }
    }

    pub fn params(&self) -> &IndividualizationParams {
        &self.params
    }

    /// Fits the stem axes of `stripe` and assigns `positions` to them
    pub fn locate_trees(
        &self,
        positions: &[Point3<f64>],
        stripe: &PointCloud,
        progress: Option<ProgressHook<'_>>,
    ) -> Result<TreeLocations> {
        let params = &self.params;
        let t_start = Instant::now();
        let stems = group_stem_clusters(stripe, &params.fields, params.min_points)
            .context("Reading stem clusters failed")?;
        let fitted = params.axis_fitter().fit_all(&stems, progress)?;
        let trees = DetectedTrees::from(fitted.as_slice());
        info!(
            "{} of {} stems form a tree axis ({:.3}s)",
            trees.len(),
            stems.len(),
            t_start.elapsed().as_secs_f64()
        );

        let assignment = params
            .strategy
            .assign(positions, &fitted, params.d_max, params.resolution_xy)
            .context("Assigning points to tree axes failed")?;
        Ok(TreeLocations { trees, assignment })
    }

    /// Runs the whole pipeline. `cloud` and `stripe` are both read with the field layout of the parameters, the
    /// stripe additionally needs the cluster id field.
    ///
    /// `progress` is called with `(completed, total)` stem counts while stem axes are fitted.
    pub fn run(
        &self,
        cloud: &PointCloud,
        stripe: &PointCloud,
        progress: Option<ProgressHook<'_>>,
    ) -> Result<Individualization> {
        let params = &self.params;
        params.validate()?;
        let t_start = Instant::now();

        let positions = cloud.positions(&params.fields).context("Reading the cloud failed")?;
        let voxels = self
            .voxelizer
            .voxelize(&positions, params.resolution_xy, params.resolution_z)
            .context("Voxelizing the cloud failed")?;
        if voxels.point_to_voxel.len() != positions.len() {
            bail!(
                "Voxelization maps {} points but the cloud has {} points",
                voxels.point_to_voxel.len(),
                positions.len()
            );
        }
        info!(
            "Voxelized {} points into {} voxels",
            positions.len(),
            voxels.len()
        );

        let TreeLocations { trees, assignment } =
            self.locate_trees(&voxels.positions, stripe, progress)?;
        info!(
            "{} of {} voxels assigned to {} trees",
            assignment.num_assigned(),
            assignment.len(),
            trees.len()
        );

        let heights = params
            .height_estimator()
            .estimate_with(
                &voxels.positions,
                &trees,
                &assignment,
                &self.voxelizer,
                &self.clusterer,
            )
            .context("Estimating tree heights failed")?;

        let annotated = AnnotatedCloud {
            cloud: cloud.clone(),
            tree_id: voxels.broadcast(&assignment.tree_id)?,
            distance_to_axis: voxels.broadcast(&assignment.distance_to_axis)?,
        };
        info!(
            "Individualized {} trees in {:.3}s",
            trees.len(),
            t_start.elapsed().as_secs_f64()
        );
        Ok(Individualization {
            annotated,
            trees,
            heights,
        })
    }
}

/// Runs [`Individualizer`] with the default collaborators
pub fn individualize_trees(
    cloud: &PointCloud,
    stripe: &PointCloud,
    params: &IndividualizationParams,
    progress: Option<ProgressHook<'_>>,
) -> Result<Individualization> {
    Individualizer::new(*params).run(cloud, stripe, progress)
}

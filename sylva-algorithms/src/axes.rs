//! Stem axis fitting.
//!
//! A clustered stripe contains one cluster per trunk candidate. Each candidate with enough points is turned
//! into a [`TreeAxis`] by fitting a 3D line through it with PCA, provided that its points extend vertically
//! over a large enough part of the stripe.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use sylva_core::{
    containers::{FieldLayout, PointCloud},
    nalgebra::{Point3, Vector3},
};

use crate::pca::PrincipalAxes;

/// Identifier of a tree, taken from the cluster label of its stem
pub type TreeId = i64;

/// Callback receiving `(completed, total)` stem counts
pub type ProgressHook<'a> = &'a mut dyn FnMut(usize, usize);

/// Points of the stripe that share one cluster label
#[derive(Debug, Clone, PartialEq)]
pub struct StemCluster {
    pub id: TreeId,
    pub positions: Vec<Point3<f64>>,
    /// Ground-normalized elevation of each point in `positions`
    pub normalized_z: Vec<f64>,
}

impl StemCluster {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Difference between the mean raw elevation and the mean normalized elevation, i.e. the ground
    /// elevation below the stem
    pub fn height_offset(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let n = self.len() as f64;
        let mean_z = self.positions.iter().map(|p| p.z).sum::<f64>() / n;
        let mean_z0 = self.normalized_z.iter().sum::<f64>() / n;
        mean_z - mean_z0
    }

    /// Vertical extent (max - min) of the raw elevations
    pub fn z_range(&self) -> f64 {
        let (min, max) = self
            .positions
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), p| {
                (min.min(p.z), max.max(p.z))
            });
        if min > max {
            0.0
        } else {
            max - min
        }
    }
}

/// Splits a clustered stripe into its stem clusters, ordered by increasing cluster id. Clusters with fewer
/// than `min_points` points are dropped
pub fn group_stem_clusters(
    stripe: &PointCloud,
    layout: &FieldLayout,
    min_points: usize,
) -> Result<Vec<StemCluster>> {
    if stripe.is_empty() {
        return Ok(vec![]);
    }
    layout.check_coordinates(stripe.num_fields())?;
    let id_column = layout.tree_id_column(stripe.num_fields()).ok_or_else(|| {
        anyhow!(
            "Tree id field {:?} is out of bounds for stripe points with {} fields",
            layout.tree_id,
            stripe.num_fields()
        )
    })?;

    let mut clusters: BTreeMap<TreeId, StemCluster> = BTreeMap::new();
    for (index, row) in stripe.rows().enumerate() {
        let value = row[id_column];
        if !value.is_finite() {
            bail!("Stripe point {} has a non-finite tree id {}", index, value);
        }
        let id = value.round() as TreeId;
        let cluster = clusters.entry(id).or_insert_with(|| StemCluster {
            id,
            positions: vec![],
            normalized_z: vec![],
        });
        cluster
            .positions
            .push(Point3::new(row[layout.x], row[layout.y], row[layout.z]));
        cluster.normalized_z.push(row[layout.z0]);
    }

    Ok(clusters
        .into_values()
        .filter(|cluster| cluster.len() >= min_points)
        .collect())
}

/// Fitted axis of one tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeAxis {
    pub id: TreeId,
    /// Unit direction of the axis (first principal component of the stem)
    pub direction: Vector3<f64>,
    pub centroid: Point3<f64>,
    /// Mean raw elevation minus mean normalized elevation of the stem points
    pub height_offset: f64,
    /// Angle between the axis and the vertical, in degrees
    pub deviation_deg: f64,
}

impl TreeAxis {
    /// The direction flipped so that it points upwards
    pub fn upward_direction(&self) -> Vector3<f64> {
        if self.direction.z < 0.0 {
            -self.direction
        } else {
            self.direction
        }
    }

    /// `[id, dir_x, dir_y, dir_z, centroid_x, centroid_y, centroid_z, height_offset, deviation_deg]`
    pub fn to_row(&self) -> [f64; 9] {
        [
            self.id as f64,
            self.direction.x,
            self.direction.y,
            self.direction.z,
            self.centroid.x,
            self.centroid.y,
            self.centroid.z,
            self.height_offset,
            self.deviation_deg,
        ]
    }
}

/// Angle between `direction` and the vertical in degrees. A horizontal direction counts as 90°
/// ```
/// # use sylva_algorithms::axes::deviation_from_vertical;
/// # use sylva_core::nalgebra::Vector3;
/// assert_eq!(deviation_from_vertical(&Vector3::new(0.0, 0.0, -1.0)), 0.0);
/// assert!((deviation_from_vertical(&Vector3::new(1.0, 0.0, 1.0)) - 45.0).abs() < 1e-9);
/// assert_eq!(deviation_from_vertical(&Vector3::new(0.0, 1.0, 0.0)), 90.0);
/// ```
pub fn deviation_from_vertical(direction: &Vector3<f64>) -> f64 {
    if direction.z == 0.0 {
        return 90.0;
    }
    (direction.x.hypot(direction.y) / direction.z)
        .atan()
        .to_degrees()
        .abs()
}

/// A stem that passed fitting, together with the principal axes it was fitted with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedStem {
    pub axis: TreeAxis,
    pub pca: PrincipalAxes,
}

/// Turns stem clusters into tree axes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisFitter {
    /// Vertical extent a stem must strictly exceed
    pub h_range_value: f64,
}

impl AxisFitter {
    /// `h_range` is the fraction of the stripe height a stem has to cover
    pub fn new(stripe_lower_limit: f64, stripe_upper_limit: f64, h_range: f64) -> Self {
        Self {
            h_range_value: (stripe_upper_limit - stripe_lower_limit) * h_range,
        }
    }

    /// Fits the axis of `stem`. Returns `None` if the stem does not extend over more than `h_range_value`
    pub fn fit(&self, stem: &StemCluster) -> Result<Option<FittedStem>> {
        let z_range = stem.z_range();
        if z_range <= self.h_range_value {
            debug!(
                "Rejecting stem {}: vertical extent {:.3} does not exceed {:.3}",
                stem.id, z_range, self.h_range_value
            );
            return Ok(None);
        }

        let pca = PrincipalAxes::fit(&stem.positions)
            .with_context(|| format!("Fitting the axis of stem {} failed", stem.id))?;
        let direction = *pca.principal_direction();
        Ok(Some(FittedStem {
            axis: TreeAxis {
                id: stem.id,
                direction,
                centroid: pca.mean,
                height_offset: stem.height_offset(),
                deviation_deg: deviation_from_vertical(&direction),
            },
            pca,
        }))
    }

    /// Fits all `stems` in order, keeping the ones that pass. `progress` is called with `(0, total)` first and
    /// then once per stem, rejected stems included
    pub fn fit_all(
        &self,
        stems: &[StemCluster],
        mut progress: Option<ProgressHook<'_>>,
    ) -> Result<Vec<FittedStem>> {
        let total = stems.len();
        if let Some(hook) = progress.as_mut() {
            hook(0, total);
        }
        let mut fitted = Vec::with_capacity(total);
        for (index, stem) in stems.iter().enumerate() {
            if let Some(stem) = self.fit(stem)? {
                fitted.push(stem);
            }
            if let Some(hook) = progress.as_mut() {
                hook(index + 1, total);
            }
        }
        Ok(fitted)
    }
}

/// Tree axes in the order of their stem cluster ids
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectedTrees(pub Vec<TreeAxis>);

impl DetectedTrees {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TreeAxis> {
        self.0.iter()
    }

    /// One 9-column row per tree, see [`TreeAxis::to_row`]
    pub fn to_rows(&self) -> Vec<[f64; 9]> {
        self.0.iter().map(TreeAxis::to_row).collect()
    }
}

impl From<&[FittedStem]> for DetectedTrees {
    fn from(stems: &[FittedStem]) -> Self {
        Self(stems.iter().map(|stem| stem.axis).collect())
    }
}

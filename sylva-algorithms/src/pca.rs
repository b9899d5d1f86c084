use anyhow::{bail, Result};
use sylva_core::nalgebra::{Matrix3, Point3, Vector3};

/// Principal axes of a 3D point set.
///
/// The axes form an orthonormal basis ordered by decreasing explained variance, so `axes[0]` is the direction
/// in which the points spread the most. The sign of each axis is arbitrary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalAxes {
    pub mean: Point3<f64>,
    pub axes: [Vector3<f64>; 3],
    /// Variance along each axis (eigenvalues of the sample covariance matrix)
    pub explained_variance: [f64; 3],
}

impl PrincipalAxes {
    /// Computes the principal axes of `points`
    /// ```
    /// # use sylva_algorithms::pca::PrincipalAxes;
    /// # use sylva_core::nalgebra::Point3;
    /// let points: Vec<_> = (0..10).map(|i| Point3::new(0.0, 0.1 * (i % 2) as f64, i as f64)).collect();
    /// let pca = PrincipalAxes::fit(&points).unwrap();
    /// assert!(pca.principal_direction().z.abs() > 0.99);
    /// ```
    pub fn fit(points: &[Point3<f64>]) -> Result<Self> {
        if points.is_empty() {
            bail!("Can't compute the principal axes of an empty point set");
        }
        let mean = calc_centroid(points);
        let covariance_matrix = calc_covariance_matrix(&mean, points);
        let eigen = covariance_matrix.symmetric_eigen();

        let mut order = [0, 1, 2];
        // largest eigenvalue first
        order.sort_by(|a, b| {
            eigen.eigenvalues[*b]
                .partial_cmp(&eigen.eigenvalues[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if order.iter().any(|i| !eigen.eigenvalues[*i].is_finite()) {
            bail!("Could not calculate eigenvalues of the covariance matrix");
        }

        let axis = |i: usize| -> Vector3<f64> { eigen.eigenvectors.column(order[i]).normalize() };
        Ok(Self {
            mean,
            axes: [axis(0), axis(1), axis(2)],
            explained_variance: [
                eigen.eigenvalues[order[0]].max(0.0),
                eigen.eigenvalues[order[1]].max(0.0),
                eigen.eigenvalues[order[2]].max(0.0),
            ],
        })
    }

    /// Direction of maximum variance
    pub fn principal_direction(&self) -> &Vector3<f64> {
        &self.axes[0]
    }

    /// Expresses `point` in the axis-local frame: centred on the mean, one coordinate per principal axis
    pub fn transform(&self, point: &Point3<f64>) -> Vector3<f64> {
        let centred = point - self.mean;
        Vector3::new(
            centred.dot(&self.axes[0]),
            centred.dot(&self.axes[1]),
            centred.dot(&self.axes[2]),
        )
    }

    /// Distance of `point` to the line through the mean along the principal direction, measured in the
    /// plane spanned by the two minor axes
    pub fn distance_to_principal_axis(&self, point: &Point3<f64>) -> f64 {
        let local = self.transform(point);
        local.y.hypot(local.z)
    }
}

pub(crate) fn calc_centroid(points: &[Point3<f64>]) -> Point3<f64> {
    let sum: Vector3<f64> = points.iter().map(|p| p.coords).sum();
    Point3::from(sum / (points.len() as f64))
}

fn calc_covariance_matrix(centroid: &Point3<f64>, points: &[Point3<f64>]) -> Matrix3<f64> {
    let unweighted_covariance_matrix: Matrix3<f64> = points
        .iter()
        .map(|p| {
            let diff: Vector3<f64> = p - centroid;
            diff * diff.transpose()
        })
        .sum();
    let degrees_of_freedom = points.len().saturating_sub(1).max(1) as f64;
    unweighted_covariance_matrix / degrees_of_freedom
}

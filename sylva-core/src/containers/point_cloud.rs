use anyhow::{bail, Result};
use nalgebra::Point3;

use super::FieldLayout;

/// A dense point table stored in row-major order.
///
/// # Data layout
///
/// Every point is a row of `num_fields` values, all rows are stored back to back:
/// ```md
/// [x1, y1, z1, z0_1, ..., x2, y2, z2, z0_2, ...]
/// ```
///
/// The row order matters: indices handed out by voxelization or clustering always refer to rows of the
/// table they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    values: Vec<f64>,
    num_fields: usize,
}

impl PointCloud {
    /// Creates an empty `PointCloud` whose rows have `num_fields` values
    pub fn new(num_fields: usize) -> Self {
        Self {
            values: vec![],
            num_fields,
        }
    }

    /// Creates a `PointCloud` from a flat row-major vector of values. Fails if the number of values is
    /// not a multiple of `num_fields`
    /// ```
    /// # use sylva_core::containers::PointCloud;
    /// let cloud = PointCloud::from_values(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], 3).unwrap();
    /// assert_eq!(cloud.len(), 2);
    /// assert_eq!(cloud.row(1), &[3.0, 4.0, 5.0]);
    /// assert!(PointCloud::from_values(vec![0.0, 1.0], 3).is_err());
    /// ```
    pub fn from_values(values: Vec<f64>, num_fields: usize) -> Result<Self> {
        if num_fields == 0 {
            bail!("A point cloud needs at least one field per point");
        }
        if values.len() % num_fields != 0 {
            bail!(
                "{} values can't be split into rows of {} fields",
                values.len(),
                num_fields
            );
        }
        Ok(Self { values, num_fields })
    }

    /// Creates a `PointCloud` from a sequence of rows. All rows must have the same width
    /// ```
    /// # use sylva_core::containers::PointCloud;
    /// let cloud = PointCloud::from_rows(vec![[1.0, 2.0], [3.0, 4.0]]).unwrap();
    /// assert_eq!(cloud.num_fields(), 2);
    /// assert_eq!(cloud.value(1, 0), 3.0);
    /// ```
    pub fn from_rows<R: AsRef<[f64]>, I: IntoIterator<Item = R>>(rows: I) -> Result<Self> {
        let mut rows = rows.into_iter().peekable();
        let num_fields = match rows.peek() {
            Some(row) => row.as_ref().len(),
            None => bail!("Can't infer the number of fields from an empty sequence of rows"),
        };
        let mut cloud = Self::new(num_fields);
        for row in rows {
            cloud.push_row(row.as_ref())?;
        }
        Ok(cloud)
    }

    /// Appends a row to this `PointCloud`
    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.num_fields {
            bail!(
                "Row with {} fields does not fit into a point cloud with {} fields",
                row.len(),
                self.num_fields
            );
        }
        self.values.extend_from_slice(row);
        Ok(())
    }

    /// Number of points
    pub fn len(&self) -> usize {
        if self.num_fields == 0 {
            0
        } else {
            self.values.len() / self.num_fields
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of values per point
    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    /// Returns the values of the point at `index`
    ///
    /// # Panics
    ///
    /// If `index` is out of bounds
    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.num_fields;
        &self.values[start..start + self.num_fields]
    }

    /// Returns the value of `field` of the point at `index`
    ///
    /// # Panics
    ///
    /// If `index` or `field` is out of bounds
    pub fn value(&self, index: usize, field: usize) -> f64 {
        self.row(index)[field]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.num_fields.max(1))
    }

    /// Returns all values of the given `field`, one per point
    pub fn column(&self, field: usize) -> Vec<f64> {
        self.rows().map(|row| row[field]).collect()
    }

    /// Extracts the XYZ positions of all points as described by `layout`
    /// ```
    /// # use sylva_core::containers::{FieldLayout, PointCloud};
    /// let cloud = PointCloud::from_rows(vec![[0.5, 7.0, 1.0, 2.0]]).unwrap();
    /// let layout = FieldLayout { x: 1, y: 0, z: 3, z0: 2, ..FieldLayout::default() };
    /// let positions = cloud.positions(&layout).unwrap();
    /// assert_eq!(positions[0], sylva_core::nalgebra::Point3::new(7.0, 0.5, 2.0));
    /// ```
    pub fn positions(&self, layout: &FieldLayout) -> Result<Vec<Point3<f64>>> {
        layout.check_coordinates(self.num_fields)?;
        Ok(self
            .rows()
            .map(|row| Point3::new(row[layout.x], row[layout.y], row[layout.z]))
            .collect())
    }

    /// Returns a new `PointCloud` with the given columns appended to every row. Each column must have
    /// exactly one value per point
    /// ```
    /// # use sylva_core::containers::PointCloud;
    /// let cloud = PointCloud::from_rows(vec![[1.0], [2.0]]).unwrap();
    /// let extended = cloud.with_columns(&[&[10.0, 20.0], &[0.1, 0.2]]).unwrap();
    /// assert_eq!(extended.row(1), &[2.0, 20.0, 0.2]);
    /// ```
    pub fn with_columns(&self, columns: &[&[f64]]) -> Result<PointCloud> {
        if let Some(column) = columns.iter().find(|column| column.len() != self.len()) {
            bail!(
                "Column with {} values can't be appended to a point cloud with {} points",
                column.len(),
                self.len()
            );
        }
        let num_fields = self.num_fields + columns.len();
        let mut values = Vec::with_capacity(self.len() * num_fields);
        for (index, row) in self.rows().enumerate() {
            values.extend_from_slice(row);
            values.extend(columns.iter().map(|column| column[index]));
        }
        Ok(PointCloud { values, num_fields })
    }
}

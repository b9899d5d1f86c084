use anyhow::{bail, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position of the cluster/tree id inside a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IdField {
    /// The id is stored at the given column index
    At(usize),
    /// The id is stored in the last column of the row, whatever the row width is
    Last,
}

/// Describes which column of a [`PointCloud`](super::PointCloud) holds which value.
///
/// Field positions are chosen by the caller. The default layout is `X, Y, Z, Z0` in the first four
/// columns and the cluster id in the last column, which is how a clustered stripe is usually stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldLayout {
    /// Column of the X coordinate
    pub x: usize,
    /// Column of the Y coordinate
    pub y: usize,
    /// Column of the raw elevation
    pub z: usize,
    /// Column of the ground-normalized elevation
    pub z0: usize,
    /// Column of the cluster id, only needed for clustered stripes
    pub tree_id: IdField,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            x: 0,
            y: 1,
            z: 2,
            z0: 3,
            tree_id: IdField::Last,
        }
    }
}

impl FieldLayout {
    /// Resolves the column of the cluster id for rows that are `num_fields` wide
    /// ```
    /// # use sylva_core::containers::{FieldLayout, IdField};
    /// let layout = FieldLayout::default();
    /// assert_eq!(layout.tree_id_column(6), Some(5));
    /// let layout = FieldLayout { tree_id: IdField::At(4), ..FieldLayout::default() };
    /// assert_eq!(layout.tree_id_column(6), Some(4));
    /// assert_eq!(FieldLayout::default().tree_id_column(0), None);
    /// ```
    pub fn tree_id_column(&self, num_fields: usize) -> Option<usize> {
        match self.tree_id {
            IdField::At(index) if index < num_fields => Some(index),
            IdField::At(_) => None,
            IdField::Last => num_fields.checked_sub(1),
        }
    }

    /// Checks that the coordinate fields of this layout address columns of a row that is `num_fields` wide
    pub fn check_coordinates(&self, num_fields: usize) -> Result<()> {
        for (name, index) in [("X", self.x), ("Y", self.y), ("Z", self.z), ("Z0", self.z0)] {
            if index >= num_fields {
                bail!(
                    "{} field index {} is out of bounds for points with {} fields",
                    name,
                    index,
                    num_fields
                );
            }
        }
        Ok(())
    }
}

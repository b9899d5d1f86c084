//! Containers for point data.
//!
//! A [`PointCloud`] is a dense, row-major table of `f64` values. Each row is one point and every row has
//! the same number of fields. Which field holds which coordinate is not part of the table itself, it is
//! described separately by a [`FieldLayout`]. This mirrors how forest inventories usually exchange clouds
//! (ASCII/NumPy style matrices with a caller-defined column order) and keeps the algorithms independent
//! of any particular file format.

mod field_layout;
pub use self::field_layout::*;

mod point_cloud;
pub use self::point_cloud::*;

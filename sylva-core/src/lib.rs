#![warn(clippy::all)]

//! Core data structures for forest point cloud analysis
//!
//! Sylva works on plain numeric point tables: every point is a fixed-width row of `f64` values and the
//! meaning of each column (X, Y, Z, normalized Z, cluster id) is described by a [FieldLayout](crate::containers::FieldLayout)
//! that the caller supplies. Algorithms never assume a canonical column order.

pub extern crate nalgebra;

/// Point tables and the field layout that describes their columns
pub mod containers;
/// Useful mathematical tools when working with point cloud data
pub mod math;

#![warn(clippy::all)]
//! Algorithms that separate the trees of a forest plot.
//!
//! The entry point is [`individualize::Individualizer`], which combines the building blocks of this crate: a stem
//! axis is fitted to every trunk candidate of a clustered stripe, every point of the plot is assigned to its
//! nearest axis and the height of every tree is measured.

// Regular voxel grid with a mapping between points and voxels.
pub mod voxel_grid;
// Density-based clustering (DBSCAN).
pub mod clustering;
// Principal component analysis of 3D point sets.
pub mod pca;
// Stem clusters and the axes fitted to them.
pub mod axes;
// Assignment of points to the nearest tree axis, exact or approximated by sampling the axes.
pub mod assignment;
// Height of each tree after removing sparse outliers.
pub mod heights;
// The complete individualization pipeline and its parameters.
pub mod individualize;

//! Version ordering layer
//!
//! # Modules
//!
//! - [`semver`]: Lenient semantic version parsing and precedence comparison
//! - [`resolver`]: Classifies a candidate against the stored version
//! - [`sort`]: Stable newest-first insertion sort for release lists
//! - [`error`]: Error types for version ordering

pub mod error;
pub mod resolver;
pub mod semver;
pub mod sort;

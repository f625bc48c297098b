//! Small shared utilities.

pub mod json_path;

pub use json_path::{JsonPath, PathError};

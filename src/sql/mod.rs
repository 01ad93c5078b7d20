//! Safe SQL builder: identifiers quoted, paths and values as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;

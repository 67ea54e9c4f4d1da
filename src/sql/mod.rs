//! Safe SQL building: identifiers quoted, values as parameters.

mod builder;
mod filter;
pub mod params;

pub use builder::*;
pub use filter::apply_filter;
pub use params::BindValue;

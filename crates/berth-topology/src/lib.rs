pub mod generate;
pub mod names;
pub mod resources;

pub use generate::{generate, generate_ingresses, TopologyError, TopologyParams, WorkloadImages};
pub use resources::*;

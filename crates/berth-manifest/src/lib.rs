pub mod compile;
pub mod error;
pub mod spec;
pub mod wire;

pub use compile::compile;
pub use error::{ManifestError, ManifestResult};
pub use spec::*;
pub use wire::*;

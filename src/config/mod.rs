//! Configuration: the versioned YAML document and its sections.
pub mod logging;
pub mod store;
pub mod types;

pub use logging::*;
pub use store::*;
pub use types::*;

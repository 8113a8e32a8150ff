//! forge core library
//!
//! Resolves named build requests into a fully-specified job table and a set
//! of live build-worker driver handles. The pipeline: parse build-definition
//! files (with a legacy-schema fallback), apply CLI overrides, run the
//! platform compatibility shim, and concurrently assemble one driver per
//! configured node. Actual image construction is delegated to an external
//! build engine behind [`engine::submit`].

pub mod bake;
pub mod cancel;
pub mod compat;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod options;
pub mod platform;

// Re-export commonly used items
pub use bake::{read_targets, File, Target, TargetMap};
pub use cancel::Cancel;
pub use config::{Node, NodeGroup};
pub use driver::{drivers_for_node_group, Driver, DriverInfo, WorkerClient};
pub use error::{ForgeError, Result};
pub use options::{to_build_options, BuildOptions};
pub use platform::Platform;

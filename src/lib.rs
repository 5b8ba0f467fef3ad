// Clippy allows for reasonable defaults
#![allow(clippy::too_many_arguments)] // Provisioning and teardown take many plain params
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::unnecessary_map_or)] // map_or can be clearer than alternatives

// Module declarations
pub mod config;
pub mod error;
pub mod file_storage;
pub mod fleet;
pub mod git;
pub mod models;
pub mod shutdown;
mod utils;

// Server module (HTTP API)
pub mod server;

pub use error::{FleetError, FleetResult};
pub use fleet::RepositoryContext;
pub use models::*;

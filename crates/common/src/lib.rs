#![deny(missing_docs)]

//! Shared configuration, error types, and identifiers for quarry crates.
//!
//! Architecture role:
//! - defines engine/session configuration passed across layers
//! - provides the common [`QuarryError`] / [`Result`] contracts
//! - hosts the process-wide attribute id counter
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]

/// Shared engine/session configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;

pub use config::EngineConfig;
pub use error::{QuarryError, Result};
pub use ids::AttrId;

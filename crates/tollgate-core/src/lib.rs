//! tollgate core
//!
//! Domain types, the pipeline document format, error handling and the port
//! traits for the external collaborators (execution environments and
//! toolchain actions). Every other crate in the workspace speaks this
//! vocabulary.

pub mod error;
pub mod events;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod run;

pub use error::{Error, Result};
pub use ids::*;

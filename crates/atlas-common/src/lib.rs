//! # Atlas Common
//!
//! Shared types for the Atlas launcher and application crates:
//! - Application version information
//! - Packaged metadata (name, version, icon)
//! - Common error types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod metadata;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::metadata::*;
    pub use crate::version::*;
}

pub use prelude::*;

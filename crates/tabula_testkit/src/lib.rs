//! # Tabula Testkit
//!
//! Test utilities for Tabula.
//!
//! This crate provides:
//! - Versioned row fixtures (`Team`, `Person`) with full lock and
//!   two-phase-commit participation
//! - Pre-wired index fixtures for parent/child scenarios
//! - Property-based test generators using proptest
//! - Stress harnesses for lock contention and writer priority
//! - Cross-component integration scenarios driven through transaction scopes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tabula_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let directory = Directory::new();
//!     // ... drive scopes against directory.teams / directory.members
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

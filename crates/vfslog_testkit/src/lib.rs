//! # vfslog Testkit
//!
//! Test utilities for the vfslog compaction engine.
//!
//! This crate provides:
//! - In-memory implementations of the operation log and payload store
//! - Test fixtures that write realistic operation sequences
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vfslog_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_model() {
//!     with_model(|engine, model| {
//!         let file = engine.create_file(1);
//!         engine.compact_to_end(model);
//!         assert_eq!(model.file(file).unwrap().name_id, 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod memory;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::memory::*;
}

pub use fixtures::*;
pub use generators::*;
pub use memory::*;

//! # objdb Testkit
//!
//! Test utilities for objdb.
//!
//! This crate provides:
//! - A sample model and database fixtures
//! - Property-based test generators using proptest
//! - A harness checking the object graph against a tracked model
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_people_db(|db| {
//!         let ada = create_person(db, "Ada");
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;

//! # kvbridge Testkit
//!
//! Test utilities for kvbridge.
//!
//! This crate provides:
//! - Test fixtures: schemas and a database harness over the memory engine
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvbridge_testkit::prelude::*;
//!
//! #[test]
//! fn counts_notes() {
//!     let db = TestDatabase::memory(notes_config());
//!     let count = db.run(db.open_store("items", |items| items.count()));
//!     assert_eq!(count, Ok(0));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;

//! # entimap testkit
//!
//! Test utilities for entimap.
//!
//! This crate provides:
//! - A sample schema and repository fixtures for every locking mode
//! - Property-based test generators using proptest
//! - A fault-injecting store decorator
//! - Concurrent stress drivers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entimap_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_repository() {
//!     let repo = TestRepository::optimistic();
//!     let uow = repo.new_unit_of_work().unwrap();
//!     let ann = person(&uow, "Ann", 30);
//!     uow.submit().unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::init_tracing;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;

static TRACING: Once = Once::new();

/// Installs a test-friendly subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

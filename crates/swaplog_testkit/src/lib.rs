//! # SwapLog Testkit
//!
//! Test utilities for SwapLog.
//!
//! This crate provides:
//! - Router fixtures backed by memory or temporary files
//! - Self-describing record generators and proptest strategies
//! - Concurrent stress testing with flushed-output verification
//! - Test log output
//!
//! ## Usage
//!
//! ```rust
//! use swaplog_testkit::prelude::*;
//!
//! let router = TestRouter::memory(1, 1024);
//! assert!(router.write(&record(0, 0, 16)));
//! router.close().unwrap();
//!
//! let ids = parse_flushed(&router.flushed(0), router.buffer_capacity()).unwrap();
//! assert_eq!(ids, vec![RecordId { producer: 0, sequence: 0 }]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;

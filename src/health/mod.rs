//! Content hashing and artifact availability.
//!
//! # Overview
//!
//! This module provides:
//! - [`hash_file`]: streamed SHA-256 of a file
//! - [`build_index`] / [`build_library_index`]: digest -> path lookups
//! - [`AvailabilityChecker`]: finds completed items whose files are gone
//!   and repairs the cover cache
//! - [`requeue_missing`]: turns a report into items the next sync refetches
//!
//! # Example
//!
//! ```ignore
//! use syncy::health::{AvailabilityChecker, requeue_missing};
//!
//! let report = checker.run().await?;
//! if !report.is_clean() {
//!     requeue_missing(&store, &report)?;
//! }
//! ```

mod availability;
mod hash;
mod index;

pub use availability::{
    AvailabilityChecker, AvailabilityReport, FlaggedItem, IssueFlags, requeue_missing,
};
pub use hash::{hash_bytes, hash_file};
pub use index::{DigestIndex, LibraryIndex, build_index, build_library_index};

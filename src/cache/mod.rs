//! # Cache Module
//!
//! On-disk storage for transient files: uploaded audio waiting for the
//! engine, and the batch manifests handed to it.
//!
//! ## Key Components:
//! - **store**: area layout, collision-free writes, release, age-based sweep
//! - **manifest**: TSV work order shared with the inference engine
//! - **sweeper**: background task running the sweep on an interval

pub mod manifest;
pub mod store;
pub mod sweeper;

pub use store::{CacheLease, CacheStore};

//! # Guides
//!
//! - [`determinism`]: what replay requires of workflow code
//! - [`limits`]: payload, retry, and timing limits
//!
//! These modules contain documentation only.

pub mod determinism;
pub mod limits;

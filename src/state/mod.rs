//! Run state rebuilt on every invocation.
//!
//! Nothing here outlives an invocation: the history is parsed from the
//! continuation body, read during replay, and dropped with the context.
//! New entries are never appended in-process. A submitted step shows up
//! in the history delivered to the *next* invocation.
//!
//! ## Module Structure
//!
//! - `history` - The ordered, deduplicated step history, its lookups and
//!   the replay cursor

mod history;

pub use history::{ExecutionHistory, ReplayStatus};

#[cfg(test)]
mod tests;

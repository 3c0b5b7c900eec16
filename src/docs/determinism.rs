//! # Determinism
//!
//! Every invocation replays the workflow function from the top. Step
//! primitives are matched to the history by position and name, so the
//! sequence of primitives the function reaches must be the same on every
//! invocation, up to the last recorded step.
//!
//! A mismatch is reported as [`WorkflowError::NonDeterministic`] and the
//! run fails without retries: retrying cannot make diverging code agree
//! with its own history.
//!
//! ## Keep outside of steps deterministic
//!
//! Code between primitives runs on every invocation. Move anything that
//! can change between invocations into a `run` body, whose output is
//! recorded once and replayed afterwards:
//!
//! - current time (`chrono::Utc::now()`, `SystemTime::now()`)
//! - random values and generated ids
//! - environment variables that steer control flow
//! - reads from databases or other services
//! - `HashMap`/`HashSet` iteration order (use `BTreeMap`/`BTreeSet`)
//!
//! ## Step names
//!
//! Names must be unique within a parallel group. Renaming or reordering
//! steps of a deployed workflow breaks runs that are already in flight.
//!
//! ## Nesting
//!
//! Primitives cannot be called from inside a `run` body. The nested call
//! fails with [`WorkflowError::Validation`].
//!
//! [`WorkflowError::NonDeterministic`]: crate::WorkflowError::NonDeterministic
//! [`WorkflowError::Validation`]: crate::WorkflowError::Validation

//! # Limits
//!
//! | Limit | Value |
//! |-------|-------|
//! | Default retries per step | 3 |
//! | Steps submitted per invocation | 1 message, or 1 batch for a parallel group |
//! | Step history | grows with every step; it is delivered in each request body |
//! | Minimum sleep | 1 second |
//! | `wait_for_event` timeout | set per call; expiry resolves with `timeout: true` |
//!
//! The queue's own limits (message size, maximum delay, retention) apply
//! to every continuation. Large step outputs make every later request
//! larger, because the full history travels in the body.

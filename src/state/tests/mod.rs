//! Tests for the state module.


#[cfg(test)]
mod history_property_tests;

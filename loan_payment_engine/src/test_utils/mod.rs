//! Helpers for tests. Enabled with the `test_utils` feature.
pub mod fixtures;
pub mod prepare_env;

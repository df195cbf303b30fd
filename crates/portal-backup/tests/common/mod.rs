//! Shared test utilities for portal-backup integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring the engine over in-memory platform collaborators
//! - Builders for storage parameters and migration exports

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;

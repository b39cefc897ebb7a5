//! Test Helper Utilities
//!
//! Shared utilities for testing sel-ingest

#![allow(dead_code)]

pub mod db_utils;
pub mod fixtures;

pub use db_utils::{count_rows, create_file_state, create_test_state, create_test_state_with, test_config, BASE_URL};
pub use fixtures::{at, event_payload, future_day, source, virtual_event_payload};

//! # SEL Common Library
//!
//! Shared code for the SEL services:
//! - Error taxonomy
//! - Configuration loading
//! - Database initialization and migrations
//! - Linked-data wire format and canonical hashing

pub mod config;
pub mod db;
pub mod error;
pub mod linked_data;

pub use error::{Error, FieldError, Result};

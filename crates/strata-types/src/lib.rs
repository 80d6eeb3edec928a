//! Core types for the Strata layered user-memory store.
//!
//! This crate defines the records, parameters and errors shared by the
//! memory substrate and its callers. It contains no business logic.

pub mod config;
pub mod error;
pub mod memory;
pub mod params;
pub mod serde_compat;
pub mod source;

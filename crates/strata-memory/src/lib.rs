//! Layered user-memory store for Strata.
//!
//! Every memory is a base record (title, summary, details, tags, access
//! metrics) plus a detail row in one of four layers:
//! - **Context**: situations that aggregate one or more base records
//! - **Experience**: situation, action and the lesson learned
//! - **Identity**: people and facts about the user
//! - **Preference**: directives the user wants followed
//!
//! [`MemorySubstrate`] owns the SQLite connection; callers work through a
//! user-scoped [`UserMemoryStore`] obtained from [`MemorySubstrate::for_user`].

pub mod codec;
pub mod config;
pub mod migration;
pub mod normalize;

mod access;
mod create;
mod delete;
mod detail;
mod query;
mod rows;
mod search;
mod substrate;
mod tags;
mod update;

#[cfg(test)]
mod test_support;

pub use config::{load_config, try_load_config};
pub use substrate::{MemorySubstrate, UserMemoryStore};

//! Core pipeline — layout, operations, build, cache, resolution, walks.

pub mod builder;
pub mod cache;
pub mod error;
pub mod executor;
pub mod operation;
pub mod recipe;
pub mod record;
pub mod resolver;
pub mod types;
pub mod walk;

#[cfg(test)]
pub(crate) mod fixtures;

//! GridQuery Core - query execution for an in-memory data grid
//!
//! This crate provides:
//! - Predicate normalization and index-capability classification
//! - Plan selection over in-memory, indexed, hybrid and aggregating plans
//! - Bounded top-K pagination and multi-phase grouping/aggregation
//! - A shared compiled-query cache
//! - In-memory entity store and index search collaborators

pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod monitoring;
pub mod query;
pub mod schema;
pub mod search;
pub mod store;

pub use cache::*;
pub use config::*;
pub use document::*;
pub use engine::*;
pub use monitoring::*;
pub use query::*;
pub use schema::*;
pub use search::MemoryIndex;
pub use store::EntityStore;

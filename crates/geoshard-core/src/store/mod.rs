//! Relational store access.
//!
//! The store is abstracted behind the [`StoreBackend`] capability trait so
//! the pipeline never depends on a concrete driver. Two backends ship:
//!
//! - [`PostgresStore`] over a sqlx connection pool
//! - [`MemoryStore`] for tests and offline runs

mod backend;
mod memory;
mod postgres;

pub use backend::{OverlapRow, StoreBackend, SummaryRow, ViewRow};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

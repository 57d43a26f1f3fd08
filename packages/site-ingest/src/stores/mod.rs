//! Storage implementations.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage for tests and local runs
//! - `PostgresStore` - PostgreSQL storage used in production

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

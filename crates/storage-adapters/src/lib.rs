//! # storage-adapters
//!
//! Implementations of the persistence and blob-storage ports.
//!
//! - [`memory::MemoryStore`]: every repository behind one lock; used by tests
//!   and the `memory` backend.
//! - `postgres::PgStore` (feature `db-postgres`): sqlx over PostgreSQL.
//! - `local::LocalMediaStorage` (feature `media-local`): uploads on disk.

pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

#[cfg(feature = "media-local")]
pub mod local;

pub use memory::MemoryStore;

#[cfg(feature = "db-postgres")]
pub use postgres::PgStore;

#[cfg(feature = "media-local")]
pub use local::LocalMediaStorage;

//! # domains
//!
//! Entities, error taxonomy and port traits for the forum. Pure data and
//! contracts; no I/O lives here.

pub mod error;
pub mod models;
pub mod pagination;
pub mod ports;
pub mod realtime;

pub use error::*;
pub use models::*;
pub use pagination::*;
pub use ports::*;
pub use realtime::*;

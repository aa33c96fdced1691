//! # Domain Models
//!
//! These structs represent the core entities of the forum. Identifiers are
//! random UUIDs; entities reference each other by id only.

pub mod chat;
pub mod comment;
pub mod media;
pub mod notification;
pub mod post;
pub mod principal;
pub mod user;
pub mod vote;

pub use chat::*;
pub use comment::*;
pub use media::*;
pub use notification::*;
pub use post::*;
pub use principal::*;
pub use user::*;
pub use vote::*;

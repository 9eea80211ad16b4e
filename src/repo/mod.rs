//! Indexed entity repositories.
//!
//! One [`Repository`] per entity kind, configured by an [`EntityKind`] that
//! says how records map onto primary and index keys.

mod kind;
mod repository;

pub use kind::EntityKind;
pub use repository::{Committed, Repository};

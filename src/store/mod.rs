//! Target store module.
//!
//! Owns the ordered target sequence, enforces pin-group ordering, and
//! persists the list as a JSON file.

mod models;
mod targets;

pub use models::*;
pub use targets::*;

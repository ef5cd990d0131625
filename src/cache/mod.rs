//! Cache Module
//!
//! In-memory entity tables mirroring what the gateway has told us.
//! Everything here is best-effort client state, not a source of truth:
//! the server wins whenever they disagree.

pub mod entities;
pub mod store;

pub use entities::EntityCache;
pub use store::Store;

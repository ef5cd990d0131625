//! Shared Utilities
//!
//! Error taxonomy and snowflake identifiers used by both the gateway and
//! REST halves of the client.

pub mod error;
pub mod snowflake;

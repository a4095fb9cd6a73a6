//! PocketBase REST API contract types
//!
//! This crate defines the wire schema shared by the REST client, the
//! realtime multiplexer and any caller that builds request bodies from its
//! own domain types. Field names follow the backend's camelCase casing and
//! date/time values use the backend's `yyyy-MM-dd HH:mm:ss.fffZ` form.

pub mod datetime;
pub mod error;
pub mod record;
pub mod types;

pub use error::*;
pub use record::*;
pub use types::*;

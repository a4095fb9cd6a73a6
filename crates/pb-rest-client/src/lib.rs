//! Client for PocketBase-style record backends
//!
//! This crate provides the HTTP transport (URL building, auth and locale
//! headers, JSON or multipart bodies, typed decoding), batched record
//! mutations over `POST /api/batch`, and a realtime multiplexer that fans one
//! SSE connection out to many topic listeners. A blocking facade lives in
//! [`blocking`].

pub mod auth;
pub mod batch;
pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod multipart;
pub mod query;
pub mod realtime;
pub mod records;
pub mod request;
pub mod sse;

pub use auth::*;
pub use batch::*;
pub use client::*;
pub use config::*;
pub use error::*;
pub use hooks::*;
pub use query::QueryParams;
pub use realtime::*;
pub use records::*;
pub use request::*;
pub use sse::*;

pub use pb_api_contract as contract;

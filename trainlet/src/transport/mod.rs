//! Transport layer for trainlet.
//!
//! Currently provides HTTP transport via axum.

pub mod http;

pub use http::{ServerConfig, serve};

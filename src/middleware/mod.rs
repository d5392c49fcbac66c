//! Middleware components for HTTP request processing.
//!
//! - `guard`: refuses public clients while authentication is off
//! - `auth`: bearer session tokens for administrative endpoints
//! - `ip`: peer address extraction

pub mod auth;
pub mod guard;
pub mod ip;

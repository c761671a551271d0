//! HTTP request handlers.

pub mod auth;
pub mod devices;
pub mod sync;

//! HTTP client module
//!
//! Provides the client used to reach the execution engine's admin surface.

mod client;

pub use client::{HttpClient, HttpError, HttpRequest, HttpResponse};

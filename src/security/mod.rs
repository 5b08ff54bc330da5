//! Security middleware for the browser-facing surface.
//!
//! - [`CorsMiddleware`]: Cross-Origin Resource Sharing for the front end.

mod cors;

pub use cors::CorsMiddleware;

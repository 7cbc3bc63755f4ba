//! API module
//!
//! Thin HTTP surface over the transfer engine. Session, CSRF, and rate
//! limiting belong to the upstream request layer and are absent here; the
//! authenticated actor arrives as a header.

mod routes;

pub use routes::{create_router, AppState};

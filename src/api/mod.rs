//! HTTP surface of the engine.
//!
//! Thin JSON endpoints over the lifecycle managers. Identity arrives as an
//! opaque `x-user-id` header placed by the upstream session layer; this
//! module never sees authentication mechanics.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::ApiServer;

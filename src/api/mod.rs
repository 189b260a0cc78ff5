//! HTTP layer: the server is the product, not an optional add-on. All
//! submodules use axum/tower-http/jsonwebtoken/bcrypt.

pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{start_server, AppState};

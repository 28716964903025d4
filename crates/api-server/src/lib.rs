//! HTTP surface for the campaign delivery engine.

pub mod rest;
pub mod server;

pub use rest::AppState;
pub use server::ApiServer;

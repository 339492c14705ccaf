//! HTTP surface for Clyrdia.

pub mod caller;
pub mod error;
pub mod routes;
pub mod server;

pub use caller::Caller;
pub use error::ApiError;
pub use routes::{API_PREFIX, AppState, routes};
pub use server::{ServerError, build_app, maintain, serve};

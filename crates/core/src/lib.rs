#![allow(clippy::needless_return)]

pub mod app_state;
pub mod auth;
pub mod cache;
pub mod config;
pub mod crud;
pub mod dialect;
pub mod error;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod openapi;
pub mod rate_limit;
pub mod rbac;
pub mod router;
pub mod schema;
pub mod validator;

#[cfg(test)]
pub mod test_support;

pub use app_state::AppState;
pub use config::Config;
pub use error::{GatewayError, Result};
pub use model::Principal;
pub use router::build_router;

//! Campus Common Library
//!
//! Session and identity core of the campus portal:
//! - Backend client abstraction (hosted and in-memory)
//! - Session resolution with role strategies and demo identities
//! - Route table and route guard
//! - Directory and settings services
//! - Error types, configuration, retries and metrics

pub mod auth;
pub mod backend;
pub mod config;
pub mod demo;
pub mod directory;
pub mod errors;
pub mod guard;
pub mod metrics;
pub mod models;
pub mod resolver;
pub mod retry;
pub mod routes;
pub mod settings;
pub mod storage;

// Re-export commonly used types
pub use backend::Backend;
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use resolver::{Identity, IdentityHandle, SessionResolver};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

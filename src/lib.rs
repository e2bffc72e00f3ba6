//! Database console core.
//!
//! Connection pooling, query execution, schema introspection and query
//! history for a multi-user database administration tool, under per-project
//! access control. HTTP routing and user/project persistence live outside
//! this crate and reach it through [`DbConsole`] and [`Directory`].

pub mod auth;
pub mod config;
pub mod credentials;
pub mod db;
pub mod directory;
pub mod error;
pub mod models;
pub mod service;
pub mod store;
pub mod telemetry;

pub use auth::{Action, AuthorizationGate, RoleMatrix};
pub use config::Config;
pub use credentials::CredentialStore;
pub use directory::{Directory, InMemoryDirectory};
pub use error::{CoreError, CoreResult};
pub use service::{Caller, ConsoleSettings, DbConsole};
pub use store::AppStore;
pub use telemetry::init_tracing;

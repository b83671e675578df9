mod auth;
mod config;
mod database;
mod error;
mod forms;
mod models;
mod web;

pub use auth::{CurrentUser, Session, hash_password, verify_password};
pub use config::{Config, ConfigError};
pub use database::{Database, DatabaseError};
pub use error::AppError;
pub use web::{AppState, app, routes};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod messaging;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::{Config, ServiceRole};
pub use error::{AppError, AppResult};

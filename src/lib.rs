//! Library Management System
//!
//! REST JSON API for a small lending library: the book catalog, reader
//! accounts and the request/approve/return workflow that moves copies
//! between the shelf and readers.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

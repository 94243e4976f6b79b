//! Business logic services

pub mod auth;
pub mod catalog;
pub mod events;
pub mod stats;
pub mod users;
pub mod workflow;

use std::sync::Arc;

use crate::{config::AppConfig, error::AppResult, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub catalog: catalog::CatalogService,
    pub users: users::UsersService,
    pub workflow: workflow::WorkflowService,
    pub stats: stats::StatsService,
    pub events: events::EventBus,
}

impl Services {
    /// Create all services with the given repository
    pub async fn new(repository: Repository, config: &AppConfig) -> AppResult<Self> {
        let events = events::EventBus::from_config(&config.events).await?;
        let store = Arc::new(repository.clone());

        Ok(Self {
            auth: auth::AuthService::new(repository.clone(), config.auth.clone()),
            catalog: catalog::CatalogService::new(repository.clone()),
            users: users::UsersService::new(repository.clone()),
            workflow: workflow::WorkflowService::new(store, config.loans.clone(), events.clone()),
            stats: stats::StatsService::new(repository),
            events,
        })
    }
}

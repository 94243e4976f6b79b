//! User administration service

use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        transaction::TransactionDetails,
        user::{UpdateProfile, UpdateUser, UserQuery},
        Actor, User, UserShort,
    },
    repository::Repository,
};

/// How many transactions the user detail view carries
const RECENT_TRANSACTIONS: i64 = 10;

/// User with their latest transactions
#[derive(Debug, Serialize, ToSchema)]
pub struct UserDetails {
    #[serde(flatten)]
    pub user: User,
    pub recent_transactions: Vec<TransactionDetails>,
}

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
}

impl UsersService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn search_users(&self, actor: &Actor, query: &UserQuery) -> AppResult<(Vec<UserShort>, i64)> {
        actor.require_admin()?;
        self.repository.users.search(query).await
    }

    pub async fn get_user(&self, actor: &Actor, id: i32) -> AppResult<UserDetails> {
        actor.require_self_or_admin(id)?;

        let user = self.repository.users.get_by_id(id).await?;
        let recent_transactions = self
            .repository
            .transactions
            .recent_details(Some(id), RECENT_TRANSACTIONS)
            .await?;

        Ok(UserDetails { user, recent_transactions })
    }

    pub async fn update_user(&self, actor: &Actor, id: i32, update: &UpdateUser) -> AppResult<User> {
        actor.require_admin()?;
        let user = self.repository.users.update(id, update).await?;
        tracing::info!(user_id = id, updated_by = actor.id, "User updated");
        Ok(user)
    }

    pub async fn update_profile(&self, actor: &Actor, profile: &UpdateProfile) -> AppResult<User> {
        self.repository.users.update_profile(actor.id, profile).await
    }
}

//! User management endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        transaction::TransactionQuery,
        user::{UpdateUser, User, UserQuery, UserShort},
        Transaction,
    },
    services::users::UserDetails,
    AppState,
};

use super::{AuthenticatedUser, PaginatedResponse};

/// List users with search and pagination (admin only)
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    security(("bearer_auth" = [])),
    params(UserQuery),
    responses(
        (status = 200, description = "List of users", body = PaginatedResponse<UserShort>),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin privileges required")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<PaginatedResponse<UserShort>>> {
    let (users, total) = state.services.users.search_users(&claims.actor(), &query).await?;
    Ok(Json(PaginatedResponse::new(users, total, query.page, query.per_page)))
}

/// Get user details with their latest transactions
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User details", body = UserDetails),
        (status = 403, description = "Not your account"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<UserDetails>> {
    let user = state.services.users.get_user(&claims.actor(), id).await?;
    Ok(Json(user))
}

/// Update a user's profile fields or role (admin only)
#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Admin privileges required"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(user): Json<UpdateUser>,
) -> AppResult<Json<User>> {
    user.validate()?;

    let updated = state.services.users.update_user(&claims.actor(), id, &user).await?;
    Ok(Json(updated))
}

/// Deactivate a user (admin only)
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deactivated", body = User),
        (status = 400, description = "User still holds books"),
        (status = 403, description = "Admin privileges required"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<User>> {
    let user = state.services.workflow.deactivate_user(&claims.actor(), id).await?;
    Ok(Json(user))
}

/// Reactivate a user (admin only)
#[utoipa::path(
    post,
    path = "/users/{id}/activate",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User activated", body = User),
        (status = 403, description = "Admin privileges required"),
        (status = 404, description = "User not found")
    )
)]
pub async fn activate_user(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<User>> {
    let user = state.services.workflow.activate_user(&claims.actor(), id).await?;
    Ok(Json(user))
}

/// The caller's own transactions, newest first
#[utoipa::path(
    get,
    path = "/users/me/transactions",
    tag = "users",
    security(("bearer_auth" = [])),
    params(TransactionQuery),
    responses(
        (status = 200, description = "Own transactions", body = PaginatedResponse<Transaction>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn my_transactions(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(mut query): Query<TransactionQuery>,
) -> AppResult<Json<PaginatedResponse<Transaction>>> {
    query.user = Some(claims.user_id);

    let (transactions, total) = state.services.workflow.list(&claims.actor(), &query).await?;
    Ok(Json(PaginatedResponse::new(transactions, total, query.page, query.per_page)))
}

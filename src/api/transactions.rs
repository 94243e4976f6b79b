//! Borrow/return workflow endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        transaction::{CreateTransaction, ReconcileReport, RejectTransaction, TransactionQuery},
        Transaction,
    },
    AppState,
};

use super::{AuthenticatedUser, PaginatedResponse};

/// File an issue or return request
#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    security(("bearer_auth" = [])),
    request_body = CreateTransaction,
    responses(
        (status = 201, description = "Request filed", body = Transaction),
        (status = 400, description = "Deactivated account, loan limit, duplicate request or book not held"),
        (status = 404, description = "Book or user not found"),
        (status = 409, description = "No copies available")
    )
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateTransaction>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    request.validate()?;

    let transaction = state.services.workflow.request(&claims.actor(), &request).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Approve a pending request (admin only)
#[utoipa::path(
    post,
    path = "/transactions/{id}/approve",
    tag = "transactions",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Request approved", body = Transaction),
        (status = 400, description = "Not pending, or a lending rule forbids it"),
        (status = 403, description = "Admin privileges required"),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "The last copy was issued to someone else")
    )
)]
pub async fn approve_transaction(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Transaction>> {
    let transaction = state.services.workflow.approve(&claims.actor(), id).await?;
    Ok(Json(transaction))
}

/// Reject a pending request (admin only)
#[utoipa::path(
    post,
    path = "/transactions/{id}/reject",
    tag = "transactions",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Transaction ID")),
    request_body(content = RejectTransaction, description = "Optional rejection notes"),
    responses(
        (status = 200, description = "Request rejected", body = Transaction),
        (status = 400, description = "Not pending"),
        (status = 403, description = "Admin privileges required"),
        (status = 404, description = "Transaction not found")
    )
)]
pub async fn reject_transaction(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    body: Option<Json<RejectTransaction>>,
) -> AppResult<Json<Transaction>> {
    let Json(body) = body.unwrap_or_default();
    body.validate()?;

    let transaction = state.services.workflow.reject(&claims.actor(), id, body.notes).await?;
    Ok(Json(transaction))
}

/// Return a borrowed book (holder or admin)
#[utoipa::path(
    post,
    path = "/transactions/{id}/return",
    tag = "transactions",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Issue transaction ID")),
    responses(
        (status = 200, description = "Book returned", body = Transaction),
        (status = 400, description = "Not an outstanding loan"),
        (status = 403, description = "Not your loan"),
        (status = 404, description = "Transaction not found")
    )
)]
pub async fn return_transaction(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Transaction>> {
    let transaction = state.services.workflow.return_book(&claims.actor(), id).await?;
    Ok(Json(transaction))
}

/// List transactions, newest first. Non-admins only see their own.
#[utoipa::path(
    get,
    path = "/transactions",
    tag = "transactions",
    security(("bearer_auth" = [])),
    params(TransactionQuery),
    responses(
        (status = 200, description = "Transactions", body = PaginatedResponse<Transaction>),
        (status = 403, description = "Filtering on another user")
    )
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<TransactionQuery>,
) -> AppResult<Json<PaginatedResponse<Transaction>>> {
    let (transactions, total) = state.services.workflow.list(&claims.actor(), &query).await?;
    Ok(Json(PaginatedResponse::new(transactions, total, query.page, query.per_page)))
}

#[utoipa::path(
    get,
    path = "/transactions/{id}",
    tag = "transactions",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction", body = Transaction),
        (status = 403, description = "Not your transaction"),
        (status = 404, description = "Transaction not found")
    )
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Transaction>> {
    let transaction = state.services.workflow.get(&claims.actor(), id).await?;
    Ok(Json(transaction))
}

/// Rebuild issued-book lists and book counters from the ledger (admin only)
#[utoipa::path(
    post,
    path = "/admin/reconcile",
    tag = "transactions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reconciliation report", body = ReconcileReport),
        (status = 403, description = "Admin privileges required")
    )
)]
pub async fn reconcile(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ReconcileReport>> {
    let report = state.services.workflow.reconcile(&claims.actor()).await?;
    Ok(Json(report))
}

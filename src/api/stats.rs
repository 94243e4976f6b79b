//! Dashboard statistics endpoint

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{error::AppResult, models::transaction::TransactionDetails, AppState};

use super::AuthenticatedUser;

/// Admin dashboard figures
#[derive(Serialize, ToSchema)]
pub struct DashboardStats {
    /// Active accounts
    pub total_users: i64,
    pub books: BookStats,
    pub transactions: TransactionStats,
    /// Five most recent transactions
    pub recent_transactions: Vec<TransactionDetails>,
}

/// Totals over active books
#[derive(Serialize, ToSchema)]
pub struct BookStats {
    pub titles: i64,
    pub total_copies: i64,
    pub available_copies: i64,
}

#[derive(Serialize, ToSchema)]
pub struct TransactionStats {
    pub total: i64,
    pub pending_requests: i64,
    /// Approved issues not yet returned
    pub active_issues: i64,
    /// Active issues past their due date
    pub overdue: i64,
}

/// Get dashboard statistics (admin only)
#[utoipa::path(
    get,
    path = "/stats",
    tag = "stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Dashboard statistics", body = DashboardStats),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin privileges required")
    )
)]
pub async fn get_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<DashboardStats>> {
    claims.actor().require_admin()?;

    let stats = state.services.stats.dashboard().await?;
    Ok(Json(stats))
}

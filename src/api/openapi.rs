//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, books, events, health, stats, transactions, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Library API",
        version = "1.0.0",
        description = "Library management REST API: catalog, accounts and the borrow/return workflow"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::register,
        auth::login,
        auth::me,
        auth::update_profile,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Users
        users::list_users,
        users::get_user,
        users::update_user,
        users::delete_user,
        users::activate_user,
        users::my_transactions,
        // Transactions
        transactions::create_transaction,
        transactions::approve_transaction,
        transactions::reject_transaction,
        transactions::return_transaction,
        transactions::list_transactions,
        transactions::get_transaction,
        transactions::reconcile,
        // Stats
        stats::get_stats,
        // Events
        events::stream_events,
    ),
    components(
        schemas(
            // Auth
            auth::LoginRequest,
            auth::AuthResponse,
            // Books
            crate::models::book::Book,
            crate::models::book::BookShort,
            crate::models::book::Location,
            crate::models::book::Availability,
            crate::models::book::BookQuery,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Users
            crate::models::user::User,
            crate::models::user::UserShort,
            crate::models::user::IssuedBook,
            crate::models::user::Role,
            crate::models::user::UserStatus,
            crate::models::user::UserQuery,
            crate::models::user::CreateUser,
            crate::models::user::UpdateUser,
            crate::models::user::UpdateProfile,
            crate::services::users::UserDetails,
            // Transactions
            crate::models::transaction::Transaction,
            crate::models::transaction::TransactionKind,
            crate::models::transaction::TransactionStatus,
            crate::models::transaction::TransactionDetails,
            crate::models::transaction::CreateTransaction,
            crate::models::transaction::RejectTransaction,
            crate::models::transaction::TransactionQuery,
            crate::models::transaction::ReconcileReport,
            // Stats
            stats::DashboardStats,
            stats::BookStats,
            stats::TransactionStats,
            // Events
            crate::services::events::DomainEvent,
            crate::services::events::EventKind,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Authentication endpoints"),
        (name = "books", description = "Catalog management"),
        (name = "users", description = "User management"),
        (name = "transactions", description = "Borrow/return workflow"),
        (name = "stats", description = "Dashboard statistics"),
        (name = "events", description = "Live workflow events")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

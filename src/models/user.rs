//! User model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::text_enum;
use crate::error::{AppError, AppResult};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

text_enum!(Role { Admin => "admin", User => "user" });

/// Account lifecycle. Accounts are never removed so that the transaction
/// ledger keeps valid references; they are deactivated instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Deactivated,
}

text_enum!(UserStatus { Active => "active", Deactivated => "deactivated" });

/// A book currently held by a user (projection of approved, unreturned
/// issue transactions)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct IssuedBook {
    pub book_id: i32,
    pub transaction_id: i32,
    pub issued_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

/// Full user model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    /// Hashed password (argon2)
    #[serde(skip_serializing, default)]
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    /// Ordered by issue date
    #[sqlx(skip)]
    pub issued_books: Vec<IssuedBook>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn ensure_active(&self) -> AppResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(AppError::PolicyViolation(format!(
                "Account {} is deactivated",
                self.username
            )))
        }
    }

    /// The loan entry for `book_id`, if the user currently holds it
    pub fn held_copy(&self, book_id: i32) -> Option<&IssuedBook> {
        self.issued_books.iter().find(|b| b.book_id == book_id)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: self.role,
        }
    }
}

/// Refuse a new loan once `held` reaches the configured maximum
pub fn check_loan_limit(held: i64, max_books: i64) -> AppResult<()> {
    if held >= max_books {
        Err(AppError::PolicyViolation(format!(
            "Maximum books held reached ({}/{})",
            held, max_books
        )))
    } else {
        Ok(())
    }
}

/// The authenticated caller of a service operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i32,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Require admin privileges
    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Administrator privileges required".to_string()))
        }
    }

    /// Allow the owner of a resource or an admin
    pub fn require_self_or_admin(&self, owner_id: i32) -> AppResult<()> {
        if self.id == owner_id || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Not allowed to access another user's records".to_string()))
        }
    }
}

/// Short user representation for lists
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserShort {
    pub id: i32,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
}

impl From<&User> for UserShort {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            role: user.role,
            status: user.status,
        }
    }
}

/// User query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct UserQuery {
    /// Matches first name, last name, username or email
    pub search: Option<String>,
    pub status: Option<UserStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Account registration request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUser {
    #[validate(length(min = 3, max = 50, message = "Username must be 3 to 50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

/// Update user request (admin only)
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateUser {
    #[validate(length(min = 1))]
    pub first_name: Option<String>,
    #[validate(length(min = 1))]
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

/// Update own profile request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateProfile {
    #[validate(length(min = 1))]
    pub first_name: Option<String>,
    #[validate(length(min = 1))]
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

/// JWT Claims for authenticated users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub user_id: i32,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl UserClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            id: self.user_id,
            role: self.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_text() {
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(UserStatus::Deactivated.to_string(), "deactivated");
        assert!("librarian".parse::<Role>().is_err());
    }

    #[test]
    fn test_only_admins_pass_admin_guard() {
        let admin = Actor { id: 1, role: Role::Admin };
        let reader = Actor { id: 2, role: Role::User };

        assert!(admin.require_admin().is_ok());
        assert!(matches!(reader.require_admin(), Err(AppError::Forbidden(_))));
        assert!(reader.require_self_or_admin(2).is_ok());
        assert!(reader.require_self_or_admin(3).is_err());
        assert!(admin.require_self_or_admin(3).is_ok());
    }

    #[test]
    fn test_loan_limit() {
        assert!(check_loan_limit(4, 5).is_ok());
        assert!(matches!(check_loan_limit(5, 5), Err(AppError::PolicyViolation(_))));
    }

    #[test]
    fn test_claims_token_round_trip() {
        let claims = UserClaims {
            sub: "reader".to_string(),
            user_id: 7,
            role: Role::User,
            exp: chrono::Utc::now().timestamp() + 60,
            iat: chrono::Utc::now().timestamp(),
        };
        let token = claims.create_token("secret").unwrap();
        let parsed = UserClaims::from_token(&token, "secret").unwrap();
        assert_eq!(parsed.actor(), Actor { id: 7, role: Role::User });
        assert!(UserClaims::from_token(&token, "other").is_err());
    }
}

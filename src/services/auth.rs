//! Registration, login and JWT issuance

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::{
        user::{CreateUser, UserClaims},
        Role, User,
    },
    repository::Repository,
};

/// Hash a password with Argon2id and a random salt
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Create a regular account and sign it in
    pub async fn register(&self, request: &CreateUser) -> AppResult<(String, User)> {
        let hash = hash_password(&request.password)?;
        let user = self.repository.users.create(request, &hash, Role::User).await?;
        tracing::info!(user_id = user.id, username = %user.username, "User registered");

        let token = self.create_token(&user)?;
        Ok((token, user))
    }

    /// Authenticate by username or email
    pub async fn login(&self, login: &str, password: &str) -> AppResult<(String, User)> {
        let user = self
            .repository
            .users
            .get_by_login(login.trim())
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid login or password".to_string()))?;

        if !verify_password(&user.password, password)? {
            tracing::debug!(user_id = user.id, "Rejected login with wrong password");
            return Err(AppError::Authentication("Invalid login or password".to_string()));
        }
        if !user.is_active() {
            return Err(AppError::Authentication("Account is deactivated".to_string()));
        }

        let user = self.repository.users.get_by_id(user.id).await?;
        let token = self.create_token(&user)?;
        tracing::info!(user_id = user.id, "User logged in");

        Ok((token, user))
    }

    /// The caller's account with the books they hold
    pub async fn me(&self, user_id: i32) -> AppResult<User> {
        self.repository.users.get_by_id(user_id).await
    }

    fn create_token(&self, user: &User) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let claims = UserClaims {
            sub: user.username.clone(),
            user_id: user.id,
            role: user.role,
            exp: now + (self.config.jwt_expiration_hours as i64 * 3600),
            iat: now,
        };

        claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_verifies() {
        let hash = hash_password("reader123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "reader123").unwrap());
        assert!(!verify_password(&hash, "reader124").unwrap());
    }

    #[test]
    fn test_garbage_hash_is_internal_error() {
        assert!(matches!(verify_password("plaintext", "x"), Err(AppError::Internal(_))));
    }
}

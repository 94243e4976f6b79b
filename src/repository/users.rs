//! Users repository for database operations

use chrono::Utc;
use sqlx::{Pool, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    models::{
        user::{CreateUser, IssuedBook, Role, UpdateProfile, UpdateUser, User, UserQuery, UserShort, UserStatus},
        PageWindow,
    },
};

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get user by ID, with the books they currently hold
    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        let mut user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;

        user.issued_books = self.issued_books(id).await?;

        Ok(user)
    }

    /// Get user by username or email (authentication)
    pub async fn get_by_login(&self, login: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE LOWER(username) = LOWER($1) OR LOWER(email) = LOWER($1)",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Books currently held by a user, oldest loan first
    pub async fn issued_books(&self, user_id: i32) -> AppResult<Vec<IssuedBook>> {
        let books = sqlx::query_as::<_, IssuedBook>(
            r#"
            SELECT book_id, transaction_id, issued_at, due_date
            FROM user_issued_books
            WHERE user_id = $1
            ORDER BY issued_at, transaction_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    /// Search users with pagination
    pub async fn search(&self, query: &UserQuery) -> AppResult<(Vec<UserShort>, i64)> {
        let window = PageWindow::new(query.page, query.per_page);

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE TRUE");
        push_user_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT id, username, first_name, last_name, email, role, status FROM users WHERE TRUE",
        );
        push_user_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(window.per_page)
            .push(" OFFSET ")
            .push_bind(window.offset());

        let users = select.build_query_as::<UserShort>().fetch_all(&self.pool).await?;

        Ok((users, total))
    }

    /// Create a new user with an already hashed password
    pub async fn create(&self, user: &CreateUser, password_hash: &str, role: Role) -> AppResult<User> {
        let now = Utc::now();

        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                username, email, password, first_name, last_name,
                phone_number, address, role, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *
            "#,
        )
        .bind(user.username.trim())
        .bind(user.email.trim().to_lowercase())
        .bind(password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(&user.address)
        .bind(role)
        .bind(UserStatus::Active)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("Username or email already registered".to_string())
            }
            other => other.into(),
        })
    }

    /// Update a user (admin)
    pub async fn update(&self, id: i32, user: &UpdateUser) -> AppResult<User> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                role = COALESCE($4, role),
                phone_number = COALESCE($5, phone_number),
                address = COALESCE($6, address),
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role)
        .bind(&user.phone_number)
        .bind(&user.address)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User with id {} not found", id)));
        }

        self.get_by_id(id).await
    }

    /// Update user's own profile
    pub async fn update_profile(&self, id: i32, profile: &UpdateProfile) -> AppResult<User> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                phone_number = COALESCE($4, phone_number),
                address = COALESCE($5, address),
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.phone_number)
        .bind(&profile.address)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User with id {} not found", id)));
        }

        self.get_by_id(id).await
    }

    /// Activate or deactivate a user (soft delete).
    ///
    /// The user row is locked for the duration of the check so that an
    /// approval cannot hand out a book between counting outstanding loans
    /// and flipping the status.
    pub async fn set_status(&self, id: i32, status: UserStatus) -> AppResult<User> {
        let mut db = self.pool.begin().await?;

        let current: UserStatus = sqlx::query_scalar("SELECT status FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;

        if current != status {
            if status == UserStatus::Deactivated {
                let active_loans: i64 = sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM transactions
                    WHERE user_id = $1 AND kind = 'issue' AND status = 'approved' AND returned_at IS NULL
                    "#,
                )
                .bind(id)
                .fetch_one(&mut *db)
                .await?;

                if active_loans > 0 {
                    return Err(AppError::PolicyViolation(format!(
                        "Cannot deactivate user with {} active book issues. Please return all books first.",
                        active_loans
                    )));
                }
            }

            sqlx::query("UPDATE users SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(status)
                .bind(Utc::now())
                .execute(&mut *db)
                .await?;
        }

        db.commit().await?;

        self.get_by_id(id).await
    }

    /// Count active users
    pub async fn count_active(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn list_all(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &UserQuery) {
    if let Some(pattern) = query.search.as_deref().and_then(search_pattern) {
        builder
            .push(" AND (LOWER(first_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(last_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(username) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(email) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status);
    }
}

/// LIKE pattern matched against `LOWER(column)`. Accents are kept: the
/// name columns store them as typed.
fn search_pattern(search: &str) -> Option<String> {
    let term = search.trim().to_lowercase();
    if term.is_empty() {
        None
    } else {
        Some(format!("%{}%", term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern_keeps_accents() {
        assert_eq!(search_pattern("  José ").as_deref(), Some("%josé%"));
        assert_eq!(search_pattern("GARCÍA").as_deref(), Some("%garcía%"));
        assert_eq!(search_pattern("   "), None);
    }
}

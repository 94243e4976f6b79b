//! Transactions repository: the ledger and its atomic workflow commits
//!
//! Each `commit_*` runs in one database transaction. Rows are locked in the
//! order transaction -> user -> book -> issued-books projection, and
//! `reconcile` locks `books` before `user_issued_books`, so concurrent
//! commits queue up instead of deadlocking. Returning early with `?` drops
//! the open transaction, which rolls it back.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres, QueryBuilder, Row};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::BookShort,
        transaction::{NewTransaction, ReconcileReport, TransactionDetails, TransactionQuery},
        user::{check_loan_limit, UserShort},
        Transaction, TransactionKind, UserStatus,
    },
};

use super::{IssueCommit, RejectionCommit, ReturnCommit};

/// Dashboard counters derived from the ledger
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerCounts {
    pub total: i64,
    pub pending: i64,
    pub active_issues: i64,
    pub overdue: i64,
}

#[derive(FromRow)]
struct TransactionDetailsRow {
    #[sqlx(flatten)]
    transaction: Transaction,
    book_title: String,
    book_author: String,
    book_cover_image: Option<String>,
    user_username: String,
    user_first_name: String,
    user_last_name: String,
    user_email: String,
    user_role: crate::models::Role,
    user_status: UserStatus,
}

impl From<TransactionDetailsRow> for TransactionDetails {
    fn from(row: TransactionDetailsRow) -> Self {
        TransactionDetails {
            book: BookShort {
                id: row.transaction.book_id,
                title: row.book_title,
                author: row.book_author,
                cover_image: row.book_cover_image,
            },
            user: UserShort {
                id: row.transaction.user_id,
                username: row.user_username,
                first_name: row.user_first_name,
                last_name: row.user_last_name,
                email: row.user_email,
                role: row.user_role,
                status: row.user_status,
            },
            transaction: row.transaction,
        }
    }
}

const DETAILS_SELECT: &str = r#"
    SELECT t.*,
           b.title AS book_title, b.author AS book_author, b.cover_image AS book_cover_image,
           u.username AS user_username, u.first_name AS user_first_name,
           u.last_name AS user_last_name, u.email AS user_email,
           u.role AS user_role, u.status AS user_status
    FROM transactions t
    JOIN books b ON b.id = t.book_id
    JOIN users u ON u.id = t.user_id
"#;

#[derive(Clone)]
pub struct TransactionsRepository {
    pool: Pool<Postgres>,
}

impl TransactionsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get transaction by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Transaction> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction with id {} not found", id)))
    }

    pub async fn find_pending(
        &self,
        user_id: i32,
        book_id: i32,
        kind: TransactionKind,
    ) -> AppResult<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE user_id = $1 AND book_id = $2 AND kind = $3 AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    /// Record a new pending request. At most one pending request per
    /// (user, book, kind) is enforced by a partial unique index.
    pub async fn create(&self, new: &NewTransaction) -> AppResult<Transaction> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (user_id, book_id, kind, status, issue_transaction_id, notes, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(new.user_id)
        .bind(new.book_id)
        .bind(new.kind)
        .bind(new.issue_transaction_id)
        .bind(&new.notes)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::PolicyViolation(format!(
                "A {} request for this book is already pending",
                new.kind
            )),
            other => other.into(),
        })?;

        Ok(transaction)
    }

    /// pending -> approved for an issue request, moving one copy out
    pub async fn commit_issue(&self, commit: &IssueCommit) -> AppResult<Transaction> {
        let mut db = self.pool.begin().await?;

        let mut transaction = lock_transaction(&mut db, commit.transaction_id).await?;
        transaction.approve_issue(commit.approved_by, commit.issued_at, commit.due_date)?;

        let status = lock_user(&mut db, transaction.user_id).await?;
        if status != UserStatus::Active {
            return Err(AppError::PolicyViolation(format!(
                "User {} is deactivated",
                transaction.user_id
            )));
        }

        let held: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_issued_books WHERE user_id = $1")
            .bind(transaction.user_id)
            .fetch_one(&mut *db)
            .await?;
        check_loan_limit(held, commit.max_books_per_user)?;

        // Decrement-if-positive: the availability check and the update are
        // one statement, so two approvals cannot both take the last copy.
        let taken = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = available_copies - 1,
                issued_copies = issued_copies + 1,
                updated_at = $2
            WHERE id = $1 AND is_active = TRUE AND available_copies > 0
            "#,
        )
        .bind(transaction.book_id)
        .bind(commit.issued_at)
        .execute(&mut *db)
        .await?;

        if taken.rows_affected() == 0 {
            return Err(AppError::RaceLost(format!(
                "No copies of book {} remain available",
                transaction.book_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO user_issued_books (transaction_id, user_id, book_id, issued_at, due_date)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.book_id)
        .bind(commit.issued_at)
        .bind(commit.due_date)
        .execute(&mut *db)
        .await?;

        let approved = write_status(&mut db, &transaction).await?;

        db.commit().await?;

        Ok(approved)
    }

    /// approved -> returned, moving one copy back and closing any pending
    /// return request for the loan
    pub async fn commit_return(&self, commit: &ReturnCommit) -> AppResult<Transaction> {
        let mut db = self.pool.begin().await?;

        let mut transaction = lock_transaction(&mut db, commit.issue_transaction_id).await?;
        transaction.mark_returned(commit.returned_at)?;

        lock_user(&mut db, transaction.user_id).await?;

        // books before user_issued_books, the same table order as
        // commit_issue and the reconcile table lock
        let restored = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = available_copies + 1,
                issued_copies = issued_copies - 1,
                updated_at = $2
            WHERE id = $1 AND issued_copies > 0
            "#,
        )
        .bind(transaction.book_id)
        .bind(commit.returned_at)
        .execute(&mut *db)
        .await?;
        if restored.rows_affected() == 0 {
            return Err(AppError::Internal(format!(
                "Availability counters of book {} are out of sync",
                transaction.book_id
            )));
        }

        let removed = sqlx::query("DELETE FROM user_issued_books WHERE transaction_id = $1")
            .bind(transaction.id)
            .execute(&mut *db)
            .await?;
        if removed.rows_affected() == 0 {
            // The ledger is authoritative; a missing projection row is repaired by reconcile
            tracing::warn!(transaction_id = transaction.id, "Loan missing from issued books projection");
        }

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'approved', returned_at = $2, approved_by = $3, updated_at = $2
            WHERE issue_transaction_id = $1 AND kind = 'return' AND status = 'pending'
            "#,
        )
        .bind(transaction.id)
        .bind(commit.returned_at)
        .bind(commit.resolved_by)
        .execute(&mut *db)
        .await?;

        let returned = write_status(&mut db, &transaction).await?;

        db.commit().await?;

        Ok(returned)
    }

    /// pending -> rejected; touches nothing but the transaction row
    pub async fn commit_rejection(&self, commit: &RejectionCommit) -> AppResult<Transaction> {
        let mut db = self.pool.begin().await?;

        let mut transaction = lock_transaction(&mut db, commit.transaction_id).await?;
        transaction.reject(commit.rejected_by, commit.rejected_at, commit.notes.as_deref())?;

        let rejected = write_status(&mut db, &transaction).await?;

        db.commit().await?;

        Ok(rejected)
    }

    /// List transactions newest first
    pub async fn list(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions WHERE TRUE");
        push_transaction_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM transactions WHERE TRUE");
        push_transaction_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(query.per_page())
            .push(" OFFSET ")
            .push_bind(query.offset());

        let transactions = select.build_query_as::<Transaction>().fetch_all(&self.pool).await?;

        Ok((transactions, total))
    }

    /// Most recent transactions with their book and user, optionally for one user
    pub async fn recent_details(&self, user_id: Option<i32>, limit: i64) -> AppResult<Vec<TransactionDetails>> {
        let mut select = QueryBuilder::<Postgres>::new(DETAILS_SELECT);
        if let Some(user_id) = user_id {
            select.push(" WHERE t.user_id = ").push_bind(user_id);
        }
        select
            .push(" ORDER BY t.created_at DESC, t.id DESC LIMIT ")
            .push_bind(limit);

        let rows = select
            .build_query_as::<TransactionDetailsRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(TransactionDetails::from).collect())
    }

    pub async fn counts(&self, now: DateTime<Utc>) -> AppResult<LedgerCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                   COUNT(*) FILTER (WHERE kind = 'issue' AND status = 'approved' AND returned_at IS NULL) AS active_issues,
                   COUNT(*) FILTER (WHERE kind = 'issue' AND status = 'approved' AND returned_at IS NULL
                                    AND due_date < $1) AS overdue
            FROM transactions
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerCounts {
            total: row.get("total"),
            pending: row.get("pending"),
            active_issues: row.get("active_issues"),
            overdue: row.get("overdue"),
        })
    }

    /// Rebuild the issued-books projection and book counters from the ledger
    pub async fn reconcile(&self) -> AppResult<ReconcileReport> {
        let mut db = self.pool.begin().await?;

        // Block approvals and returns while the projections are rebuilt
        sqlx::query("LOCK TABLE books, user_issued_books IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *db)
            .await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM user_issued_books p
            WHERE NOT EXISTS (
                SELECT 1 FROM transactions t
                WHERE t.id = p.transaction_id
                  AND t.kind = 'issue' AND t.status = 'approved' AND t.returned_at IS NULL
            )
            "#,
        )
        .execute(&mut *db)
        .await?
        .rows_affected();

        let projected = sqlx::query(
            r#"
            INSERT INTO user_issued_books (transaction_id, user_id, book_id, issued_at, due_date)
            SELECT t.id, t.user_id, t.book_id, COALESCE(t.issued_at, t.created_at), COALESCE(t.due_date, t.created_at)
            FROM transactions t
            WHERE t.kind = 'issue' AND t.status = 'approved' AND t.returned_at IS NULL
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .execute(&mut *db)
        .await?
        .rows_affected();

        let repaired = sqlx::query(
            r#"
            WITH loans AS (
                SELECT b.id,
                       (SELECT COUNT(*)::INT FROM transactions t
                        WHERE t.book_id = b.id AND t.kind = 'issue'
                          AND t.status = 'approved' AND t.returned_at IS NULL) AS issued
                FROM books b
            )
            UPDATE books b
            SET total_copies = GREATEST(b.total_copies, loans.issued),
                issued_copies = loans.issued,
                available_copies = GREATEST(b.total_copies, loans.issued) - loans.issued,
                updated_at = $1
            FROM loans
            WHERE b.id = loans.id
              AND (b.issued_copies <> loans.issued OR b.total_copies < loans.issued)
            "#,
        )
        .bind(Utc::now())
        .execute(&mut *db)
        .await?
        .rows_affected();

        let checked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&mut *db)
            .await?;

        db.commit().await?;

        Ok(ReconcileReport {
            books_checked: checked,
            books_repaired: repaired as i64,
            loans_projected: projected as i64,
            projection_entries_removed: removed as i64,
        })
    }
}

async fn lock_transaction(
    db: &mut sqlx::Transaction<'_, Postgres>,
    id: i32,
) -> AppResult<Transaction> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction with id {} not found", id)))
}

/// Lock the borrower's row so deactivation waits for the commit
async fn lock_user(db: &mut sqlx::Transaction<'_, Postgres>, id: i32) -> AppResult<UserStatus> {
    let status = sqlx::query_scalar("SELECT status FROM users WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_one(&mut **db)
        .await?;
    Ok(status)
}

/// Persist the mutable fields of a transaction after a state change
async fn write_status(
    db: &mut sqlx::Transaction<'_, Postgres>,
    transaction: &Transaction,
) -> AppResult<Transaction> {
    let updated = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $2, notes = $3, issued_at = $4, due_date = $5, returned_at = $6,
            approved_by = $7, rejected_by = $8, rejected_at = $9, updated_at = $10
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.status)
    .bind(&transaction.notes)
    .bind(transaction.issued_at)
    .bind(transaction.due_date)
    .bind(transaction.returned_at)
    .bind(transaction.approved_by)
    .bind(transaction.rejected_by)
    .bind(transaction.rejected_at)
    .bind(transaction.updated_at)
    .fetch_one(&mut **db)
    .await?;

    Ok(updated)
}

fn push_transaction_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &TransactionQuery) {
    if let Some(user_id) = query.user {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(book_id) = query.book {
        builder.push(" AND book_id = ").push_bind(book_id);
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if let Some(kind) = query.kind {
        builder.push(" AND kind = ").push_bind(kind);
    }
}


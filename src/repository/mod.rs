//! Repository layer for database operations

pub mod books;
pub mod memory;
pub mod transactions;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        transaction::{NewTransaction, ReconcileReport, TransactionQuery},
        Book, Transaction, TransactionKind, User, UserStatus,
    },
};

pub use memory::MemoryStore;

/// Approval of a pending issue request
#[derive(Debug, Clone, PartialEq)]
pub struct IssueCommit {
    pub transaction_id: i32,
    pub approved_by: i32,
    pub issued_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub max_books_per_user: i64,
}

/// Closing of an active loan. Pending return requests filed for the loan
/// are approved in the same step.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnCommit {
    pub issue_transaction_id: i32,
    pub resolved_by: i32,
    pub returned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectionCommit {
    pub transaction_id: i32,
    pub rejected_by: i32,
    pub rejected_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Persistence required by the transaction workflow.
///
/// Every `commit_*` method and `set_user_status` is atomic: the transaction
/// row, the book counters and the user's issued-book projection are all
/// written or none are. Implementations re-check the guarded conditions
/// (copies left, loan limit, pending status, outstanding loans) inside that
/// atomic step instead of trusting what the caller read earlier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_book(&self, id: i32) -> AppResult<Book>;

    /// User with `issued_books` loaded
    async fn get_user(&self, id: i32) -> AppResult<User>;

    async fn get_transaction(&self, id: i32) -> AppResult<Transaction>;

    async fn find_pending(
        &self,
        user_id: i32,
        book_id: i32,
        kind: TransactionKind,
    ) -> AppResult<Option<Transaction>>;

    async fn insert_transaction(&self, new: &NewTransaction) -> AppResult<Transaction>;

    /// Returns the approved issue transaction
    async fn commit_issue(&self, commit: &IssueCommit) -> AppResult<Transaction>;

    /// Returns the closed issue transaction
    async fn commit_return(&self, commit: &ReturnCommit) -> AppResult<Transaction>;

    async fn commit_rejection(&self, commit: &RejectionCommit) -> AppResult<Transaction>;

    /// Newest first, with the total count before pagination
    async fn list_transactions(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)>;

    /// Deactivation fails while the user has an outstanding loan
    async fn set_user_status(&self, user_id: i32, status: UserStatus) -> AppResult<User>;

    /// Rebuild book counters and issued-book projections from the ledger
    async fn reconcile(&self) -> AppResult<ReconcileReport>;
}

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub users: users::UsersRepository,
    pub transactions: transactions::TransactionsRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            transactions: transactions::TransactionsRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for Repository {
    async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.books.get_by_id(id).await
    }

    async fn get_user(&self, id: i32) -> AppResult<User> {
        self.users.get_by_id(id).await
    }

    async fn get_transaction(&self, id: i32) -> AppResult<Transaction> {
        self.transactions.get_by_id(id).await
    }

    async fn find_pending(
        &self,
        user_id: i32,
        book_id: i32,
        kind: TransactionKind,
    ) -> AppResult<Option<Transaction>> {
        self.transactions.find_pending(user_id, book_id, kind).await
    }

    async fn insert_transaction(&self, new: &NewTransaction) -> AppResult<Transaction> {
        self.transactions.create(new).await
    }

    async fn commit_issue(&self, commit: &IssueCommit) -> AppResult<Transaction> {
        self.transactions.commit_issue(commit).await
    }

    async fn commit_return(&self, commit: &ReturnCommit) -> AppResult<Transaction> {
        self.transactions.commit_return(commit).await
    }

    async fn commit_rejection(&self, commit: &RejectionCommit) -> AppResult<Transaction> {
        self.transactions.commit_rejection(commit).await
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
        self.transactions.list(query).await
    }

    async fn set_user_status(&self, user_id: i32, status: UserStatus) -> AppResult<User> {
        self.users.set_status(user_id, status).await
    }

    async fn reconcile(&self) -> AppResult<ReconcileReport> {
        self.transactions.reconcile().await
    }
}

//! In-memory workflow store
//!
//! All state sits behind one async mutex, so every commit is serialized.
//! Commits stage their changes on clones and only write them back once
//! every check has passed, which keeps failed commits free of side effects.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Availability, Location},
        transaction::{NewTransaction, ReconcileReport, TransactionQuery},
        user::{check_loan_limit, IssuedBook},
        Book, Role, Transaction, TransactionKind, TransactionStatus, User, UserStatus,
    },
};

use super::{IssueCommit, RejectionCommit, ReturnCommit, WorkflowStore};

#[derive(Default)]
struct MemoryState {
    books: BTreeMap<i32, Book>,
    users: BTreeMap<i32, User>,
    transactions: BTreeMap<i32, Transaction>,
    last_id: i32,
}

impl MemoryState {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    fn book(&self, id: i32) -> AppResult<&Book> {
        self.books
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    fn user(&self, id: i32) -> AppResult<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    fn transaction(&self, id: i32) -> AppResult<&Transaction> {
        self.transactions
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Transaction with id {} not found", id)))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active book with every copy on the shelf
    pub async fn add_book(&self, title: &str, author: &str, total_copies: i32) -> Book {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let book = Book {
            id: state.next_id(),
            title: title.to_string(),
            author: author.to_string(),
            isbn: None,
            genre: None,
            description: None,
            publisher: None,
            published_date: None,
            pages: None,
            cover_image: None,
            tags: Vec::new(),
            location: Location::default(),
            availability: Availability::new(total_copies),
            is_active: true,
            added_by: None,
            created_at: now,
            updated_at: now,
        };
        state.books.insert(book.id, book.clone());
        book
    }

    /// Add an active account
    pub async fn add_user(&self, username: &str, role: Role) -> User {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let user = User {
            id: state.next_id(),
            username: username.to_string(),
            email: format!("{}@library.test", username),
            password: String::new(),
            first_name: username.to_string(),
            last_name: String::new(),
            phone_number: None,
            address: None,
            role,
            status: UserStatus::Active,
            issued_books: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    /// Replace a book's counters without going through the workflow
    pub async fn overwrite_availability(&self, book_id: i32, availability: Availability) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let book = state
            .books
            .get_mut(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        book.availability = availability;
        Ok(())
    }

    /// Drop a user's issued-books projection without touching the ledger
    pub async fn clear_issued_books(&self, user_id: i32) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", user_id)))?;
        user.issued_books.clear();
        Ok(())
    }

    pub async fn books(&self) -> Vec<Book> {
        self.state.lock().await.books.values().cloned().collect()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.lock().await.users.values().cloned().collect()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.state.lock().await.book(id).cloned()
    }

    async fn get_user(&self, id: i32) -> AppResult<User> {
        self.state.lock().await.user(id).cloned()
    }

    async fn get_transaction(&self, id: i32) -> AppResult<Transaction> {
        self.state.lock().await.transaction(id).cloned()
    }

    async fn find_pending(
        &self,
        user_id: i32,
        book_id: i32,
        kind: TransactionKind,
    ) -> AppResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .rev()
            .find(|t| {
                t.user_id == user_id
                    && t.book_id == book_id
                    && t.kind == kind
                    && t.status == TransactionStatus::Pending
            })
            .cloned())
    }

    async fn insert_transaction(&self, new: &NewTransaction) -> AppResult<Transaction> {
        let mut state = self.state.lock().await;
        state.user(new.user_id)?;
        state.book(new.book_id)?;
        if state.transactions.values().any(|t| {
            t.status == TransactionStatus::Pending
                && t.user_id == new.user_id
                && t.book_id == new.book_id
                && t.kind == new.kind
        }) {
            return Err(AppError::PolicyViolation(format!(
                "A {} request for this book is already pending",
                new.kind
            )));
        }

        let transaction = Transaction {
            id: state.next_id(),
            user_id: new.user_id,
            book_id: new.book_id,
            kind: new.kind,
            status: TransactionStatus::Pending,
            issue_transaction_id: new.issue_transaction_id,
            notes: new.notes.clone(),
            created_at: new.created_at,
            issued_at: None,
            due_date: None,
            returned_at: None,
            approved_by: None,
            rejected_by: None,
            rejected_at: None,
            updated_at: new.created_at,
        };
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn commit_issue(&self, commit: &IssueCommit) -> AppResult<Transaction> {
        let mut state = self.state.lock().await;

        let mut transaction = state.transaction(commit.transaction_id)?.clone();
        transaction.approve_issue(commit.approved_by, commit.issued_at, commit.due_date)?;

        let mut user = state.user(transaction.user_id)?.clone();
        user.ensure_active()?;
        check_loan_limit(user.issued_books.len() as i64, commit.max_books_per_user)?;

        let mut book = state.book(transaction.book_id)?.clone();
        if !book.is_active || !book.availability.try_checkout() {
            return Err(AppError::RaceLost(format!(
                "No copies of book {} remain available",
                book.id
            )));
        }
        book.updated_at = commit.issued_at;

        user.issued_books.push(IssuedBook {
            book_id: book.id,
            transaction_id: transaction.id,
            issued_at: commit.issued_at,
            due_date: commit.due_date,
        });

        state.books.insert(book.id, book);
        state.users.insert(user.id, user);
        state.transactions.insert(transaction.id, transaction.clone());

        Ok(transaction)
    }

    async fn commit_return(&self, commit: &ReturnCommit) -> AppResult<Transaction> {
        let mut state = self.state.lock().await;

        let mut transaction = state.transaction(commit.issue_transaction_id)?.clone();
        transaction.mark_returned(commit.returned_at)?;

        let mut book = state.book(transaction.book_id)?.clone();
        if !book.availability.try_checkin() {
            return Err(AppError::Internal(format!(
                "Availability counters of book {} are out of sync",
                book.id
            )));
        }
        book.updated_at = commit.returned_at;

        let mut user = state.user(transaction.user_id)?.clone();
        let held = user.issued_books.len();
        user.issued_books.retain(|b| b.transaction_id != transaction.id);
        if user.issued_books.len() == held {
            tracing::warn!(transaction_id = transaction.id, "Loan missing from issued books projection");
        }

        let mut requests = Vec::new();
        for request in state.transactions.values().filter(|t| {
            t.kind == TransactionKind::Return
                && t.status == TransactionStatus::Pending
                && t.issue_transaction_id == Some(transaction.id)
        }) {
            let mut request = request.clone();
            request.approve_return(commit.resolved_by, commit.returned_at)?;
            requests.push(request);
        }

        state.books.insert(book.id, book);
        state.users.insert(user.id, user);
        for request in requests {
            state.transactions.insert(request.id, request);
        }
        state.transactions.insert(transaction.id, transaction.clone());

        Ok(transaction)
    }

    async fn commit_rejection(&self, commit: &RejectionCommit) -> AppResult<Transaction> {
        let mut state = self.state.lock().await;

        let mut transaction = state.transaction(commit.transaction_id)?.clone();
        transaction.reject(commit.rejected_by, commit.rejected_at, commit.notes.as_deref())?;
        state.transactions.insert(transaction.id, transaction.clone());

        Ok(transaction)
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
        let state = self.state.lock().await;

        let mut matching: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page() as usize)
            .collect();

        Ok((page, total))
    }

    async fn set_user_status(&self, user_id: i32, status: UserStatus) -> AppResult<User> {
        let mut state = self.state.lock().await;

        let mut user = state.user(user_id)?.clone();
        if status == UserStatus::Deactivated && user.status != status {
            let active_loans = state
                .transactions
                .values()
                .filter(|t| t.user_id == user_id && t.is_active_loan())
                .count();
            if active_loans > 0 {
                return Err(AppError::PolicyViolation(format!(
                    "Cannot deactivate user with {} active book issues. Please return all books first.",
                    active_loans
                )));
            }
        }

        user.status = status;
        user.updated_at = Utc::now();
        state.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn reconcile(&self) -> AppResult<ReconcileReport> {
        let mut state = self.state.lock().await;
        let mut report = ReconcileReport::default();

        let loans: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.is_active_loan())
            .cloned()
            .collect();

        for user in state.users.values_mut() {
            let before: BTreeSet<i32> = user.issued_books.iter().map(|b| b.transaction_id).collect();
            let mut rebuilt: Vec<IssuedBook> = loans
                .iter()
                .filter(|t| t.user_id == user.id)
                .map(|t| IssuedBook {
                    book_id: t.book_id,
                    transaction_id: t.id,
                    issued_at: t.issued_at.unwrap_or(t.created_at),
                    due_date: t.due_date.unwrap_or(t.created_at),
                })
                .collect();
            rebuilt.sort_by_key(|b| (b.issued_at, b.transaction_id));

            let after: BTreeSet<i32> = rebuilt.iter().map(|b| b.transaction_id).collect();
            report.loans_projected += after.difference(&before).count() as i64;
            report.projection_entries_removed += before.difference(&after).count() as i64;
            user.issued_books = rebuilt;
        }

        for book in state.books.values_mut() {
            report.books_checked += 1;
            let issued = loans.iter().filter(|t| t.book_id == book.id).count() as i32;
            let availability = &mut book.availability;
            if availability.issued_copies != issued || !availability.is_consistent() {
                let total = availability.total_copies.max(issued);
                *availability = Availability {
                    total_copies: total,
                    available_copies: total - issued,
                    issued_copies: issued,
                };
                report.books_repaired += 1;
            }
        }

        Ok(report)
    }
}

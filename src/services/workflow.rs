//! Transaction workflow: issue/return requests and their resolution
//!
//! The service validates a transition against the current book, user and
//! ledger state, then hands the store a single commit that re-checks the
//! guarded conditions atomically. Availability read here is only used for
//! an early, friendlier error; the store decides.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::{
        transaction::{CreateTransaction, NewTransaction, ReconcileReport, TransactionQuery},
        user::check_loan_limit,
        Actor, Transaction, TransactionKind, User, UserStatus,
    },
    repository::{IssueCommit, RejectionCommit, ReturnCommit, WorkflowStore},
};

use super::events::{DomainEvent, EventBus, EventKind};

#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    policy: LoansConfig,
    events: EventBus,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>, policy: LoansConfig, events: EventBus) -> Self {
        Self { store, policy, events }
    }

    /// File a pending issue or return request
    pub async fn request(&self, actor: &Actor, request: &CreateTransaction) -> AppResult<Transaction> {
        let user_id = match request.user_id {
            Some(id) if id != actor.id => {
                actor.require_admin()?;
                id
            }
            _ => actor.id,
        };

        let user = self.store.get_user(user_id).await?;
        user.ensure_active()?;
        let book = self.store.get_book(request.book_id).await?;

        let issue_transaction_id = match request.kind {
            TransactionKind::Issue => {
                if !book.is_lendable() {
                    return Err(AppError::Unavailable(format!(
                        "\"{}\" has no copies available",
                        book.title
                    )));
                }
                if user.held_copy(book.id).is_some() {
                    return Err(AppError::PolicyViolation(format!(
                        "\"{}\" is already issued to this user",
                        book.title
                    )));
                }
                check_loan_limit(user.issued_books.len() as i64, self.policy.max_books_per_user)?;
                None
            }
            TransactionKind::Return => {
                let loan = user.held_copy(book.id).ok_or_else(|| {
                    AppError::NotIssued(format!("\"{}\" is not issued to this user", book.title))
                })?;
                Some(loan.transaction_id)
            }
        };

        if let Some(existing) = self.store.find_pending(user.id, book.id, request.kind).await? {
            return Err(AppError::PolicyViolation(format!(
                "A {} request for this book is already pending (transaction {})",
                request.kind, existing.id
            )));
        }

        let transaction = self
            .store
            .insert_transaction(&NewTransaction {
                user_id: user.id,
                book_id: book.id,
                kind: request.kind,
                issue_transaction_id,
                notes: request.notes.clone(),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            transaction_id = transaction.id,
            user_id = transaction.user_id,
            book_id = transaction.book_id,
            kind = %transaction.kind,
            "Transaction requested"
        );
        self.events.publish(DomainEvent::new(EventKind::Requested, &transaction, actor.id));

        Ok(transaction)
    }

    /// pending -> approved (admin only)
    pub async fn approve(&self, actor: &Actor, id: i32) -> AppResult<Transaction> {
        self.require_active_admin(actor).await?;

        let transaction = self.store.get_transaction(id).await?;
        transaction.ensure_pending()?;
        let now = Utc::now();

        match transaction.kind {
            TransactionKind::Issue => {
                // Availability may have changed since the request was filed
                let book = self.store.get_book(transaction.book_id).await?;
                if !book.is_lendable() {
                    return Err(AppError::RaceLost(format!(
                        "\"{}\" has no copies left to issue",
                        book.title
                    )));
                }

                let approved = self
                    .store
                    .commit_issue(&IssueCommit {
                        transaction_id: id,
                        approved_by: actor.id,
                        issued_at: now,
                        due_date: now + Duration::days(self.policy.loan_duration_days),
                        max_books_per_user: self.policy.max_books_per_user,
                    })
                    .await?;

                tracing::info!(
                    transaction_id = approved.id,
                    user_id = approved.user_id,
                    book_id = approved.book_id,
                    approved_by = actor.id,
                    "Issue approved"
                );
                self.events.publish(DomainEvent::new(EventKind::Approved, &approved, actor.id));

                Ok(approved)
            }
            TransactionKind::Return => {
                let loan_id = transaction.issue_transaction_id.ok_or_else(|| {
                    AppError::Internal(format!("Return request {} is not linked to a loan", id))
                })?;

                let loan = self
                    .store
                    .commit_return(&ReturnCommit {
                        issue_transaction_id: loan_id,
                        resolved_by: actor.id,
                        returned_at: now,
                    })
                    .await?;
                let approved = self.store.get_transaction(id).await?;

                tracing::info!(
                    transaction_id = approved.id,
                    loan_id = loan.id,
                    book_id = loan.book_id,
                    approved_by = actor.id,
                    "Return approved"
                );
                self.events.publish(DomainEvent::new(EventKind::Approved, &approved, actor.id));
                self.events.publish(DomainEvent::new(EventKind::Returned, &loan, actor.id));

                Ok(approved)
            }
        }
    }

    /// pending -> rejected (admin only). Never touches books or users.
    pub async fn reject(&self, actor: &Actor, id: i32, notes: Option<String>) -> AppResult<Transaction> {
        self.require_active_admin(actor).await?;

        let rejected = self
            .store
            .commit_rejection(&RejectionCommit {
                transaction_id: id,
                rejected_by: actor.id,
                rejected_at: Utc::now(),
                notes,
            })
            .await?;

        tracing::info!(transaction_id = rejected.id, rejected_by = actor.id, "Transaction rejected");
        self.events.publish(DomainEvent::new(EventKind::Rejected, &rejected, actor.id));

        Ok(rejected)
    }

    /// Close an outstanding loan (holder or admin)
    pub async fn return_book(&self, actor: &Actor, id: i32) -> AppResult<Transaction> {
        let transaction = self.store.get_transaction(id).await?;
        actor.require_self_or_admin(transaction.user_id)?;

        if transaction.kind != TransactionKind::Issue {
            return Err(AppError::PolicyViolation(format!(
                "Transaction {} is a return request; return the issue transaction {} instead",
                id,
                transaction
                    .issue_transaction_id
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "?".to_string())
            )));
        }
        if !transaction.is_active_loan() {
            return Err(AppError::NotIssued(format!(
                "Transaction {} is not an outstanding loan",
                id
            )));
        }

        let returned = self
            .store
            .commit_return(&ReturnCommit {
                issue_transaction_id: id,
                resolved_by: actor.id,
                returned_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            transaction_id = returned.id,
            user_id = returned.user_id,
            book_id = returned.book_id,
            "Book returned"
        );
        self.events.publish(DomainEvent::new(EventKind::Returned, &returned, actor.id));

        Ok(returned)
    }

    /// Users see their own transactions; admins see everyone's
    pub async fn list(&self, actor: &Actor, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
        let mut query = query.clone();
        match query.user {
            Some(user_id) => actor.require_self_or_admin(user_id)?,
            None if !actor.is_admin() => query.user = Some(actor.id),
            None => {}
        }

        self.store.list_transactions(&query).await
    }

    pub async fn get(&self, actor: &Actor, id: i32) -> AppResult<Transaction> {
        let transaction = self.store.get_transaction(id).await?;
        actor.require_self_or_admin(transaction.user_id)?;
        Ok(transaction)
    }

    /// Soft-delete an account. Fails while the user still holds books.
    pub async fn deactivate_user(&self, actor: &Actor, user_id: i32) -> AppResult<User> {
        self.require_active_admin(actor).await?;
        if actor.id == user_id {
            return Err(AppError::PolicyViolation(
                "Administrators cannot deactivate their own account".to_string(),
            ));
        }

        let user = self.store.set_user_status(user_id, UserStatus::Deactivated).await?;
        tracing::info!(user_id, deactivated_by = actor.id, "User deactivated");
        Ok(user)
    }

    pub async fn activate_user(&self, actor: &Actor, user_id: i32) -> AppResult<User> {
        self.require_active_admin(actor).await?;
        let user = self.store.set_user_status(user_id, UserStatus::Active).await?;
        tracing::info!(user_id, activated_by = actor.id, "User activated");
        Ok(user)
    }

    /// Rebuild derived counters and issued-book lists from the ledger
    pub async fn reconcile(&self, actor: &Actor) -> AppResult<ReconcileReport> {
        self.require_active_admin(actor).await?;
        let report = self.store.reconcile().await?;
        if report.books_repaired > 0 || report.loans_projected > 0 || report.projection_entries_removed > 0 {
            tracing::warn!(?report, "Reconciliation repaired derived state");
        } else {
            tracing::info!(books_checked = report.books_checked, "Reconciliation found no drift");
        }
        Ok(report)
    }

    /// Tokens outlive deactivation, so admin-only transitions re-read the
    /// acting account
    async fn require_active_admin(&self, actor: &Actor) -> AppResult<()> {
        actor.require_admin()?;
        if !self.store.get_user(actor.id).await?.is_active() {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }
        Ok(())
    }
}

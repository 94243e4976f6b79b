//! Transaction (issue/return request) model and its state machine
//!
//! ```text
//!            approve            return
//! pending ----------> approved ---------> approved + returned_at
//!    |
//!    +-- reject ----> rejected
//! ```
//!
//! Transactions are an append-only ledger: rows are never deleted and only
//! the status and timestamp fields change after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{book::BookShort, text_enum, user::UserShort, PageWindow};
use crate::error::{AppError, AppResult};

/// What the user asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Issue,
    Return,
}

text_enum!(TransactionKind { Issue => "issue", Return => "return" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(TransactionStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Transaction model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Transaction {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    /// For return requests: the issue transaction being returned
    pub issue_transaction_id: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub approved_by: Option<i32>,
    pub rejected_by: Option<i32>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Approved issue whose book has not come back yet
    pub fn is_active_loan(&self) -> bool {
        self.kind == TransactionKind::Issue
            && self.status == TransactionStatus::Approved
            && self.returned_at.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active_loan() && self.due_date.map(|due| due < now).unwrap_or(false)
    }

    /// No further transition is possible
    pub fn is_terminal(&self) -> bool {
        match self.status {
            TransactionStatus::Pending => false,
            TransactionStatus::Rejected => true,
            TransactionStatus::Approved => {
                self.kind == TransactionKind::Return || self.returned_at.is_some()
            }
        }
    }

    pub fn ensure_pending(&self) -> AppResult<()> {
        if self.status == TransactionStatus::Pending {
            Ok(())
        } else {
            Err(AppError::PolicyViolation(format!(
                "Transaction {} is already {}",
                self.id, self.status
            )))
        }
    }

    /// pending -> approved for an issue request
    pub fn approve_issue(
        &mut self,
        admin_id: i32,
        now: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> AppResult<()> {
        self.ensure_pending()?;
        if self.kind != TransactionKind::Issue {
            return Err(AppError::PolicyViolation(format!(
                "Transaction {} is not an issue request",
                self.id
            )));
        }
        self.status = TransactionStatus::Approved;
        self.issued_at = Some(now);
        self.due_date = Some(due_date);
        self.approved_by = Some(admin_id);
        self.updated_at = now;
        Ok(())
    }

    /// pending -> approved for a return request, once its loan is closed
    pub fn approve_return(&mut self, admin_id: i32, now: DateTime<Utc>) -> AppResult<()> {
        self.ensure_pending()?;
        if self.kind != TransactionKind::Return {
            return Err(AppError::PolicyViolation(format!(
                "Transaction {} is not a return request",
                self.id
            )));
        }
        self.status = TransactionStatus::Approved;
        self.returned_at = Some(now);
        self.approved_by = Some(admin_id);
        self.updated_at = now;
        Ok(())
    }

    /// pending -> rejected
    pub fn reject(&mut self, admin_id: i32, now: DateTime<Utc>, notes: Option<&str>) -> AppResult<()> {
        self.ensure_pending()?;
        self.status = TransactionStatus::Rejected;
        self.rejected_by = Some(admin_id);
        self.rejected_at = Some(now);
        if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
            self.notes = Some(match self.notes.take() {
                Some(existing) => format!("{}\n{}", existing, notes),
                None => notes.to_string(),
            });
        }
        self.updated_at = now;
        Ok(())
    }

    /// Close an active loan
    pub fn mark_returned(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if !self.is_active_loan() {
            return Err(AppError::NotIssued(format!(
                "Transaction {} is not an outstanding loan",
                self.id
            )));
        }
        self.returned_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// A transaction row about to be inserted as `pending`
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: i32,
    pub book_id: i32,
    pub kind: TransactionKind,
    pub issue_transaction_id: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Borrow/return request body
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTransaction {
    #[serde(alias = "bookId")]
    pub book_id: i32,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Admins may file a request on behalf of another user
    #[serde(default, alias = "userId")]
    pub user_id: Option<i32>,
    #[validate(length(max = 1000, message = "Notes are limited to 1000 characters"))]
    pub notes: Option<String>,
}

/// Rejection request body
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct RejectTransaction {
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// Transaction list filters
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct TransactionQuery {
    pub user: Option<i32>,
    pub book: Option<i32>,
    pub status: Option<TransactionStatus>,
    #[serde(rename = "type")]
    pub kind: Option<TransactionKind>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl TransactionQuery {
    pub fn window(&self) -> PageWindow {
        PageWindow::new(self.page, self.per_page)
    }

    pub fn page(&self) -> i64 {
        self.window().page
    }

    pub fn per_page(&self) -> i64 {
        self.window().per_page
    }

    pub fn offset(&self) -> i64 {
        self.window().offset()
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.user.map_or(true, |id| transaction.user_id == id)
            && self.book.map_or(true, |id| transaction.book_id == id)
            && self.status.map_or(true, |s| transaction.status == s)
            && self.kind.map_or(true, |k| transaction.kind == k)
    }
}

/// Transaction with the book and user it links, for listings
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionDetails {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub book: BookShort,
    pub user: UserShort,
}

/// Outcome of rebuilding derived state from the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileReport {
    pub books_checked: i64,
    pub books_repaired: i64,
    pub loans_projected: i64,
    pub projection_entries_removed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MAX_PAGE;
    use chrono::Duration;

    fn pending(kind: TransactionKind) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: 1,
            user_id: 2,
            book_id: 3,
            kind,
            status: TransactionStatus::Pending,
            issue_transaction_id: None,
            notes: None,
            created_at: now,
            issued_at: None,
            due_date: None,
            returned_at: None,
            approved_by: None,
            rejected_by: None,
            rejected_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_issue_lifecycle() {
        let mut tx = pending(TransactionKind::Issue);
        let now = Utc::now();
        assert!(!tx.is_terminal());

        tx.approve_issue(9, now, now + Duration::days(14)).unwrap();
        assert!(tx.is_active_loan());
        assert_eq!(tx.approved_by, Some(9));
        assert!(!tx.is_terminal());

        tx.mark_returned(now).unwrap();
        assert!(!tx.is_active_loan());
        assert!(tx.is_terminal());
        assert!(matches!(tx.mark_returned(now), Err(AppError::NotIssued(_))));
    }

    #[test]
    fn test_rejection_is_terminal_and_keeps_notes() {
        let mut tx = pending(TransactionKind::Issue);
        tx.notes = Some("for class".to_string());

        tx.reject(9, Utc::now(), Some("damaged copy")).unwrap();
        assert_eq!(tx.status, TransactionStatus::Rejected);
        assert_eq!(tx.notes.as_deref(), Some("for class\ndamaged copy"));
        assert!(tx.is_terminal());

        let now = Utc::now();
        assert!(matches!(tx.approve_issue(9, now, now), Err(AppError::PolicyViolation(_))));
        assert!(matches!(tx.mark_returned(now), Err(AppError::NotIssued(_))));
    }

    #[test]
    fn test_approve_checks_kind() {
        let now = Utc::now();
        let mut ret = pending(TransactionKind::Return);
        assert!(ret.approve_issue(9, now, now).is_err());
        assert_eq!(ret.status, TransactionStatus::Pending);
        ret.approve_return(9, now).unwrap();
        assert!(ret.is_terminal());
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let mut tx = pending(TransactionKind::Issue);
        tx.approve_issue(9, now - Duration::days(20), now - Duration::days(6)).unwrap();
        assert!(tx.is_overdue(now));
        tx.mark_returned(now).unwrap();
        assert!(!tx.is_overdue(now));
    }

    #[test]
    fn test_query_pagination_is_clamped() {
        let query = TransactionQuery {
            page: Some(0),
            per_page: Some(1000),
            ..Default::default()
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.per_page(), 100);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn test_query_offset_does_not_overflow() {
        let query = TransactionQuery {
            page: Some(i64::MAX),
            per_page: Some(100),
            ..Default::default()
        };
        assert_eq!(query.page(), MAX_PAGE);
        assert!(query.offset() > 0);
    }
}

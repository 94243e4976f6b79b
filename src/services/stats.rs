//! Dashboard statistics service

use chrono::Utc;

use crate::{
    api::stats::{BookStats, DashboardStats, TransactionStats},
    error::AppResult,
    repository::Repository,
};

/// Transactions shown on the dashboard
const RECENT_TRANSACTIONS: i64 = 5;

#[derive(Clone)]
pub struct StatsService {
    repository: Repository,
}

impl StatsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Admin dashboard figures
    pub async fn dashboard(&self) -> AppResult<DashboardStats> {
        let (books, total_users, ledger, recent_transactions) = tokio::try_join!(
            self.repository.books.totals(),
            self.repository.users.count_active(),
            self.repository.transactions.counts(Utc::now()),
            self.repository.transactions.recent_details(None, RECENT_TRANSACTIONS),
        )?;

        Ok(DashboardStats {
            total_users,
            books: BookStats {
                titles: books.titles,
                total_copies: books.total_copies,
                available_copies: books.available_copies,
            },
            transactions: TransactionStats {
                total: ledger.total,
                pending_requests: ledger.pending,
                active_issues: ledger.active_issues,
                overdue: ledger.overdue,
            },
            recent_transactions,
        })
    }

    /// Database reachability, used by the readiness probe
    pub async fn ping(&self) -> AppResult<()> {
        self.repository.ping().await
    }
}

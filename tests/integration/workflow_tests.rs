//! Workflow engine tests against the in-memory store: concurrent approvals
//! and long randomized operation sequences.

use std::sync::Arc;

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use library_server::{
    config::LoansConfig,
    error::AppError,
    models::{transaction::CreateTransaction, Actor, Role, TransactionKind, TransactionStatus},
    repository::{MemoryStore, WorkflowStore},
    services::{events::EventBus, workflow::WorkflowService},
};

fn issue(book_id: i32) -> CreateTransaction {
    CreateTransaction {
        book_id,
        kind: TransactionKind::Issue,
        user_id: None,
        notes: None,
    }
}

/// Counters balance and match the ledger; every outstanding loan is
/// projected onto exactly its holder.
async fn assert_consistent(store: &MemoryStore) {
    let (ledger, _) = store
        .list_transactions(&library_server::models::transaction::TransactionQuery {
            per_page: Some(100),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(ledger.len() < 100, "ledger outgrew a single page");

    for book in store.books().await {
        let a = book.availability;
        assert!(a.is_consistent(), "book {} counters out of balance: {:?}", book.id, a);
        assert!(a.available_copies >= 0 && a.issued_copies >= 0);
        let loans = ledger.iter().filter(|t| t.book_id == book.id && t.is_active_loan()).count();
        assert_eq!(a.issued_copies as usize, loans, "book {} issued count drifted", book.id);
    }

    for user in store.users().await {
        let mut held: Vec<i32> = user.issued_books.iter().map(|b| b.transaction_id).collect();
        let mut loans: Vec<i32> = ledger
            .iter()
            .filter(|t| t.user_id == user.id && t.is_active_loan())
            .map(|t| t.id)
            .collect();
        held.sort_unstable();
        loans.sort_unstable();
        assert_eq!(held, loans, "issued books of user {} drifted", user.id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_issue_last_copy_once() {
    let store = Arc::new(MemoryStore::new());
    let workflow = WorkflowService::new(store.clone(), LoansConfig::default(), EventBus::new(64));
    let admin = store.add_user("admin", Role::Admin).await.actor();
    let book = store.add_book("Last Copy", "Author", 1).await;

    let mut pending = Vec::new();
    for i in 0..8 {
        let reader = store.add_user(&format!("reader{}", i), Role::User).await.actor();
        pending.push(workflow.request(&reader, &issue(book.id)).await.unwrap().id);
    }

    let handles: Vec<_> = pending
        .iter()
        .map(|&id| {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.approve(&admin, id).await })
        })
        .collect();

    let mut approved = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(t) => {
                assert_eq!(t.status, TransactionStatus::Approved);
                approved += 1;
            }
            Err(AppError::RaceLost(_)) => lost += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(approved, 1);
    assert_eq!(lost, 7);
    let availability = store.get_book(book.id).await.unwrap().availability;
    assert_eq!((availability.available_copies, availability.issued_copies), (0, 1));
    assert_consistent(&store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deactivation_and_approval() {
    for _ in 0..20 {
        let store = Arc::new(MemoryStore::new());
        let workflow = WorkflowService::new(store.clone(), LoansConfig::default(), EventBus::new(8));
        let admin = store.add_user("admin", Role::Admin).await.actor();
        let reader = store.add_user("reader", Role::User).await.actor();
        let book = store.add_book("Contested", "Author", 1).await;
        let request = workflow.request(&reader, &issue(book.id)).await.unwrap();

        let approve = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.approve(&admin, request.id).await })
        };
        let deactivate = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.deactivate_user(&admin, reader.id).await })
        };
        let approved = approve.await.unwrap();
        let deactivated = deactivate.await.unwrap();

        // Never a deactivated account that still holds a book
        assert!(approved.is_ok() != deactivated.is_ok());
        let user = store.get_user(reader.id).await.unwrap();
        assert!(user.is_active() || user.issued_books.is_empty());
        assert_consistent(&store).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_file_once() {
    let store = Arc::new(MemoryStore::new());
    let workflow = WorkflowService::new(store.clone(), LoansConfig::default(), EventBus::new(8));
    let reader = store.add_user("reader", Role::User).await.actor();
    let book_id = store.add_book("Popular", "Author", 3).await.id;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.request(&reader, &issue(book_id)).await })
        })
        .collect();

    let mut filed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => filed += 1,
            Err(AppError::PolicyViolation(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(filed, 1);
}

#[tokio::test]
async fn test_randomized_operations_keep_counters_balanced() {
    let mut rng = StdRng::seed_from_u64(0x5eed_b00c);
    let policy = LoansConfig {
        loan_duration_days: 14,
        max_books_per_user: 2,
    };
    let store = Arc::new(MemoryStore::new());
    let workflow = WorkflowService::new(store.clone(), policy, EventBus::new(8));
    let admin = store.add_user("admin", Role::Admin).await.actor();

    let mut readers: Vec<Actor> = Vec::new();
    for i in 0..4 {
        readers.push(store.add_user(&format!("reader{}", i), Role::User).await.actor());
    }
    let mut books = Vec::new();
    for i in 0..3 {
        books.push(store.add_book(&format!("Book {}", i), "Author", i + 1).await.id);
    }

    for _ in 0..90 {
        let reader = *readers.choose(&mut rng).unwrap();
        let book_id = *books.choose(&mut rng).unwrap();

        let (open, _) = store.list_transactions(&Default::default()).await.unwrap();
        let outcome = match rng.gen_range(0..5) {
            0 | 1 => workflow.request(&reader, &issue(book_id)).await.map(|_| ()),
            2 => match open.iter().find(|t| t.status == TransactionStatus::Pending) {
                Some(t) => workflow.approve(&admin, t.id).await.map(|_| ()),
                None => Ok(()),
            },
            3 => match open.iter().find(|t| t.status == TransactionStatus::Pending) {
                Some(t) => workflow.reject(&admin, t.id, None).await.map(|_| ()),
                None => Ok(()),
            },
            _ => match open.iter().find(|t| t.is_active_loan()) {
                Some(t) => workflow.return_book(&admin, t.id).await.map(|_| ()),
                None => Ok(()),
            },
        };

        match outcome {
            Ok(())
            | Err(AppError::Unavailable(_))
            | Err(AppError::RaceLost(_))
            | Err(AppError::PolicyViolation(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
        assert_consistent(&store).await;
    }

    let report = workflow.reconcile(&admin).await.unwrap();
    assert_eq!(report.books_repaired, 0);
    assert_eq!(report.loans_projected, 0);
    assert_eq!(report.projection_entries_removed, 0);
}

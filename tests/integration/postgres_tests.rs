//! Workflow tests against the Postgres store.
//!
//! They need a reachable database in `DATABASE_URL` (migrations are applied
//! on connect) and return early without it. Every test works on its own
//! freshly created users and books, so they can share a database.

use std::sync::Arc;

use rand::Rng;
use sqlx::postgres::PgPoolOptions;

use library_server::{
    config::LoansConfig,
    error::AppError,
    models::{
        book::{CreateBook, Location},
        transaction::{CreateTransaction, TransactionQuery},
        user::CreateUser,
        Actor, Role, TransactionKind, TransactionStatus, UserStatus,
    },
    repository::{Repository, WorkflowStore},
    services::{events::EventBus, workflow::WorkflowService},
};

struct Db {
    repository: Repository,
    workflow: WorkflowService,
    admin: Actor,
}

async fn connect() -> Option<Db> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let repository = Repository::new(pool);
    let workflow = WorkflowService::new(
        Arc::new(repository.clone()),
        LoansConfig::default(),
        EventBus::new(256),
    );
    let admin = add_user(&repository, "admin", Role::Admin).await;

    Some(Db {
        repository,
        workflow,
        admin,
    })
}

async fn add_user(repository: &Repository, prefix: &str, role: Role) -> Actor {
    let suffix: u64 = rand::thread_rng().gen();
    let username = format!("{}{}", prefix, suffix);
    let request = CreateUser {
        email: format!("{}@example.org", username),
        username,
        password: "secret123".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        phone_number: None,
        address: None,
    };
    repository
        .users
        .create(&request, "not-a-real-hash", role)
        .await
        .expect("Failed to create user")
        .actor()
}

async fn add_book(repository: &Repository, copies: i32) -> i32 {
    let request = CreateBook {
        title: "Store Test Book".to_string(),
        author: "Test Author".to_string(),
        isbn: None,
        genre: None,
        description: None,
        publisher: None,
        published_date: None,
        pages: None,
        cover_image: None,
        tags: Vec::new(),
        location: Location::default(),
        total_copies: copies,
    };
    repository
        .books
        .create(&request, None)
        .await
        .expect("Failed to create book")
        .id
}

fn issue(book_id: i32) -> CreateTransaction {
    CreateTransaction {
        book_id,
        kind: TransactionKind::Issue,
        user_id: None,
        notes: None,
    }
}

async fn counters(repository: &Repository, book_id: i32) -> (i32, i32, i32) {
    let a = repository.books.get_by_id(book_id).await.unwrap().availability;
    (a.total_copies, a.available_copies, a.issued_copies)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_approvals_issue_last_copy_once() {
    let Some(db) = connect().await else { return };
    let book_id = add_book(&db.repository, 1).await;

    let mut pending = Vec::new();
    for _ in 0..8 {
        let reader = add_user(&db.repository, "racer", Role::User).await;
        pending.push(db.workflow.request(&reader, &issue(book_id)).await.unwrap().id);
    }

    let handles: Vec<_> = pending
        .into_iter()
        .map(|id| {
            let workflow = db.workflow.clone();
            let admin = db.admin;
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

    assert_eq!((approved, lost), (1, 7));
    assert_eq!(counters(&db.repository, book_id).await, (1, 0, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_returns_run_alongside_reconcile() {
    let Some(db) = connect().await else { return };
    let book_id = add_book(&db.repository, 4).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let reader = add_user(&db.repository, "cycler", Role::User).await;
        let workflow = db.workflow.clone();
        let admin = db.admin;
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                let request = workflow.request(&reader, &issue(book_id)).await?;
                workflow.approve(&admin, request.id).await?;
                workflow.return_book(&reader, request.id).await?;
            }
            Ok::<_, AppError>(())
        }));
    }
    for _ in 0..2 {
        let workflow = db.workflow.clone();
        let admin = db.admin;
        tasks.push(tokio::spawn(async move {
            for _ in 0..15 {
                workflow.reconcile(&admin).await?;
            }
            Ok::<_, AppError>(())
        }));
    }

    for task in tasks {
        if let Err(e) = task.await.unwrap() {
            panic!("workflow step failed: {}", e);
        }
    }

    assert_eq!(counters(&db.repository, book_id).await, (4, 4, 0));
}

#[tokio::test]
async fn test_pg_deactivation_waits_for_returns() {
    let Some(db) = connect().await else { return };
    let book_id = add_book(&db.repository, 2).await;
    let reader = add_user(&db.repository, "holder", Role::User).await;

    let loan = db.workflow.request(&reader, &issue(book_id)).await.unwrap();
    db.workflow.approve(&db.admin, loan.id).await.unwrap();

    let blocked = db.workflow.deactivate_user(&db.admin, reader.id).await;
    assert!(matches!(blocked, Err(AppError::PolicyViolation(_))));
    let user = db.repository.get_user(reader.id).await.unwrap();
    assert_eq!(user.status, UserStatus::Active);
    assert_eq!(user.issued_books.len(), 1);

    db.workflow.return_book(&reader, loan.id).await.unwrap();
    let user = db.workflow.deactivate_user(&db.admin, reader.id).await.unwrap();
    assert_eq!(user.status, UserStatus::Deactivated);
    assert!(user.issued_books.is_empty());

    let refused = db.workflow.request(&reader, &issue(book_id)).await;
    assert!(matches!(refused, Err(AppError::PolicyViolation(_))));
    assert_eq!(counters(&db.repository, book_id).await, (2, 2, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_deactivation_and_approval() {
    let Some(db) = connect().await else { return };

    for _ in 0..10 {
        let book_id = add_book(&db.repository, 1).await;
        let reader = add_user(&db.repository, "contested", Role::User).await;
        let request = db.workflow.request(&reader, &issue(book_id)).await.unwrap();

        let approve = {
            let workflow = db.workflow.clone();
            let admin = db.admin;
            tokio::spawn(async move { workflow.approve(&admin, request.id).await })
        };
        let deactivate = {
            let workflow = db.workflow.clone();
            let admin = db.admin;
            tokio::spawn(async move { workflow.deactivate_user(&admin, reader.id).await })
        };
        let approved = approve.await.unwrap();
        let deactivated = deactivate.await.unwrap();

        assert!(approved.is_ok() != deactivated.is_ok());
        let user = db.repository.get_user(reader.id).await.unwrap();
        assert!(user.is_active() || user.issued_books.is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_identical_requests_file_once() {
    let Some(db) = connect().await else { return };
    let book_id = add_book(&db.repository, 3).await;
    let reader = add_user(&db.repository, "eager", Role::User).await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let workflow = db.workflow.clone();
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
async fn test_pg_listing_far_past_the_last_page_is_empty() {
    let Some(db) = connect().await else { return };
    let book_id = add_book(&db.repository, 1).await;
    let reader = add_user(&db.repository, "pager", Role::User).await;
    db.workflow.request(&reader, &issue(book_id)).await.unwrap();

    let query = TransactionQuery {
        page: Some(i64::MAX),
        ..Default::default()
    };
    let (items, total) = db.workflow.list(&reader, &query).await.unwrap();
    assert!(items.is_empty());
    assert_eq!(total, 1);
}

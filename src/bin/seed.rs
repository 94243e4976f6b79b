//! Populate a development database with the default accounts, a handful of
//! books and a couple of transactions. Safe to run repeatedly.

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;

use library_server::{
    config::AppConfig,
    models::{
        book::{CreateBook, Location},
        transaction::CreateTransaction,
        user::CreateUser,
        Role, TransactionKind, User,
    },
    repository::{Repository, WorkflowStore},
    services::{auth::hash_password, events::EventBus, workflow::WorkflowService},
};

struct SeedUser {
    username: &'static str,
    email: &'static str,
    password: &'static str,
    first_name: &'static str,
    last_name: &'static str,
    role: Role,
}

const USERS: [SeedUser; 2] = [
    SeedUser {
        username: "chrisadmin",
        email: "chris@chrislibrary.com",
        password: "chris123",
        first_name: "Chris",
        last_name: "Admin",
        role: Role::Admin,
    },
    SeedUser {
        username: "reader",
        email: "reader@chrislibrary.com",
        password: "reader123",
        first_name: "John",
        last_name: "Reader",
        role: Role::User,
    },
];

struct SeedBook {
    title: &'static str,
    author: &'static str,
    isbn: &'static str,
    genre: &'static str,
    description: &'static str,
    publisher: &'static str,
    published: (i32, u32, u32),
    pages: i32,
    copies: i32,
    section: &'static str,
    shelf: &'static str,
    tags: &'static [&'static str],
}

const BOOKS: [SeedBook; 5] = [
    SeedBook {
        title: "The Great Gatsby",
        author: "F. Scott Fitzgerald",
        isbn: "9780743273565",
        genre: "Classic Literature",
        description: "A classic American novel set in the Jazz Age",
        publisher: "Scribner",
        published: (1925, 4, 10),
        pages: 180,
        copies: 3,
        section: "A",
        shelf: "1",
        tags: &["classic", "american", "jazz age"],
    },
    SeedBook {
        title: "To Kill a Mockingbird",
        author: "Harper Lee",
        isbn: "9780061120084",
        genre: "Classic Literature",
        description: "A gripping tale of racial injustice and childhood innocence",
        publisher: "J.B. Lippincott & Co.",
        published: (1960, 7, 11),
        pages: 324,
        copies: 2,
        section: "A",
        shelf: "2",
        tags: &["classic", "american", "social issues"],
    },
    SeedBook {
        title: "1984",
        author: "George Orwell",
        isbn: "9780451524935",
        genre: "Dystopian Fiction",
        description: "A dystopian social science fiction novel",
        publisher: "Secker & Warburg",
        published: (1949, 6, 8),
        pages: 328,
        copies: 4,
        section: "B",
        shelf: "1",
        tags: &["dystopian", "science fiction", "political"],
    },
    SeedBook {
        title: "Pride and Prejudice",
        author: "Jane Austen",
        isbn: "9780141439518",
        genre: "Romance",
        description: "A romantic novel of manners",
        publisher: "T. Egerton",
        published: (1813, 1, 28),
        pages: 432,
        copies: 2,
        section: "C",
        shelf: "1",
        tags: &["romance", "classic", "british"],
    },
    SeedBook {
        title: "The Catcher in the Rye",
        author: "J.D. Salinger",
        isbn: "9780316769174",
        genre: "Coming-of-age Fiction",
        description: "A controversial novel about teenage rebellion",
        publisher: "Little, Brown and Company",
        published: (1951, 7, 16),
        pages: 277,
        copies: 1,
        section: "A",
        shelf: "3",
        tags: &["coming of age", "american", "controversial"],
    },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let repository = Repository::new(pool.clone());

    let mut accounts = Vec::new();
    for seed in &USERS {
        accounts.push(seed_user(&repository, seed).await?);
    }
    let (admin, reader) = (&accounts[0], &accounts[1]);

    let mut book_ids = Vec::new();
    for seed in &BOOKS {
        let book = match repository.books.find_by_isbn(seed.isbn).await? {
            Some(book) => {
                tracing::info!(title = seed.title, "Book already exists");
                book
            }
            None => {
                let book = repository.books.create(&create_book(seed), Some(admin.id)).await?;
                tracing::info!(title = seed.title, book_id = book.id, "Created book");
                book
            }
        };
        book_ids.push(book.id);
    }

    // Transactions go through the workflow so the book counters follow the ledger
    let store = Arc::new(repository.clone());
    let workflow = WorkflowService::new(store.clone(), config.loans.clone(), EventBus::new(1));

    let wanted = book_ids[0];
    if store.find_pending(reader.id, wanted, TransactionKind::Issue).await?.is_none()
        && reader.held_copy(wanted).is_none()
    {
        let request = CreateTransaction {
            book_id: wanted,
            kind: TransactionKind::Issue,
            user_id: None,
            notes: Some("Would like to read this classic".to_string()),
        };
        workflow.request(&reader.actor(), &request).await?;
        tracing::info!("Created pending transaction");
    }

    let borrowed = book_ids[1];
    if reader.held_copy(borrowed).is_none()
        && store.find_pending(reader.id, borrowed, TransactionKind::Issue).await?.is_none()
    {
        let request = CreateTransaction {
            book_id: borrowed,
            kind: TransactionKind::Issue,
            user_id: None,
            notes: Some("Approved for reading".to_string()),
        };
        let pending = workflow.request(&reader.actor(), &request).await?;
        workflow.approve(&admin.actor(), pending.id).await?;
        tracing::info!("Created approved transaction");
    }

    let (_, transactions) = store.list_transactions(&Default::default()).await?;
    tracing::info!(
        users = repository.users.count_active().await?,
        books = repository.books.totals().await?.titles,
        transactions,
        "Database seeded"
    );

    pool.close().await;
    Ok(())
}

async fn seed_user(repository: &Repository, seed: &SeedUser) -> anyhow::Result<User> {
    if let Some(existing) = repository.users.get_by_login(seed.email).await? {
        tracing::info!(email = seed.email, "User already exists");
        return Ok(repository.users.get_by_id(existing.id).await?);
    }

    let request = CreateUser {
        username: seed.username.to_string(),
        email: seed.email.to_string(),
        password: seed.password.to_string(),
        first_name: seed.first_name.to_string(),
        last_name: seed.last_name.to_string(),
        phone_number: None,
        address: None,
    };
    let hash = hash_password(seed.password)?;
    let user = repository.users.create(&request, &hash, seed.role).await?;
    tracing::info!(email = seed.email, role = %seed.role, "Created user");

    Ok(user)
}

fn create_book(seed: &SeedBook) -> CreateBook {
    let (year, month, day) = seed.published;
    CreateBook {
        title: seed.title.to_string(),
        author: seed.author.to_string(),
        isbn: Some(seed.isbn.to_string()),
        genre: Some(seed.genre.to_string()),
        description: Some(seed.description.to_string()),
        publisher: Some(seed.publisher.to_string()),
        published_date: NaiveDate::from_ymd_opt(year, month, day),
        pages: Some(seed.pages),
        cover_image: None,
        tags: seed.tags.iter().map(|t| t.to_string()).collect(),
        location: Location {
            section: Some(seed.section.to_string()),
            shelf: Some(seed.shelf.to_string()),
            floor: Some("Ground".to_string()),
        },
        total_copies: seed.copies,
    }
}

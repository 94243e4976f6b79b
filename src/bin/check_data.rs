//! Print users, books and transactions with a short summary, and report
//! any book whose counters disagree with the ledger.

use std::collections::HashMap;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use library_server::{
    config::AppConfig,
    models::transaction::TransactionQuery,
    repository::{Repository, WorkflowStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    let repository = Repository::new(pool.clone());

    let users = repository.users.list_all().await?;
    println!("USERS:");
    for user in &users {
        println!("  - {} ({}, {})", user.email, user.role, user.status);
    }

    let books = repository.books.list_all().await?;
    println!("\nBOOKS:");
    for book in &books {
        let a = &book.availability;
        println!(
            "  - {} by {} [{}/{} available, {} issued]{}",
            book.title,
            book.author,
            a.available_copies,
            a.total_copies,
            a.issued_copies,
            if book.is_active { "" } else { " (withdrawn)" }
        );
    }

    let emails: HashMap<i32, &str> = users.iter().map(|u| (u.id, u.email.as_str())).collect();
    let titles: HashMap<i32, &str> = books.iter().map(|b| (b.id, b.title.as_str())).collect();

    let mut transactions = Vec::new();
    let mut query = TransactionQuery {
        per_page: Some(100),
        ..Default::default()
    };
    loop {
        let (page, total) = repository.list_transactions(&query).await?;
        let fetched = page.len();
        transactions.extend(page);
        if fetched == 0 || transactions.len() as i64 >= total {
            break;
        }
        query.page = Some(query.page() + 1);
    }

    println!("\nTRANSACTIONS:");
    let mut outstanding: HashMap<i32, i32> = HashMap::new();
    for t in &transactions {
        println!(
            "  - #{} {} requested {} \"{}\" ({}{})",
            t.id,
            emails.get(&t.user_id).copied().unwrap_or("?"),
            t.kind,
            titles.get(&t.book_id).copied().unwrap_or("?"),
            t.status,
            if t.returned_at.is_some() { ", returned" } else { "" }
        );
        if t.is_active_loan() {
            *outstanding.entry(t.book_id).or_default() += 1;
        }
    }

    let drifted: Vec<_> = books
        .iter()
        .filter(|b| {
            let issued = outstanding.get(&b.id).copied().unwrap_or(0);
            b.availability.issued_copies != issued || !b.availability.is_consistent()
        })
        .collect();

    println!("\nSUMMARY:");
    println!("Total Users: {}", users.len());
    println!("Total Books: {}", books.len());
    println!("Total Transactions: {}", transactions.len());
    if drifted.is_empty() {
        println!("Book counters match the ledger");
    } else {
        for book in drifted {
            println!("Counters of \"{}\" (id {}) disagree with the ledger", book.title, book.id);
        }
        println!("Run POST /api/v1/admin/reconcile to repair");
    }

    pool.close().await;
    Ok(())
}

//! Books repository for database operations

use chrono::Utc;
use sqlx::{Pool, Postgres, QueryBuilder, Row};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{normalize_isbn, normalize_search, Availability, Book, BookQuery, CreateBook, UpdateBook},
        PageWindow,
    },
};

/// Aggregate catalog figures for the dashboard
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogTotals {
    pub titles: i64,
    pub available_copies: i64,
    pub total_copies: i64,
}

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    pub async fn find_by_isbn(&self, isbn: &str) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE isbn = $1")
            .bind(normalize_isbn(isbn))
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    /// Search active books with pagination
    pub async fn search(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let window = PageWindow::new(query.page, query.per_page);

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books WHERE is_active = TRUE");
        push_book_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM books WHERE is_active = TRUE");
        push_book_filters(&mut select, query);
        select
            .push(" ORDER BY title, id LIMIT ")
            .push_bind(window.per_page)
            .push(" OFFSET ")
            .push_bind(window.offset());

        let books = select.build_query_as::<Book>().fetch_all(&self.pool).await?;

        Ok((books, total))
    }

    /// Create a new book with all copies on the shelf
    pub async fn create(&self, book: &CreateBook, added_by: Option<i32>) -> AppResult<Book> {
        let now = Utc::now();
        let isbn = book.isbn.as_deref().map(normalize_isbn);
        let availability = Availability::new(book.total_copies);

        sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (
                title, author, isbn, genre, description, publisher, published_date,
                pages, cover_image, tags, section, shelf, floor,
                total_copies, available_copies, issued_copies,
                is_active, added_by, search_text, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    TRUE, $17, $18, $19, $19)
            RETURNING *
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&isbn)
        .bind(&book.genre)
        .bind(&book.description)
        .bind(&book.publisher)
        .bind(book.published_date)
        .bind(book.pages)
        .bind(&book.cover_image)
        .bind(&book.tags)
        .bind(&book.location.section)
        .bind(&book.location.shelf)
        .bind(&book.location.floor)
        .bind(availability.total_copies)
        .bind(availability.available_copies)
        .bind(availability.issued_copies)
        .bind(added_by)
        .bind(search_text(&book.title, &book.author, isbn.as_deref()))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| duplicate_isbn(e, isbn.as_deref()))
    }

    /// Update a book. Resizing the stock locks the row so that it cannot
    /// interleave with a concurrent approval or return.
    pub async fn update(&self, id: i32, update: &UpdateBook) -> AppResult<Book> {
        let mut db = self.pool.begin().await?;

        let mut book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        if let Some(ref title) = update.title {
            book.title = title.clone();
        }
        if let Some(ref author) = update.author {
            book.author = author.clone();
        }
        if let Some(ref isbn) = update.isbn {
            book.isbn = Some(normalize_isbn(isbn));
        }
        if update.genre.is_some() {
            book.genre = update.genre.clone();
        }
        if update.description.is_some() {
            book.description = update.description.clone();
        }
        if update.publisher.is_some() {
            book.publisher = update.publisher.clone();
        }
        if update.published_date.is_some() {
            book.published_date = update.published_date;
        }
        if update.pages.is_some() {
            book.pages = update.pages;
        }
        if update.cover_image.is_some() {
            book.cover_image = update.cover_image.clone();
        }
        if let Some(ref tags) = update.tags {
            book.tags = tags.clone();
        }
        if let Some(ref location) = update.location {
            book.location = location.clone();
        }
        if let Some(total) = update.total_copies {
            book.availability.resize(total)?;
        }

        let updated = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = $2, author = $3, isbn = $4, genre = $5, description = $6,
                publisher = $7, published_date = $8, pages = $9, cover_image = $10,
                tags = $11, section = $12, shelf = $13, floor = $14,
                total_copies = $15, available_copies = $16, issued_copies = $17,
                search_text = $18, updated_at = $19
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.genre)
        .bind(&book.description)
        .bind(&book.publisher)
        .bind(book.published_date)
        .bind(book.pages)
        .bind(&book.cover_image)
        .bind(&book.tags)
        .bind(&book.location.section)
        .bind(&book.location.shelf)
        .bind(&book.location.floor)
        .bind(book.availability.total_copies)
        .bind(book.availability.available_copies)
        .bind(book.availability.issued_copies)
        .bind(search_text(&book.title, &book.author, book.isbn.as_deref()))
        .bind(Utc::now())
        .fetch_one(&mut *db)
        .await
        .map_err(|e| duplicate_isbn(e, book.isbn.as_deref()))?;

        db.commit().await?;

        Ok(updated)
    }

    /// Withdraw a book from the catalog (soft delete). Refused while any
    /// copy is out on loan.
    pub async fn deactivate(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE books SET is_active = FALSE, updated_at = $2 WHERE id = $1 AND issued_copies = 0",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let book = self.get_by_id(id).await?;
            return Err(AppError::PolicyViolation(format!(
                "Cannot delete \"{}\" while {} copies are issued",
                book.title, book.availability.issued_copies
            )));
        }

        Ok(())
    }

    /// Catalog totals over active books
    pub async fn totals(&self) -> AppResult<CatalogTotals> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS titles,
                   COALESCE(SUM(available_copies), 0)::BIGINT AS available_copies,
                   COALESCE(SUM(total_copies), 0)::BIGINT AS total_copies
            FROM books
            WHERE is_active = TRUE
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogTotals {
            titles: row.get("titles"),
            available_copies: row.get("available_copies"),
            total_copies: row.get("total_copies"),
        })
    }

    pub async fn list_all(&self) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>("SELECT * FROM books ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(books)
    }
}

fn push_book_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &BookQuery) {
    if let Some(ref search) = query.search {
        let term = normalize_search(search);
        if !term.is_empty() {
            builder
                .push(" AND search_text LIKE ")
                .push_bind(format!("%{}%", term.replace('%', "\\%").replace('_', "\\_")));
        }
    }
    if let Some(ref genre) = query.genre {
        builder.push(" AND LOWER(genre) = LOWER(").push_bind(genre.clone()).push(")");
    }
    if query.available == Some(true) {
        builder.push(" AND available_copies > 0");
    }
}

/// Normalized text matched by catalog searches
fn search_text(title: &str, author: &str, isbn: Option<&str>) -> String {
    normalize_search(&format!("{} {} {}", title, author, isbn.unwrap_or_default()))
}

fn duplicate_isbn(error: sqlx::Error, isbn: Option<&str>) -> AppError {
    match error {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(format!(
            "A book with ISBN {} already exists",
            isbn.unwrap_or_default()
        )),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_text_folds_case_and_accents() {
        assert_eq!(
            search_text("L'Étranger", "Albert Camus", Some("9782070360024")),
            "l'etranger albert camus 9782070360024"
        );
        assert_eq!(search_text("Dune", "Frank Herbert", None), "dune frank herbert");
    }
}

//! Catalog management service

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{normalize_isbn, BookQuery, CreateBook, UpdateBook},
        Actor, Book,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Search active books with filters
    pub async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        self.repository.books.search(query).await
    }

    /// Withdrawn books are only visible to admins
    pub async fn get_book(&self, actor: &Actor, id: i32) -> AppResult<Book> {
        let book = self.repository.books.get_by_id(id).await?;
        if !book.is_active && !actor.is_admin() {
            return Err(AppError::NotFound(format!("Book with id {} not found", id)));
        }
        Ok(book)
    }

    /// Add a title to the catalog with every copy available
    pub async fn create_book(&self, actor: &Actor, book: &CreateBook) -> AppResult<Book> {
        actor.require_admin()?;

        if let Some(ref isbn) = book.isbn {
            if let Some(existing) = self.repository.books.find_by_isbn(&normalize_isbn(isbn)).await? {
                return Err(AppError::Conflict(format!(
                    "A book with ISBN {} already exists (id {})",
                    isbn, existing.id
                )));
            }
        }

        let created = self.repository.books.create(book, Some(actor.id)).await?;
        tracing::info!(book_id = created.id, copies = created.availability.total_copies, "Book added to catalog");
        Ok(created)
    }

    pub async fn update_book(&self, actor: &Actor, id: i32, update: &UpdateBook) -> AppResult<Book> {
        actor.require_admin()?;
        let updated = self.repository.books.update(id, update).await?;
        if update.total_copies.is_some() {
            tracing::info!(
                book_id = id,
                total = updated.availability.total_copies,
                available = updated.availability.available_copies,
                "Book stock resized"
            );
        }
        Ok(updated)
    }

    /// Soft delete; refused while copies are out
    pub async fn delete_book(&self, actor: &Actor, id: i32) -> AppResult<()> {
        actor.require_admin()?;
        self.repository.books.deactivate(id).await?;
        tracing::info!(book_id = id, "Book withdrawn from catalog");
        Ok(())
    }
}

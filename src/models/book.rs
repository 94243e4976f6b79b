//! Book (catalog title) model and copy availability counters

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use unicode_normalization::UnicodeNormalization;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};

static ISBN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{9}[\dX]|\d{13})$").expect("valid ISBN pattern"));

/// Per-title copy counters.
///
/// `available_copies + issued_copies == total_copies` holds at all times and
/// no counter is ever negative. Only the transaction workflow moves copies
/// between `available` and `issued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Availability {
    pub total_copies: i32,
    pub available_copies: i32,
    pub issued_copies: i32,
}

impl Availability {
    pub fn new(total_copies: i32) -> Self {
        Self {
            total_copies,
            available_copies: total_copies,
            issued_copies: 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total_copies >= 0
            && self.available_copies >= 0
            && self.issued_copies >= 0
            && self.available_copies + self.issued_copies == self.total_copies
    }

    pub fn has_available(&self) -> bool {
        self.available_copies > 0
    }

    /// Lend one copy. Returns false, leaving the counters untouched, when
    /// no copy is on the shelf.
    pub fn try_checkout(&mut self) -> bool {
        if self.available_copies <= 0 {
            return false;
        }
        self.available_copies -= 1;
        self.issued_copies += 1;
        true
    }

    /// Take one copy back. Returns false when no copy is out.
    pub fn try_checkin(&mut self) -> bool {
        if self.issued_copies <= 0 {
            return false;
        }
        self.issued_copies -= 1;
        self.available_copies += 1;
        true
    }

    /// Change the number of owned copies without touching issued ones
    pub fn resize(&mut self, total_copies: i32) -> AppResult<()> {
        if total_copies < 0 {
            return Err(AppError::Validation("Total copies cannot be negative".to_string()));
        }
        if total_copies < self.issued_copies {
            return Err(AppError::PolicyViolation(format!(
                "Cannot reduce total copies to {} while {} copies are issued",
                total_copies, self.issued_copies
            )));
        }
        self.total_copies = total_copies;
        self.available_copies = total_copies - self.issued_copies;
        Ok(())
    }
}

/// Shelf location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Location {
    pub section: Option<String>,
    pub shelf: Option<String>,
    pub floor: Option<String>,
}

/// Full book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub pages: Option<i32>,
    pub cover_image: Option<String>,
    pub tags: Vec<String>,
    #[sqlx(flatten)]
    pub location: Location,
    #[sqlx(flatten)]
    pub availability: Availability,
    pub is_active: bool,
    pub added_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn is_lendable(&self) -> bool {
        self.is_active && self.availability.has_available()
    }
}

/// Short book representation embedded in transaction listings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookShort {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub cover_image: Option<String>,
}

impl From<&Book> for BookShort {
    fn from(book: &Book) -> Self {
        Self {
            id: book.id,
            title: book.title.clone(),
            author: book.author.clone(),
            cover_image: book.cover_image.clone(),
        }
    }
}

/// Catalog query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct BookQuery {
    /// Matches title, author or ISBN
    pub search: Option<String>,
    pub genre: Option<String>,
    /// Only titles with at least one copy on the shelf
    pub available: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 255, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, max = 255, message = "Author is required"))]
    pub author: String,
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(range(min = 1, message = "Pages must be positive"))]
    pub pages: Option<i32>,
    #[validate(url(message = "Cover image must be a URL"))]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: Location,
    #[validate(range(min = 0, max = 10000, message = "Total copies must be between 0 and 10000"))]
    pub total_copies: i32,
}

/// Update book request; `total_copies` resizes the stock
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub author: Option<String>,
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(range(min = 1))]
    pub pages: Option<i32>,
    #[validate(url)]
    pub cover_image: Option<String>,
    pub tags: Option<Vec<String>>,
    pub location: Option<Location>,
    #[validate(range(min = 0, max = 10000))]
    pub total_copies: Option<i32>,
}

/// Strip separators from an ISBN ("978-0-7432-7356-5" -> "9780743273565")
pub fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn validate_isbn(isbn: &str) -> Result<(), ValidationError> {
    if ISBN_RE.is_match(&normalize_isbn(isbn)) {
        Ok(())
    } else {
        Err(ValidationError::new("isbn").with_message("ISBN must have 10 or 13 digits".into()))
    }
}

/// Fold a free-text search term so that "Éducation" and "education" match
pub fn normalize_search(term: &str) -> String {
    term.nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .trim()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_and_checkin_keep_counters_consistent() {
        let mut availability = Availability::new(2);

        assert!(availability.try_checkout());
        assert!(availability.try_checkout());
        assert!(!availability.try_checkout());
        assert_eq!(availability.available_copies, 0);
        assert_eq!(availability.issued_copies, 2);
        assert!(availability.is_consistent());

        assert!(availability.try_checkin());
        assert_eq!(availability.available_copies, 1);
        assert!(availability.is_consistent());
    }

    #[test]
    fn test_checkin_without_issued_copy_is_refused() {
        let mut availability = Availability::new(1);
        assert!(!availability.try_checkin());
        assert_eq!(availability, Availability::new(1));
    }

    #[test]
    fn test_resize_cannot_drop_below_issued() {
        let mut availability = Availability::new(3);
        availability.try_checkout();
        availability.try_checkout();

        assert!(matches!(availability.resize(1), Err(AppError::PolicyViolation(_))));
        assert_eq!(availability.total_copies, 3);

        availability.resize(5).unwrap();
        assert_eq!(availability.available_copies, 3);
        assert_eq!(availability.issued_copies, 2);
        assert!(availability.is_consistent());
    }

    #[test]
    fn test_isbn_validation() {
        assert!(validate_isbn("978-0-7432-7356-5").is_ok());
        assert!(validate_isbn("0-306-40615-X").is_ok());
        assert!(validate_isbn("12345").is_err());
    }

    #[test]
    fn test_normalize_search() {
        assert_eq!(normalize_search("  Éducation "), "education");
        assert_eq!(normalize_search("GATSBY"), "gatsby");
    }
}

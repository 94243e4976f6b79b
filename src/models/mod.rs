//! Data models for the library server

pub mod book;
pub mod transaction;
pub mod user;

// Re-export commonly used types
pub use book::{Availability, Book, BookShort};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
pub use user::{Actor, IssuedBook, Role, User, UserShort, UserStatus};

/// Highest page number a listing will seek to
pub const MAX_PAGE: i64 = 100_000;

/// Page number and size of a listing, clamped so the offset stays small
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub per_page: i64,
}

impl PageWindow {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            per_page: per_page.unwrap_or(20).clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

/// Implements Display, FromStr and TEXT column conversions for a
/// string-backed enum that already has `as_str()`.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let s: &str = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
                s.parse().map_err(|e: String| e.into())
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $name {
            fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub(crate) use text_enum;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_defaults() {
        let window = PageWindow::new(None, None);
        assert_eq!(window, PageWindow { page: 1, per_page: 20 });
        assert_eq!(window.offset(), 0);
    }

    #[test]
    fn test_page_window_clamps_extreme_pages() {
        let window = PageWindow::new(Some(i64::MAX), Some(i64::MAX));
        assert_eq!(window.page, MAX_PAGE);
        assert_eq!(window.per_page, 100);
        assert_eq!(window.offset(), (MAX_PAGE - 1) * 100);

        assert_eq!(PageWindow::new(Some(i64::MIN), Some(-5)), PageWindow { page: 1, per_page: 1 });
    }
}

//! SQLite booklet store + HTTP utilities for the gazette pipeline.

mod http;

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use gazette_core::{BookletKey, CandidateRecord, Category, StoredRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use thiserror::Error;
use tracing::debug;

pub use http::{
    retry_after, retry_while_rate_limited, Attempt, FetchError, FetchedResponse, HttpClient,
    HttpClientConfig, RateLimitPolicy,
};

pub const CRATE_NAME: &str = "gazette-storage";

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const ROW_COLUMNS: &str = "id, booklet_type, booklet_number, display_name, description, \
     file_name, extension, number_of_pages, booklet_creation_date, modify_date, \
     published_date, foreign_year, ticket_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{category} booklet #{booklet_number} `{display_name}` is already stored")]
    Duplicate {
        category: Category,
        booklet_number: i64,
        display_name: String,
    },
    #[error("booklet row {0} not found")]
    NotFound(i64),
    #[error("booklet row {row_id} already carries ticket {existing}; refusing to set {requested}")]
    TicketKeyConflict {
        row_id: i64,
        existing: String,
        requested: String,
    },
    #[error("database {0} does not exist")]
    Missing(String),
    #[error("database has {0} pending migration(s); run `gazette migrate` first")]
    PendingMigrations(usize),
    #[error("row {row_id} has unknown booklet_type code {code}")]
    UnknownCategory { row_id: i64, code: i64 },
}

/// Local store of admitted booklet rows.
///
/// One single-connection pool per run; `close` releases the file handle. Every
/// statement runs in its own implicit transaction.
#[derive(Debug, Clone)]
pub struct BookletStore {
    pool: SqlitePool,
}

impl BookletStore {
    /// Opens (creating if missing) the database file and applies pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// Opens an existing, fully migrated database without write access.
    /// Nothing is created and no migration runs.
    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(StoreError::Missing(path.display().to_string()));
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false);
        let pool = Self::pool(options).await?;
        let store = Self { pool };
        store.ensure_migrated().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = Self::pool(options).await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    async fn pool(options: SqliteConnectOptions) -> Result<SqlitePool, StoreError> {
        Ok(SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?)
    }

    async fn ensure_migrated(&self) -> Result<(), StoreError> {
        // A legacy file has no migrations table at all.
        let applied: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
                .fetch_all(&self.pool)
                .await
                .unwrap_or_default();
        let pending = MIGRATOR
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .count();
        if pending > 0 {
            return Err(StoreError::PendingMigrations(pending));
        }
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn insert(&self, record: &CandidateRecord) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO booklet
                (booklet_type, booklet_number, display_name, description, file_name,
                 extension, number_of_pages, booklet_creation_date, modify_date,
                 published_date, foreign_year)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.category.code())
        .bind(record.booklet_number)
        .bind(&record.display_name)
        .bind(&record.description)
        .bind(&record.file_name)
        .bind(&record.extension)
        .bind(record.number_of_pages)
        .bind(&record.creation_date)
        .bind(&record.modify_date)
        .bind(&record.published_date)
        .bind(&record.foreign_year)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                let id = done.last_insert_rowid();
                debug!(
                    id,
                    category = %record.category,
                    booklet = record.booklet_number,
                    "inserted booklet row"
                );
                Ok(id)
            }
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(StoreError::Duplicate {
                category: record.category,
                booklet_number: record.booklet_number,
                display_name: record.display_name.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Row with the highest booklet number in the category (high-water mark).
    pub async fn highest(&self, category: Category) -> Result<Option<StoredRow>, StoreError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM booklet WHERE booklet_type = ? \
             ORDER BY booklet_number DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(category.code())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stored_row_from_sql).transpose()
    }

    pub async fn by_number(
        &self,
        category: Category,
        booklet_number: i64,
    ) -> Result<Option<StoredRow>, StoreError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM booklet WHERE booklet_type = ? AND booklet_number = ? \
             ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(category.code())
            .bind(booklet_number)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stored_row_from_sql).transpose()
    }

    pub async fn all_keys(&self, category: Category) -> Result<HashSet<BookletKey>, StoreError> {
        let rows = sqlx::query(
            "SELECT booklet_number, display_name FROM booklet WHERE booklet_type = ?",
        )
        .bind(category.code())
        .fetch_all(&self.pool)
        .await?;

        let mut keys = HashSet::with_capacity(rows.len());
        for row in rows {
            keys.insert(BookletKey::new(
                row.try_get::<i64, _>("booklet_number")?,
                row.try_get::<String, _>("display_name")?,
            ));
        }
        Ok(keys)
    }

    /// Rows never matched to a ticket, newest booklet first.
    pub async fn without_ticket_key(
        &self,
        min_booklet: Option<i64>,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM booklet \
             WHERE ticket_key IS NULL AND (? IS NULL OR booklet_number >= ?) \
             ORDER BY booklet_number DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(min_booklet)
            .bind(min_booklet)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(stored_row_from_sql).collect()
    }

    /// Records the ticket key on a row. Setting the same key twice is a no-op.
    pub async fn set_ticket_key(&self, row_id: i64, key: &str) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE booklet SET ticket_key = ? WHERE id = ? AND (ticket_key IS NULL OR ticket_key = ?)",
        )
        .bind(key)
        .bind(row_id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 1 {
            debug!(row_id, ticket_key = key, "recorded ticket key");
            return Ok(());
        }

        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT ticket_key FROM booklet WHERE id = ?")
                .bind(row_id)
                .fetch_optional(&self.pool)
                .await?;
        match existing {
            None => Err(StoreError::NotFound(row_id)),
            Some(Some(existing)) if existing != key => Err(StoreError::TicketKeyConflict {
                row_id,
                existing,
                requested: key.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Every stored row for a booklet number, across categories.
    pub async fn rows_by_booklet_number(
        &self,
        booklet_number: i64,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM booklet WHERE booklet_number = ? ORDER BY booklet_type, id"
        );
        let rows = sqlx::query(&sql)
            .bind(booklet_number)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(stored_row_from_sql).collect()
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM booklet")
            .fetch_one(&self.pool)
            .await?)
    }
}

fn stored_row_from_sql(row: &SqliteRow) -> Result<StoredRow, StoreError> {
    let id: i64 = row.try_get("id")?;
    let code: i64 = row.try_get("booklet_type")?;
    let category = Category::from_code(code).ok_or(StoreError::UnknownCategory { row_id: id, code })?;
    Ok(StoredRow {
        id,
        record: CandidateRecord {
            category,
            booklet_number: row.try_get("booklet_number")?,
            display_name: row.try_get("display_name")?,
            description: row.try_get("description")?,
            file_name: row.try_get("file_name")?,
            extension: row.try_get("extension")?,
            number_of_pages: row.try_get("number_of_pages")?,
            creation_date: row.try_get("booklet_creation_date")?,
            modify_date: row.try_get("modify_date")?,
            published_date: row.try_get("published_date")?,
            foreign_year: row.try_get("foreign_year")?,
        },
        ticket_key: row.try_get("ticket_key")?,
    })
}

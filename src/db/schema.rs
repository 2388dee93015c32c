use super::{Annotation, Book, timestamp_column};
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BOOK_COLUMNS: &str = "id, title, author, cover_path, file_path, file_size, file_type, added_at, reading_progress";

const ANNOTATION_COLUMNS: &str = "id, book_id, cfi, text, note, color, created_at";

/// Timestamp columns that older versions wrote as text.
const TIMESTAMP_COLUMNS: [(&str, &str); 2] = [("books", "added_at"), ("annotations", "created_at")];

/// Columns added after the first release, created on open when missing.
const MIGRATED_COLUMNS: [(&str, &str); 2] = [
    ("file_type", "TEXT DEFAULT 'epub'"),
    ("reading_progress", "TEXT"),
];

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        cover_path: row
            .get::<_, Option<String>>(3)?
            .filter(|p| !p.is_empty()),
        file_path: row.get(4)?,
        file_size: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u64,
        file_type: row.get(6)?,
        added_at: timestamp_column(row.get_ref(7)?)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?,
        reading_progress: row.get(8)?,
    })
}

fn annotation_from_row(row: &Row<'_>) -> rusqlite::Result<Annotation> {
    Ok(Annotation {
        id: row.get(0)?,
        book_id: row.get(1)?,
        cfi: row.get(2)?,
        text: row.get(3)?,
        note: row.get::<_, Option<String>>(4)?.filter(|n| !n.is_empty()),
        color: row.get(5)?,
        created_at: timestamp_column(row.get_ref(6)?)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?,
    })
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Database(format!("Failed to enable WAL: {}", e)))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| AppError::Database(format!("Failed to set busy timeout: {}", e)))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| AppError::Database(format!("Failed to enable foreign keys: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        db.migrate()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT,
                cover_path TEXT,
                file_path TEXT NOT NULL,
                file_size INTEGER,
                file_type TEXT DEFAULT 'epub',
                added_at INTEGER NOT NULL,
                reading_progress TEXT
            );

            CREATE TABLE IF NOT EXISTS annotations (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                cfi TEXT NOT NULL,
                text TEXT NOT NULL,
                note TEXT,
                color TEXT NOT NULL DEFAULT 'yellow',
                created_at INTEGER NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_added_at ON books(added_at DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_books_file_path ON books(file_path);
            CREATE INDEX IF NOT EXISTS idx_annotations_book ON annotations(book_id, created_at DESC);
            "#,
        )
        .map_err(|e| AppError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Add columns missing from databases created by older versions.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        for (column, definition) in MIGRATED_COLUMNS {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM pragma_table_info('books') WHERE name = ?1",
                    params![column],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|e| AppError::Database(format!("Failed to inspect schema: {}", e)))?
                .is_some();

            if !exists {
                conn.execute(
                    &format!("ALTER TABLE books ADD COLUMN {} {}", column, definition),
                    [],
                )
                .map_err(|e| AppError::Database(format!("Failed to add column {}: {}", column, e)))?;
                tracing::info!(column, "Migrated books table");
            }
        }

        // Text and integer values do not sort together, so newest-first needs one representation
        for (table, column) in TIMESTAMP_COLUMNS {
            let converted = Self::convert_text_timestamps(&conn, table, column)?;
            if converted > 0 {
                tracing::info!(table, column, rows = converted, "Converted text timestamps");
            }
        }

        Ok(())
    }

    /// Rewrite text timestamps as milliseconds. Unparseable values are left alone.
    fn convert_text_timestamps(conn: &Connection, table: &str, column: &str) -> Result<usize> {
        let rows: Vec<(i64, i64)> = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT rowid, {column} FROM {table} WHERE typeof({column}) = 'text'"
                ))
                .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map([], |row| {
                    let rowid: i64 = row.get(0)?;
                    Ok((rowid, timestamp_column(row.get_ref(1)?)))
                })
                .map_err(|e| AppError::Database(format!("Failed to read timestamps: {}", e)))?;

            let mut converted = Vec::new();
            for row in rows {
                match row {
                    Ok((rowid, Ok(at))) => converted.push((rowid, at.timestamp_millis())),
                    Ok((rowid, Err(e))) => {
                        tracing::warn!(table, column, rowid, error = %e, "Unparseable timestamp")
                    }
                    Err(e) => tracing::warn!(table, column, error = %e, "Skipping unreadable row"),
                }
            }
            converted
        };

        if rows.is_empty() {
            return Ok(0);
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
        for (rowid, ms) in &rows {
            tx.execute(
                &format!("UPDATE {table} SET {column} = ?1 WHERE rowid = ?2"),
                params![ms, rowid],
            )
            .map_err(|e| AppError::Database(format!("Failed to convert timestamp: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| AppError::Database(format!("Failed to commit migration: {}", e)))?;

        Ok(rows.len())
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a new book.
    pub fn insert_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO books ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                BOOK_COLUMNS
            ),
            params![
                book.id,
                book.title,
                book.author,
                book.cover_path,
                book.file_path,
                book.file_size as i64,
                book.file_type,
                book.added_at.timestamp_millis(),
                book.reading_progress,
            ],
        )
        .map_err(|e| AppError::Database(format!("Failed to save book metadata: {}", e)))?;
        Ok(())
    }

    /// List all books, newest first.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM books ORDER BY added_at DESC, rowid DESC",
                BOOK_COLUMNS
            ))
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], book_from_row)
            .map_err(|e| AppError::Database(format!("Failed to fetch books: {}", e)))?;

        // A single unreadable row should not hide the rest of the library
        let mut books = Vec::new();
        for row in rows {
            match row {
                Ok(book) => books.push(book),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable book row"),
            }
        }

        Ok(books)
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
            params![id],
            book_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get book: {}", e)))
    }

    /// Find the ID of the book stored at `path`.
    pub fn book_id_by_path(&self, path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id FROM books WHERE file_path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to look up book: {}", e)))
    }

    /// Set or clear the cover path.
    pub fn update_cover_path(&self, id: &str, cover_path: Option<&str>) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET cover_path = ?1 WHERE id = ?2",
                params![cover_path, id],
            )
            .map_err(|e| AppError::Database(format!("Failed to update book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Save the reading position.
    pub fn update_reading_progress(&self, id: &str, progress: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET reading_progress = ?1 WHERE id = ?2",
                params![progress, id],
            )
            .map_err(|e| AppError::Database(format!("Failed to save progress: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete a book and its annotations.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Database(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== ANNOTATION OPERATIONS ==========

    /// List annotations of a book, newest first.
    pub fn list_annotations(&self, book_id: &str) -> Result<Vec<Annotation>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM annotations WHERE book_id = ?1 ORDER BY created_at DESC, rowid DESC",
                ANNOTATION_COLUMNS
            ))
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let annotations = stmt
            .query_map(params![book_id], annotation_from_row)
            .map_err(|e| AppError::Database(format!("Failed to fetch annotations: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect annotations: {}", e)))?;

        Ok(annotations)
    }

    /// Get an annotation of a book.
    pub fn get_annotation(&self, book_id: &str, id: &str) -> Result<Option<Annotation>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM annotations WHERE id = ?1 AND book_id = ?2",
                ANNOTATION_COLUMNS
            ),
            params![id, book_id],
            annotation_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get annotation: {}", e)))
    }

    /// Insert a new annotation.
    pub fn insert_annotation(&self, annotation: &Annotation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO annotations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                ANNOTATION_COLUMNS
            ),
            params![
                annotation.id,
                annotation.book_id,
                annotation.cfi,
                annotation.text,
                annotation.note,
                annotation.color,
                annotation.created_at.timestamp_millis(),
            ],
        )
        .map_err(|e| AppError::Database(format!("Failed to create annotation: {}", e)))?;
        Ok(())
    }

    /// Replace the note and, when given, the color of an annotation.
    pub fn update_annotation(
        &self,
        book_id: &str,
        id: &str,
        note: Option<&str>,
        color: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE annotations SET note = ?1, color = COALESCE(?2, color)
                 WHERE id = ?3 AND book_id = ?4",
                params![note, color, id, book_id],
            )
            .map_err(|e| AppError::Database(format!("Failed to update annotation: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete an annotation.
    pub fn delete_annotation(&self, book_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM annotations WHERE id = ?1 AND book_id = ?2",
                params![id, book_id],
            )
            .map_err(|e| AppError::Database(format!("Failed to delete annotation: {}", e)))?;
        Ok(rows > 0)
    }
}

//! Book import, cover storage and directory scanning.
//!
//! Every book gets a storage directory `<data>/books/<id>/`. Uploaded files
//! live there as `book.<ext>`; extracted or uploaded covers as `cover.<ext>`.
//! Books picked up by the scanner stay where they are and only use the
//! storage directory for their cover.

mod scanner;

use crate::db::{self, Book, Database};
use crate::error::{AppError, Result};
use crate::formats::cover::ImageKind;
use crate::formats::{self, BookFormat, FILE_ACCEPT, Metadata};
use std::path::{Path, PathBuf};

/// Library operations on top of the database and the storage directory.
#[derive(Clone)]
pub struct Library {
    db: Database,
    storage_root: PathBuf,
}

impl Library {
    /// Create a library storing per-book files under `<data_path>/books`.
    pub fn new(db: Database, data_path: &Path) -> Self {
        Self {
            db,
            storage_root: data_path.join("books"),
        }
    }

    /// Storage directory of a book.
    pub fn storage_dir(&self, id: &str) -> PathBuf {
        self.storage_root.join(id)
    }

    /// Whether `path` lives inside a per-book storage directory.
    fn is_managed(&self, path: &Path) -> bool {
        path.strip_prefix(&self.storage_root)
            .map(|rel| rel.components().count() > 1)
            .unwrap_or(false)
    }

    /// Get a book or fail with `NotFound`.
    pub fn book(&self, id: &str) -> Result<Book> {
        self.db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
    }

    /// Store an uploaded book file and register it.
    pub fn import_upload(&self, filename: &str, data: &[u8]) -> Result<Book> {
        let format = BookFormat::from_path(Path::new(filename)).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unsupported file type: {} (supported: {})",
                filename, *FILE_ACCEPT
            ))
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.storage_dir(&id);
        std::fs::create_dir_all(&dir)?;

        let book_path = dir.join(format!("book{}", format.extension()));
        let result = std::fs::write(&book_path, data)
            .map_err(AppError::from)
            .and_then(|_| {
                self.import_file(
                    &id,
                    &book_path,
                    format,
                    &title_from_filename(filename),
                    data.len() as u64,
                )
            });

        if result.is_err() {
            let _ = std::fs::remove_dir_all(&dir);
        }

        result
    }

    /// Extract metadata and cover of a file and insert it as a new book.
    pub fn import_file(
        &self,
        id: &str,
        path: &Path,
        format: BookFormat,
        fallback_title: &str,
        file_size: u64,
    ) -> Result<Book> {
        let (metadata, cover_path) = self.extract(id, path, format, fallback_title);

        let book = Book {
            id: id.to_string(),
            title: metadata.title,
            author: metadata.author,
            cover_path: cover_path.map(|p| p.to_string_lossy().into_owned()),
            file_path: path.to_string_lossy().into_owned(),
            file_size,
            file_type: format,
            added_at: db::now(),
            reading_progress: None,
        };

        self.db.insert_book(&book)?;
        tracing::info!(book_id = %book.id, title = %book.title, author = %book.author, "Added book");

        Ok(book)
    }

    /// Run the format handler. Failures degrade to file-name metadata and no cover.
    fn extract(
        &self,
        id: &str,
        path: &Path,
        format: BookFormat,
        fallback_title: &str,
    ) -> (Metadata, Option<PathBuf>) {
        let handler = formats::get_handler(format);

        let metadata = handler
            .extract_metadata(path, fallback_title)
            .unwrap_or_else(|e| {
                tracing::debug!(path = %path.display(), error = %e, "Failed to extract metadata");
                Metadata::fallback(fallback_title)
            });

        let cover = match handler.extract_cover(path) {
            Ok(Some(data)) => match self.write_cover(id, &data) {
                Ok(cover_path) => Some(cover_path),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to save cover");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Failed to extract cover");
                None
            }
        };

        (metadata, cover)
    }

    /// Write cover bytes into the book's storage directory.
    fn write_cover(&self, id: &str, data: &[u8]) -> Result<PathBuf> {
        let kind = ImageKind::detect(data)
            .ok_or_else(|| AppError::BadRequest("Invalid image file".to_string()))?;

        let dir = self.storage_dir(id);
        std::fs::create_dir_all(&dir)?;

        // Only one cover per book
        for other in ImageKind::ALL.iter().filter(|k| **k != kind) {
            let stale = dir.join(format!("cover.{}", other.extension()));
            if stale.exists() {
                std::fs::remove_file(&stale)?;
            }
        }

        let cover_path = dir.join(format!("cover.{}", kind.extension()));
        std::fs::write(&cover_path, data)?;
        Ok(cover_path)
    }

    /// Replace the cover of a book with an uploaded image.
    pub fn set_cover(&self, id: &str, data: &[u8]) -> Result<String> {
        self.book(id)?;

        let cover_path = self.write_cover(id, data)?.to_string_lossy().into_owned();
        if !self.db.update_cover_path(id, Some(&cover_path))? {
            return Err(AppError::NotFound("Book not found".to_string()));
        }

        tracing::info!(book_id = %id, cover = %cover_path, "Cover replaced");
        Ok(cover_path)
    }

    /// Delete a book, its annotations, its file and its storage directory.
    pub fn remove(&self, id: &str) -> Result<Book> {
        let book = self.book(id)?;
        self.db.delete_book(id)?;

        if let Err(e) = std::fs::remove_file(&book.file_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(book_id = %id, path = %book.file_path, error = %e, "Failed to delete book file");
        }

        let dir = self.storage_dir(id);
        if dir.exists()
            && let Err(e) = std::fs::remove_dir_all(&dir)
        {
            tracing::warn!(book_id = %id, path = %dir.display(), error = %e, "Failed to delete storage directory");
        }

        tracing::info!(book_id = %id, title = %book.title, "Deleted book");
        Ok(book)
    }
}

/// Title fallback: the uploaded file name without directories or extension.
pub fn title_from_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(base)
        .to_string()
}

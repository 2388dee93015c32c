//! Directory scanning.

use super::Library;
use crate::config::ScanConfig;
use crate::db::Book;
use crate::error::{AppError, Result};
use crate::formats::BookFormat;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use walkdir::WalkDir;

impl Library {
    /// Register every supported file in `books_dir` that is not yet in the library.
    ///
    /// Only the top level is listed unless `options.recursive` is set. Files
    /// inside per-book storage directories are never picked up. Returns the
    /// added books sorted by path.
    pub fn scan_directory(&self, books_dir: &Path, options: &ScanConfig) -> Result<Vec<Book>> {
        let dir_meta = std::fs::metadata(books_dir).map_err(|e| {
            AppError::Config(format!(
                "Cannot read books directory {}: {}",
                books_dir.display(),
                e
            ))
        })?;
        if !dir_meta.is_dir() {
            return Err(AppError::Config(format!(
                "Books path is not a directory: {}",
                books_dir.display()
            )));
        }

        let start = std::time::Instant::now();
        let max_depth = if options.recursive { usize::MAX } else { 1 };

        let files: Vec<(PathBuf, BookFormat)> = WalkDir::new(books_dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| !self.is_managed(e.path()))
            .filter_map(|e| {
                let format = BookFormat::from_path(e.path())?;
                Some((e.into_path(), format))
            })
            .collect();

        let mut to_process = Vec::new();
        let mut known = 0;
        for (path, format) in files {
            match self.db.book_id_by_path(&path.to_string_lossy()) {
                Ok(Some(_)) => {
                    known += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to look up book");
                    continue;
                }
            }

            match std::fs::metadata(&path) {
                Ok(meta) => to_process.push((path, format, meta.len())),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to stat file"),
            }
        }

        if to_process.is_empty() {
            tracing::debug!(dir = %books_dir.display(), known, "No new books");
            return Ok(Vec::new());
        }

        let workers = options.workers.max(1);
        let total = to_process.len();
        tracing::info!(new = total, known, workers, "Processing new files");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build scan pool: {}", e)))?;

        let processed = AtomicUsize::new(0);
        let mut added: Vec<Book> = pool.install(|| {
            to_process
                .par_iter()
                .filter_map(|(path, format, size)| {
                    let id = uuid::Uuid::new_v4().to_string();
                    let fallback = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("Unknown");

                    let result = self.import_file(&id, path, *format, fallback, *size);

                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if done.is_multiple_of(100) || done == total {
                        tracing::info!("Processing... {}/{} ({}%)", done, total, done * 100 / total);
                    }

                    match result {
                        Ok(book) => Some(book),
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Failed to import book");
                            None
                        }
                    }
                })
                .collect()
        });

        added.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        tracing::info!(added = added.len(), elapsed = ?start.elapsed(), "Scan complete");

        Ok(added)
    }
}

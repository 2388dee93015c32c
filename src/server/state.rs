//! Application state shared across handlers.

use crate::config::Config;
use crate::db::{Book, Database};
use crate::error::Result;
use crate::library::Library;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Import, cover and scan operations.
    pub library: Library,
    /// Whether a scan is currently in progress.
    scanning: Arc<AtomicBool>,
}

impl AppState {
    /// Create new application state with database.
    pub fn new(config: Config, db: Database) -> Self {
        let library = Library::new(db.clone(), &config.storage.data_path);
        Self {
            config: Arc::new(config),
            db,
            library,
            scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Scan the books directory. Returns an empty list if a scan is already running.
    pub fn scan(&self) -> Result<Vec<Book>> {
        // Prevent concurrent scans
        if self.scanning.swap(true, Ordering::SeqCst) {
            tracing::info!("Scan already in progress, skipping");
            return Ok(Vec::new());
        }

        let books_dir = self.config.storage.books_dir();
        tracing::info!(dir = %books_dir.display(), "Scanning books directory");

        let result = self.library.scan_directory(&books_dir, &self.config.scan);
        self.scanning.store(false, Ordering::SeqCst);
        result
    }

    /// Start a background scan (non-blocking).
    pub fn start_background_scan(&self) {
        let state = self.clone();
        std::thread::spawn(move || {
            if let Err(e) = state.scan() {
                tracing::error!(error = %e, "Background scan failed");
            }
        });
    }

    /// Rescan every `scan.interval_seconds`. Does nothing when the interval is 0.
    pub fn start_periodic_scan(&self) {
        if self.config.scan.interval_seconds == 0 {
            return;
        }

        let state = self.clone();
        let interval = Duration::from_secs(self.config.scan.interval_seconds);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;
                tracing::debug!("Running scheduled rescan");

                let state = state.clone();
                match tokio::task::spawn_blocking(move || state.scan()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "Scheduled rescan failed"),
                    Err(e) => tracing::warn!(error = %e, "Scheduled rescan panicked"),
                }
            }
        });
    }
}

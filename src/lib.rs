//! bookland: a self-hosted e-book library backend.
//!
//! Books are uploaded over HTTP or picked up from a scanned directory,
//! their metadata and covers are extracted on import, and the web client
//! reads them through a small JSON API that also stores reading progress
//! and annotations.
//!
//! # Features
//!
//! - EPUB, PDF, MOBI, AZW3, FB2 and CBZ support
//! - Title, author and cover extraction
//! - Directory scanning with parallel metadata extraction
//! - Reading progress and highlight annotations
//! - Optional serving of the built single-page web client

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book format handlers.
pub mod formats;
/// Import, covers and scanning.
pub mod library;
/// HTTP server.
pub mod server;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use library::Library;
pub use server::AppState;

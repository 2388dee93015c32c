use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Self-hosted ebook library and reader backend.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "bookland")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKLAND_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Directory holding the database and per-book storage.
    #[arg(long, env = "DATA_PATH", global = true)]
    pub data_path: Option<PathBuf>,

    /// Directory scanned for books.
    #[arg(long, env = "BOOKS_PATH", global = true)]
    pub books_path: Option<PathBuf>,

    /// Directory with the built web client.
    #[arg(long, env = "STATIC_PATH", global = true)]
    pub static_path: Option<PathBuf>,

    /// Origin allowed to call the API cross-origin.
    #[arg(long, env = "CORS_ORIGIN", global = true)]
    pub cors_origin: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve,

    /// Write a default config file and create the database.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Scan the books directory once and print the added books.
    Scan,

    /// Print the supported formats.
    Formats,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Scan configuration.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Upload limits.
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to bind on all interfaces.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Built web client served for non-API paths.
    #[serde(default)]
    pub static_path: Option<PathBuf>,

    /// Origin allowed for cross-origin API calls.
    #[serde(default)]
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            static_path: None,
            cors_origin: None,
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file and per-book storage live here.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Directory scanned for books. Defaults to `<data_path>/books`.
    #[serde(default)]
    pub books_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            books_path: None,
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

impl StorageConfig {
    /// SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_path.join("books.db")
    }

    /// Effective books directory.
    pub fn books_dir(&self) -> PathBuf {
        self.books_path
            .clone()
            .unwrap_or_else(|| self.data_path.join("books"))
    }
}

/// Scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Scan the books directory when the server starts.
    #[serde(default = "default_true")]
    pub on_startup: bool,

    /// Descend into subdirectories.
    #[serde(default)]
    pub recursive: bool,

    /// Number of parallel workers for metadata extraction (1 = sequential).
    /// Keep low for NAS/network storage to avoid saturation.
    #[serde(default = "default_scan_workers")]
    pub workers: usize,

    /// Rescan interval in seconds (0 to disable).
    #[serde(default)]
    pub interval_seconds: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            recursive: false,
            workers: default_scan_workers(),
            interval_seconds: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scan_workers() -> usize {
    1
}

/// Upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum book upload size in MiB.
    #[serde(default = "default_max_book_mb")]
    pub max_book_mb: usize,

    /// Maximum cover upload size in MiB.
    #[serde(default = "default_max_cover_mb")]
    pub max_cover_mb: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_book_mb: default_max_book_mb(),
            max_cover_mb: default_max_cover_mb(),
        }
    }
}

fn default_max_book_mb() -> usize {
    100
}

fn default_max_cover_mb() -> usize {
    10
}

impl UploadConfig {
    /// Book upload limit in bytes.
    pub fn max_book_bytes(&self) -> usize {
        self.max_book_mb.saturating_mul(1024 * 1024)
    }

    /// Cover upload limit in bytes.
    pub fn max_cover_bytes(&self) -> usize {
        self.max_cover_mb.saturating_mul(1024 * 1024)
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Load the config file named on the command line, or the first one found
    /// in the default locations, then apply CLI and environment overrides.
    pub fn from_cli(cli: &Cli) -> crate::error::Result<Self> {
        let path = cli.config.clone().or_else(Self::find_config_file);

        let mut config = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading config");
                Self::load(&path)?
            }
            None => Self::default(),
        };

        config.apply_overrides(cli);
        config.resolve_paths()?;
        Ok(config)
    }

    /// Apply flag and environment overrides.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(path) = &cli.data_path {
            self.storage.data_path = path.clone();
        }
        if let Some(path) = &cli.books_path {
            self.storage.books_path = Some(path.clone());
        }
        if let Some(path) = &cli.static_path {
            self.server.static_path = Some(path.clone());
        }
        if let Some(origin) = &cli.cors_origin {
            self.server.cors_origin = Some(origin.clone()).filter(|o| !o.is_empty());
        }
    }

    /// Make every configured path absolute, relative to the working directory.
    pub fn resolve_paths(&mut self) -> crate::error::Result<()> {
        let cwd = std::env::current_dir().map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read working directory: {}", e))
        })?;

        let absolute = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };

        self.storage.data_path = absolute(&self.storage.data_path);
        self.storage.books_path = self.storage.books_path.as_deref().map(absolute);
        self.server.static_path = self.server.static_path.as_deref().map(absolute);
        Ok(())
    }

    /// Load `.env` files from `dir` and its parent into the process
    /// environment. Variables that are already set are kept. Returns every
    /// file found with the outcome of loading it.
    pub fn load_env_files(dir: &Path) -> Vec<(PathBuf, crate::error::Result<()>)> {
        let mut candidates = vec![dir.join(".env")];
        if let Some(parent) = dir.parent() {
            candidates.push(parent.join(".env"));
        }

        candidates
            .into_iter()
            .filter(|path| path.is_file())
            .map(|path| {
                let loaded = dotenvy::from_path(&path).map_err(|e| {
                    crate::error::AppError::Config(format!("Failed to load {}: {}", path.display(), e))
                });
                (path, loaded)
            })
            .collect()
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("bookland.toml"),
            dirs::config_dir()
                .map(|p| p.join("bookland").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bookland/config.toml"),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# bookland configuration

[server]
port = 8080
# Built web client, served for every non-API path
# static_path = "./client/dist"
# Allow cross-origin API calls from a dev server
# cors_origin = "http://localhost:5173"

[storage]
data_path = "./data"
# Directory scanned for books (defaults to <data_path>/books)
# books_path = "/mnt/nas/Ebooks"

[scan]
on_startup = true
recursive = false
# Parallel metadata extraction workers (keep low on NAS storage)
workers = 1
# Rescan interval in seconds (0 to disable)
interval_seconds = 0

[upload]
max_book_mb = 100
max_cover_mb = 10
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_to_defaults() {
        let config: Config = toml::from_str(&Config::generate_default()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.static_path.is_none());
        assert!(config.server.cors_origin.is_none());
        assert_eq!(config.storage.data_path, PathBuf::from("./data"));
        assert!(config.scan.on_startup);
        assert!(!config.scan.recursive);
        assert_eq!(config.scan.workers, 1);
        assert_eq!(config.upload.max_book_mb, 100);
        assert_eq!(config.upload.max_cover_mb, 10);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.books_dir(), PathBuf::from("./data/books"));
        assert_eq!(config.upload.max_cover_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config: Config = toml::from_str(
            r#"
[server]
port = 3000
cors_origin = "http://a.example"

[storage]
data_path = "/srv/data"
"#,
        )
        .unwrap();

        let cli = Cli {
            port: Some(9000),
            books_path: Some(PathBuf::from("/srv/books")),
            cors_origin: Some(String::new()),
            ..Cli::default()
        };
        config.apply_overrides(&cli);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.data_path, PathBuf::from("/srv/data"));
        assert_eq!(config.storage.books_dir(), PathBuf::from("/srv/books"));
        assert!(config.server.cors_origin.is_none());
    }

    #[test]
    fn env_file_in_parent_directory_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let server_dir = dir.path().join("server");
        std::fs::create_dir_all(&server_dir).unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "BOOKLAND_TEST_PARENT_ENV=/srv/ebooks\n",
        )
        .unwrap();

        let loaded = Config::load_env_files(&server_dir);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, dir.path().join(".env"));
        assert!(loaded[0].1.is_ok());
        assert_eq!(
            std::env::var("BOOKLAND_TEST_PARENT_ENV").as_deref(),
            Ok("/srv/ebooks")
        );
    }

    #[test]
    fn relative_paths_become_absolute() {
        let mut config = Config::default();
        config.resolve_paths().unwrap();
        assert!(config.storage.data_path.is_absolute());
        assert!(config.storage.books_dir().is_absolute());
        assert!(config.storage.db_path().ends_with("books.db"));
    }
}

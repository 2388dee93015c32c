//! bookland server entry point.

use bookland::{
    config::{Cli, Command, Config},
    db::Database,
    server::{self, FormatsResponse},
};
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The web client's dev server reads the same ../.env
    let env_files = match std::env::current_dir() {
        Ok(cwd) => Config::load_env_files(&cwd),
        Err(_) => Vec::new(),
    };
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookland=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    for (path, loaded) in &env_files {
        match loaded {
            Ok(()) => tracing::info!(path = %path.display(), "Loaded environment file"),
            Err(e) => tracing::warn!(error = %e, "Ignoring environment file"),
        }
    }

    match cli.command.clone() {
        Some(Command::Init { force }) => cmd_init(&cli, force),
        Some(Command::Formats) => cmd_formats(),
        Some(Command::Scan) => cmd_scan(Config::from_cli(&cli)?).await,
        Some(Command::Serve) | None => cmd_serve(Config::from_cli(&cli)?).await,
    }
}

/// Open the database and make sure the storage directories exist.
fn open_storage(config: &Config) -> anyhow::Result<Database> {
    std::fs::create_dir_all(config.storage.data_path.join("books"))?;
    Ok(Database::open(&config.storage.db_path())?)
}

/// Write a default config file and create the database.
fn cmd_init(cli: &Cli, force: bool) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let mut config = Config::load(&config_path)?;
    config.apply_overrides(cli);
    config.resolve_paths()?;

    open_storage(&config)?;
    println!("Initialized database: {}", config.storage.db_path().display());

    println!("\nEdit {} to configure your server.", config_path.display());
    println!("Then run: bookland serve");

    Ok(())
}

/// Print the supported formats.
fn cmd_formats() -> anyhow::Result<()> {
    let formats = FormatsResponse::current();
    println!("{}", serde_json::to_string_pretty(&formats)?);
    Ok(())
}

/// Scan the books directory once.
async fn cmd_scan(config: Config) -> anyhow::Result<()> {
    let db = open_storage(&config)?;
    let state = server::AppState::new(config, db);

    let books = tokio::task::spawn_blocking(move || state.scan()).await??;

    if books.is_empty() {
        println!("No new books found.");
    } else {
        println!("Added {} book(s):", books.len());
        for book in &books {
            let author = if book.author.is_empty() {
                "unknown author"
            } else {
                book.author.as_str()
            };
            println!("  {} - {} [{}] {}", book.title, author, book.file_type, book.file_path);
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let db = open_storage(&config)?;

    tracing::info!(
        port = config.server.port,
        data = %config.storage.data_path.display(),
        books = %config.storage.books_dir().display(),
        "Starting bookland server"
    );

    let port = config.server.port;
    let state = server::AppState::new(config, db);

    // Scan in the background; the server starts immediately
    if state.config.scan.on_startup {
        state.start_background_scan();
    }
    state.start_periodic_scan();

    let app = server::create_router(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(address = %listener.local_addr()?, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

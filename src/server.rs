//! HTTP server and routes.

pub(crate) mod handlers;
mod state;

pub use handlers::FormatsResponse;
pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{delete, get, post, put},
};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload = &state.config.upload;
    let book_limit = DefaultBodyLimit::max(upload.max_book_bytes());
    let cover_limit = DefaultBodyLimit::max(upload.max_cover_bytes());

    let book_routes = Router::new()
        .route("/", get(handlers::list_books))
        .route("/", post(handlers::upload_book).layer(book_limit))
        .route("/{id}", get(handlers::get_book))
        .route("/{id}", delete(handlers::delete_book))
        .route("/{id}/file", get(handlers::serve_book_file))
        .route("/{id}/cover", get(handlers::serve_cover))
        .route("/{id}/cover", post(handlers::upload_cover).layer(cover_limit))
        .route("/{id}/progress", put(handlers::save_progress))
        // Annotations by book
        .route("/{id}/annotations", get(handlers::list_annotations))
        .route("/{id}/annotations", post(handlers::create_annotation))
        // Annotation by ID
        .route(
            "/{id}/annotations/{annotation_id}",
            put(handlers::update_annotation),
        )
        .route(
            "/{id}/annotations/{annotation_id}",
            delete(handlers::delete_annotation),
        );

    let api_routes = Router::new()
        .nest("/books", book_routes)
        .route("/scan", post(handlers::scan))
        .route("/formats", get(handlers::list_formats))
        .fallback(handlers::api_not_found);

    let mut router = Router::new().nest("/api", api_routes);

    if let Some(static_path) = &state.config.server.static_path {
        tracing::info!(path = %static_path.display(), "Serving web client");
        // Unknown paths get index.html so client-side routes survive a reload
        let spa = ServeDir::new(static_path)
            .fallback(ServeFile::new(static_path.join("index.html")));
        router = router.fallback_service(spa);
    }

    let mut router = router.layer(TraceLayer::new_for_http());

    if let Some(origin) = &state.config.server.cors_origin {
        match cors_layer(origin) {
            Some(cors) => router = router.layer(cors),
            None => tracing::warn!(origin = %origin, "Invalid CORS origin, CORS disabled"),
        }
    }

    router.with_state(state)
}

/// CORS for exactly one allowed origin.
fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let origin = origin.parse::<HeaderValue>().ok()?;

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE])
            .max_age(Duration::from_secs(86400)),
    )
}

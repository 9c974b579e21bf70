//! Documentation of a bio-link profile service.
//!
//! Backend for a "one page of links" profile builder: an admin curates any
//! number of public profile pages (links, content blocks, a theme document),
//! visitors view them and click through, and the service keeps contact
//! messages plus privacy-preserving analytics.
//!
//!
//!
//! # General Infrastructure
//! - Frontend talks to this server over JSON; profile rendering happens client-side
//! - Server sits behind a reverse proxy which forwards the client address in `X-Forwarded-For`
//! - Redis is the only stateful dependency; every collection is a hash of JSON documents
//! - Avatar uploads land on local disk and are served back under `/uploads`
//!
//!
//!
//! # Analytics
//!
//! **Goal**: useful dashboards without storing anything that identifies a visitor.
//!
//! - Views and clicks arrive at `POST /api/events`; link redirects (`GET /r/{slug}/{id}`) count as clicks on their own
//! - The client address is hashed with a salt that rotates daily, then discarded
//! - Referrers are collapsed into a closed set of sources before they are counted
//! - Every event is one atomic Redis pipeline; see [`analytics`]
//!
//!
//!
//! # Sessions
//!
//! - Admin login sets one cookie: an XChaCha20-Poly1305 sealed JSON payload
//! - No server-side session table; expiry lives inside the sealed payload
//! - See [`session`] for the exact cookie format
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod analytics;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod referrer;
pub mod routes;
pub mod session;
pub mod state;
pub mod utils;

use routes::{
    avatar_handler, clear_messages_handler, create_profile_handler, delete_profile_handler,
    events_handler, get_profile_handler, health_handler, list_messages_handler,
    list_profiles_handler, login_handler, logout_handler, message_handler, profile_handler,
    redirect_handler, stats_handler, update_profile_handler,
};
use state::State;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting server...");

    let origin = state
        .config
        .public_origin
        .parse::<HeaderValue>()
        .expect("Origin misconfigured!");

    // Credentialed CORS: the session cookie must ride along, so the origin is exact.
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(origin)
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/p/{slug}", get(profile_handler))
        .route("/p/{slug}/messages", post(message_handler))
        .route("/r/{slug}/{link_id}", get(redirect_handler))
        .route("/api/events", post(events_handler))
        .route("/admin/login", post(login_handler))
        .route("/admin/logout", post(logout_handler))
        .route(
            "/admin/profiles",
            get(list_profiles_handler).post(create_profile_handler),
        )
        .route(
            "/admin/profiles/{slug}",
            get(get_profile_handler)
                .put(update_profile_handler)
                .delete(delete_profile_handler),
        )
        .route(
            "/admin/profiles/{slug}/messages",
            get(list_messages_handler).delete(clear_messages_handler),
        )
        .route("/admin/profiles/{slug}/stats", get(stats_handler))
        .route("/admin/profiles/{slug}/avatar", post(avatar_handler))
        .nest_service("/uploads", ServeDir::new(&state.config.uploads_dir))
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

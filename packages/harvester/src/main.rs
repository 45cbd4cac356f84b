mod config;
mod digest;
mod error;
mod handlers;
mod identity;
mod interceptor;
mod models;
mod payload;
mod scraper;
mod search;
mod search_url;
mod session;
mod signing;
mod sse;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::config::Settings;
use crate::session::chromium::ChromiumFactory;
use crate::session::SessionFactory;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Opens one isolated browser session per request
    pub factory: Arc<dyn SessionFactory>,
    pub started_at: Instant,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if exists)
    dotenvy::dotenv().ok();

    init_tracing();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load settings: {}", e);
        e
    })?;
    let settings = Arc::new(settings);

    info!(
        server_host = %settings.server.host,
        server_port = %settings.server.port,
        home_url = %settings.browser.home_url,
        headless = settings.browser.headless,
        "Starting harvester server"
    );

    let app_state = web::Data::new(AppState {
        settings: settings.clone(),
        factory: Arc::new(ChromiumFactory::new(settings.browser.clone())),
        started_at: Instant::now(),
    });

    let server_host = settings.server.host.clone();
    let server_port = settings.server.port;
    let cors_origins = settings.server.cors_allowed_origins.clone();
    let max_body_size = settings.server.max_body_size;

    info!("Binding to {}:{}", server_host, server_port);

    HttpServer::new(move || {
        let cors = build_cors(&cors_origins);

        App::new()
            .app_data(app_state.clone())
            .wrap(TracingLogger::default())
            .wrap(cors)
            .configure(|cfg| handlers::configure(cfg, max_body_size))
    })
    .bind((server_host.as_str(), server_port))
    .map_err(|e| {
        eprintln!("Failed to bind to {}:{}: {}", server_host, server_port, e);
        anyhow::anyhow!("Failed to bind server: {}", e)
    })?
    .workers(num_cpus::get())
    .shutdown_timeout(settings.server.shutdown_timeout_secs)
    .run()
    .await
    .map_err(|e| {
        eprintln!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    info!("Server shutting down");
    Ok(())
}

/// Initialize tracing/logging subscriber
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Build CORS configuration
fn build_cors(allowed_origins: &str) -> Cors {
    if allowed_origins == "*" {
        Cors::permissive()
    } else {
        let origins: Vec<&str> = allowed_origins.split(',').map(|s| s.trim()).collect();
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::ACCEPT,
            ])
            .max_age(3600);

        for origin in origins {
            cors = cors.allowed_origin(origin);
        }

        cors
    }
}

use crate::error::{AppError, AppResult};
use crate::interceptor::Interceptor;
use crate::models::{
    BodyReport, HealthResponse, ScrapeBrowserRequest, ScrapeBrowserResponse, ScrapeRequest,
    ScrapeResponse, SignRequest, SignResponse,
};
use crate::scraper::Scraper;
use crate::search::SearchRequest;
use crate::signing::TokenPipeline;
use crate::AppState;
use actix_web::{web, HttpResponse};
use std::time::Duration;
use tracing::{info, instrument};

/// Upper bound accepted for a caller-supplied interception timeout
const MAX_TIMEOUT_SECS: f64 = 600.0;

/// Register every route; `max_body_size` bounds JSON request bodies
pub fn configure(cfg: &mut web::ServiceConfig, max_body_size: usize) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(max_body_size)
            .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into()),
    )
    .route("/health", web::get().to(health_check_handler))
    .route("/sign", web::post().to(sign_handler))
    .route("/scrape", web::post().to(scrape_handler))
    .route("/scrape-browser", web::post().to(scrape_browser_handler));
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health_check_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// Derive request tokens for a search
#[instrument(skip(state, body))]
pub async fn sign_handler(
    state: web::Data<AppState>,
    body: web::Json<SignRequest>,
) -> AppResult<HttpResponse> {
    let SignRequest {
        search_request,
        session_ids,
    } = body.into_inner();
    let search = SearchRequest::try_from(search_request)?;
    let ids = session_ids.unwrap_or_default().resolve();

    info!(
        origin = %search.origin,
        destination = %search.destination,
        batch_id = %ids.batch_id,
        "Signing search request"
    );

    let tokens = TokenPipeline::new(state.factory.clone(), state.settings.clone())
        .derive(&search, &ids)
        .await?;

    Ok(HttpResponse::Ok().json(SignResponse {
        status: "success",
        tokens,
    }))
}

/// Sign and call the search API from inside a live page
#[instrument(skip(state, body))]
pub async fn scrape_handler(
    state: web::Data<AppState>,
    body: web::Json<ScrapeRequest>,
) -> AppResult<HttpResponse> {
    let url = required_url(&body.url)?;
    info!(url = %url, "Direct search requested");

    let outcome = Scraper::new(state.factory.clone(), state.settings.clone())
        .scrape(url)
        .await?;

    let preview_chars = state.settings.interception.raw_preview_chars;
    Ok(HttpResponse::Ok().json(ScrapeResponse {
        status: "success",
        data: BodyReport::new(outcome.decoded, &outcome.body, preview_chars)
            .with_status_code(outcome.status_code),
        tokens: outcome.tokens,
    }))
}

/// Open a search page and capture its result stream
#[instrument(skip(state, body))]
pub async fn scrape_browser_handler(
    state: web::Data<AppState>,
    body: web::Json<ScrapeBrowserRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let url = required_url(&request.url)?;
    let timeout = match request.timeout_secs {
        None => state.settings.interception.default_timeout(),
        Some(secs) if secs > 0.0 && secs <= MAX_TIMEOUT_SECS => Duration::from_secs_f64(secs),
        Some(secs) => {
            return Err(AppError::InvalidInput(format!(
                "timeoutSecs must be in (0, {}], got {}",
                MAX_TIMEOUT_SECS, secs
            )))
        }
    };
    info!(url = %url, timeout_secs = timeout.as_secs_f64(), "Browser capture requested");

    let outcome = Interceptor::new(state.factory.clone(), state.settings.clone())
        .intercept(url, timeout)
        .await?;

    let preview_chars = state.settings.interception.raw_preview_chars;
    let report = BodyReport::new(outcome.decoded, &outcome.body, preview_chars);
    Ok(HttpResponse::Ok().json(ScrapeBrowserResponse {
        status: "success",
        url: outcome.url,
        status_code: outcome.status_code,
        report,
        timestamp: outcome.captured_at.timestamp_millis(),
    }))
}

fn required_url(url: &str) -> AppResult<&str> {
    let url = url.trim();
    if url.is_empty() {
        return Err(AppError::InvalidInput("url is required".to_string()));
    }
    Ok(url)
}

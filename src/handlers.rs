use crate::errors::{CoinEngineError, Result};
use crate::metrics;
use crate::models::{AuthRequest, SendCoinRequest};
use crate::security_middleware::Claims;
use crate::services::CoinService;
use actix_web::error::ResponseError;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Bounded retry for mutations that failed before commit (deadlock aborts,
/// pool timeouts). Anything else is surfaced immediately; retrying a
/// possibly-committed mutation would risk a double effect.
const MAX_RETRIES: u32 = 2;

async fn retry_transient<T, F, Fut>(operation: &str, call: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(
                    "{} hit a transient storage failure (attempt {}): {}",
                    operation, attempt, err
                );
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

fn status_label<T>(result: &Result<T>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "error"
    }
}

fn log_failure(operation: &str, err: &CoinEngineError) {
    if err.status_code().is_server_error() {
        error!("{} failed: {}", operation, err);
    } else {
        warn!("{} rejected: {}", operation, err);
    }
}

fn account_id_from(req: &HttpRequest) -> Result<i64> {
    req.extensions()
        .get::<Claims>()
        .and_then(|claims| claims.account_id())
        .ok_or(CoinEngineError::Unauthorized)
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "coin-engine",
        "version": "1.0.0"
    }))
}

/// Authenticate endpoint; creates the account on first authentication.
pub async fn authenticate(
    service: web::Data<Arc<CoinService>>,
    request: web::Json<AuthRequest>,
) -> std::result::Result<HttpResponse, CoinEngineError> {
    let result = service.authenticate(request.into_inner()).await;
    metrics::AUTH_TOTAL
        .with_label_values(&[status_label(&result)])
        .inc();

    match result {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(err) => {
            log_failure("authentication", &err);
            Err(err)
        }
    }
}

/// User info endpoint: balance, inventory and coin history.
pub async fn user_info(
    service: web::Data<Arc<CoinService>>,
    req: HttpRequest,
) -> std::result::Result<HttpResponse, CoinEngineError> {
    let account_id = account_id_from(&req)?;
    let info = service.get_user_info(account_id).await.map_err(|err| {
        log_failure("info query", &err);
        err
    })?;

    Ok(HttpResponse::Ok().json(info))
}

/// Coin transfer endpoint.
pub async fn send_coin(
    service: web::Data<Arc<CoinService>>,
    req: HttpRequest,
    request: web::Json<SendCoinRequest>,
) -> std::result::Result<HttpResponse, CoinEngineError> {
    let sender_id = account_id_from(&req)?;
    let request = request.into_inner();

    let timer = metrics::LEDGER_OP_DURATION
        .with_label_values(&["transfer"])
        .start_timer();
    let result = retry_transient("transfer", || service.send_coins(sender_id, request.clone())).await;
    timer.observe_duration();

    metrics::TRANSFERS_TOTAL
        .with_label_values(&[status_label(&result)])
        .inc();

    match result {
        Ok(()) => Ok(HttpResponse::Ok().finish()),
        Err(err) => {
            log_failure("transfer", &err);
            Err(err)
        }
    }
}

#[derive(serde::Deserialize)]
pub struct BuyQuery {
    quantity: Option<i64>,
}

/// Merch purchase endpoint; quantity defaults to 1.
pub async fn buy_item(
    service: web::Data<Arc<CoinService>>,
    req: HttpRequest,
    item: web::Path<String>,
    query: web::Query<BuyQuery>,
) -> std::result::Result<HttpResponse, CoinEngineError> {
    let account_id = account_id_from(&req)?;
    let quantity = query.quantity.unwrap_or(1);

    let timer = metrics::LEDGER_OP_DURATION
        .with_label_values(&["purchase"])
        .start_timer();
    let result =
        retry_transient("purchase", || service.buy_item(account_id, item.as_str(), quantity)).await;
    timer.observe_duration();

    metrics::PURCHASES_TOTAL
        .with_label_values(&[status_label(&result)])
        .inc();

    match result {
        Ok(()) => Ok(HttpResponse::Ok().finish()),
        Err(err) => {
            log_failure("purchase", &err);
            Err(err)
        }
    }
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/auth", web::post().to(authenticate))
            .route("/info", web::get().to(user_info))
            .route("/sendCoin", web::post().to(send_coin))
            .route("/buy/{item}", web::post().to(buy_item)),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}

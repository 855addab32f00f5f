use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use coin_engine::{
    config::Config,
    database::{Database, LedgerStore},
    handlers,
    security_middleware::JwtAuth,
    services::CoinService,
};
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().map_err(anyhow::Error::msg)?;

    info!("Starting Coin Engine on port {}", config.server.port);

    let database = Arc::new(
        Database::new(&config.database)
            .await
            .context("Failed to connect to database")?,
    );
    database.migrate().await.context("Failed to run migrations")?;

    let store: Arc<dyn LedgerStore> = database.clone();
    let service = Arc::new(CoinService::new(
        store,
        config.auth.clone(),
        config.ledger.clone(),
    ));

    let jwt_secret = config.auth.jwt_secret.clone();

    HttpServer::new(move || {
        let cors = Cors::permissive();

        // Registration order is inside-out: the JWT guard runs after CORS,
        // logging and path normalization.
        App::new()
            .wrap(JwtAuth::new(jwt_secret.clone()))
            .wrap(middleware::NormalizePath::trim())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(service.clone()))
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    database.close().await;

    Ok(())
}

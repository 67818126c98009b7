use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sea_orm_migration::MigratorTrait;

use utcert_control::auth::TokenAuthority;
use utcert_control::config::Config;
use utcert_control::render::{CertificateRenderer, SvgRenderer};
use utcert_control::routes;
use utcert_control::state::AppState;
use utcert_control::storage::{CloudinaryClient, PinataClient};

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn init_state(config: Config) -> anyhow::Result<AppState> {
    let db = utcert_db::connect(&config.database_url)
        .await
        .context("connect database")?;
    utcert_migration::Migrator::up(&db, None)
        .await
        .context("apply migrations")?;

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("create temp dir {}", config.temp_dir.display()))?;

    let renderer: Arc<dyn CertificateRenderer> = match &config.template_path {
        Some(path) => Arc::new(
            SvgRenderer::with_template_file(config.temp_dir.clone(), path)
                .await
                .context("load certificate template")?,
        ),
        None => Arc::new(SvgRenderer::new(config.temp_dir.clone())),
    };

    if config.pinata.jwt.is_empty() {
        tracing::warn!("PINATA_JWT is not set; certificate creation will fail");
    }
    if config.cloudinary.api_secret.is_empty() {
        tracing::warn!("CLOUDINARY_* is not set; certificate creation will fail");
    }

    Ok(AppState {
        db: Arc::new(db),
        tokens: Arc::new(TokenAuthority::new(config.jwt_secret.as_bytes())),
        content_store: Arc::new(PinataClient::new(config.pinata.clone(), config.upload_timeout)),
        image_cdn: Arc::new(CloudinaryClient::new(
            config.cloudinary.clone(),
            config.upload_timeout,
        )),
        renderer,
        config: Arc::new(config),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let addr = config.bind;
    let state = init_state(config).await?;
    let app = routes::build_router(state);

    tracing::info!(%addr, "utcert-control HTTP listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

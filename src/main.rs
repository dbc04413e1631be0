use std::future::IntoFuture;
use std::{process, sync::Arc};

use encore::{
    application::error::AppError,
    cache::{CacheConfig, CacheLayer, Entity},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState},
        redis_store, telemetry,
    },
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
    }
}

async fn connect_database(settings: &config::Settings) -> Result<sqlx::PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;
    let repositories = Arc::new(PostgresRepositories::new(pool));

    let cache_config = CacheConfig::from(&settings.cache);
    let store = redis_store::build_store(&cache_config).await?;
    let cache = CacheLayer::new(cache_config, store);

    let mut state = AppState::new(
        repositories,
        cache,
        settings.pagination.max_page_size.get(),
    );
    match settings.ops.invalidation_token.as_ref() {
        Some(token) => state = state.with_ops_token(token.clone()),
        None => info!(
            "no ops.invalidation_token configured; manual invalidation endpoint disabled"
        ),
    }
    serve_http(&settings, state).await
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
        }
    }

    info!(
        grace_secs = settings.server.graceful_shutdown.as_secs(),
        "shutting down"
    );
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!("graceful shutdown timed out; dropping open connections");
            Ok(())
        }
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;
    info!("migrations applied");
    Ok(())
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    let entity: Entity = args
        .entity
        .parse()
        .map_err(|err| AppError::validation(format!("{err}")))?;

    let cache_config = CacheConfig::from(&settings.cache);
    let store = redis_store::connect_shared_store(&cache_config).await?;
    let cache = CacheLayer::new(cache_config, store);

    let report = cache.invalidator().invalidate(entity, args.id).await?;
    info!(
        entity = %entity,
        id = ?args.id,
        patterns = ?report.patterns,
        matched = report.matched,
        deleted = report.deleted,
        "invalidation complete"
    );
    Ok(())
}

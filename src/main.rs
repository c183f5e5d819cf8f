use std::{error::Error as _, future::IntoFuture, iter, process, sync::Arc, time::Duration};

use marquee::{
    application::{
        catalog::CatalogService, error::AppError, repos::CatalogRepo, request::RequestValidator,
    },
    cache::{CacheConfig, spawn_sweeper},
    config::{self, StorageBackend},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, CatalogCache, HttpState},
        memory::InMemoryCatalog,
        telemetry,
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
    let causes = error_causes(error);
    if dispatcher::has_been_set() {
        error!(error = %error, causes = %causes, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, causes = %causes, "application error");
    });
}

fn error_causes(error: &AppError) -> String {
    iter::successors(error.source(), |&cause| cause.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig(_) => run_check_config(&settings),
    }
}

fn run_check_config(settings: &config::Settings) -> Result<(), AppError> {
    info!(
        addr = %settings.server.addr,
        backend = ?settings.storage.backend,
        max_page_size = settings.catalog.max_page_size.get(),
        cache_enabled = settings.cache.enabled,
        cache_ttl_secs = settings.cache.ttl.as_secs(),
        cache_capacity = settings.cache.capacity.get(),
        cache_shards = settings.cache.shards.get(),
        "Configuration is valid"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repo = init_repository(&settings).await?;

    let cache = CatalogCache::new(CacheConfig::from(&settings.cache));
    let state = HttpState {
        catalog: Arc::new(CatalogService::new(repo)),
        cache: cache.clone(),
        validator: RequestValidator::new(settings.catalog.max_page_size),
    };

    let sweeper = spawn_sweeper(cache);

    let result = serve_http(&settings, state).await;

    sweeper.abort();
    let _ = sweeper.await;

    result
}

async fn init_repository(settings: &config::Settings) -> Result<Arc<dyn CatalogRepo>, AppError> {
    match settings.storage.backend {
        StorageBackend::Postgres => {
            let url = settings.database.url.as_deref().ok_or_else(|| {
                InfraError::configuration("database.url is required for the postgres backend")
            })?;
            let pool =
                PostgresRepositories::connect(url, settings.database.max_connections.get())
                    .await
                    .map_err(|err| InfraError::database("connect", err))?;
            PostgresRepositories::run_migrations(&pool)
                .await
                .map_err(|err| InfraError::database("run migrations", err))?;

            let repositories = PostgresRepositories::new(pool);
            repositories
                .health_check()
                .await
                .map_err(|err| InfraError::database("pass its health check", err))?;
            info!("Connected to catalog database");
            Ok(Arc::new(repositories))
        }
        StorageBackend::Memory => {
            let path = settings.storage.seed_file.as_deref().ok_or_else(|| {
                InfraError::configuration("storage.seed_file is required for the memory backend")
            })?;
            let catalog = InMemoryCatalog::load(path).await?;
            Ok(Arc::new(catalog))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Catalog service listening");

    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(true);
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        _ = stopping_rx.wait_for(|stopping| *stopping) => {}
    }

    drain(server, settings.server.graceful_shutdown).await
}

async fn drain<F>(server: F, grace: Duration) -> Result<(), AppError>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    info!(grace_secs = grace.as_secs(), "Draining in-flight requests");
    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!("Graceful shutdown timed out; dropping remaining connections");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

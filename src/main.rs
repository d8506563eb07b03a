use quiz_grading_backend::{
    config::{get_config, init_config, LogFormat},
    database::{memory::InMemoryStore, pool::create_pool, Stores},
    routes,
    services::analytics_service::AnalyticsQueue,
    utils::time::SystemClock,
    AppState, StorageKind,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();
    init_tracing(config.log_format);

    let (storage, stores) = if config.database_url.is_some() {
        let pool = create_pool().await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        (StorageKind::Postgres, Stores::postgres(pool))
    } else {
        tracing::warn!("DATABASE_URL not set, using in-memory storage; data is lost on exit");
        (StorageKind::InMemory, Stores::in_memory(Arc::new(InMemoryStore::new())))
    };

    let (analytics, worker) =
        AnalyticsQueue::new(stores.analytics.clone(), config.analytics_queue_capacity);
    tokio::spawn(worker.run());

    let app_state = AppState::new(storage, stores, Arc::new(SystemClock), analytics);
    let app = routes::router(app_state);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {} ({} storage)", addr, storage.as_str());
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

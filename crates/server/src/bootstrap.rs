use std::sync::Arc;

use flux_core::config::{AppConfig, ConfigError, LoadOptions};
use flux_core::{
    AuditSigner, LifecycleService, NotificationHub, NotificationSink, SystemClock,
    TracingAuditSink,
};
use flux_db::{connect_with_config, migrations, DbPool, SqlStore};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use crate::api::AppState;
use crate::auth::Authenticator;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub hub: Arc<NotificationHub>,
    pub lifecycle: Arc<LifecycleService<SqlStore>>,
    pub authenticator: Authenticator,
}

impl Application {
    pub fn state(&self) -> AppState {
        AppState {
            lifecycle: Arc::clone(&self.lifecycle),
            hub: Arc::clone(&self.hub),
            authenticator: self.authenticator.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlStore::new(db_pool.clone()));
    let hub = Arc::new(NotificationHub::with_capacity(config.notifications.channel_capacity));
    let sink: Arc<dyn NotificationSink> = hub.clone();
    let lifecycle = Arc::new(LifecycleService::new(
        Arc::clone(&store),
        AuditSigner::new(config.ledger.signing_key.expose_secret()),
        sink,
        Arc::new(TracingAuditSink),
        Arc::new(SystemClock),
    ));

    Ok(Application { config, db_pool, hub, lifecycle, authenticator: Authenticator::new(store) })
}

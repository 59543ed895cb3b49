//! Storage selection and service wiring.

use std::sync::Arc;

use evently_infra::{
    EngineConfig, EventCatalog, InMemoryLedger, PostgresLedger, RegistrationEngine, RegistrationLedger,
    StoreError,
};

use crate::config::AppConfig;

pub type Ledger = dyn RegistrationLedger;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub ledger: Arc<Ledger>,
    pub engine: Arc<RegistrationEngine<Ledger>>,
    pub catalog: EventCatalog<Ledger>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("backend", &self.ledger.backend())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(ledger: Arc<Ledger>, engine_config: EngineConfig) -> Self {
        let engine = Arc::new(RegistrationEngine::new(Arc::clone(&ledger)).with_config(engine_config));
        let catalog = EventCatalog::new(Arc::clone(&engine));
        Self {
            ledger,
            engine,
            catalog,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLedger::new()), EngineConfig::default())
    }

    /// Postgres when `DATABASE_URL` is configured (schema applied on
    /// startup), in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        let ledger: Arc<Ledger> = match config.database_url.as_deref() {
            Some(url) => {
                let ledger = PostgresLedger::connect(url, config.database_max_connections).await?;
                ledger.migrate().await?;
                tracing::info!(
                    max_connections = config.database_max_connections,
                    "using postgres storage"
                );
                Arc::new(ledger)
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory storage (data is lost on restart)");
                Arc::new(InMemoryLedger::new())
            }
        };

        Ok(Self::new(ledger, config.engine))
    }
}

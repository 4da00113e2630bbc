use std::sync::Arc;

use log::{error, info};

use crate::admin::AdminReporting;
use crate::auth::AuthService;
use crate::balance::BalanceReconciler;
use crate::configuration::Config;
use crate::error_handling::types::{ControllerError, StorageError};
use crate::session_management::SessionRecorder;
use crate::statistics::StatsAggregator;
use crate::storage::{DatabaseStorage, Storage};
use crate::web_interface::{Services, WebServer};

/// Wires configuration, storage, services and the HTTP server together.
pub struct Controller {
    config: Config,
    services: Services,
    web_server: WebServer,
}

impl Controller {
    /// Open the ledger described by `config` and build every service on top of it.
    ///
    /// The store owns its own runtime, so it is opened on the blocking pool.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        let storage_config = config.storage.clone();
        let admin = config.admin.clone();
        let storage = tokio::task::spawn_blocking(move || {
            let storage = DatabaseStorage::new(&storage_config)?;
            storage.ensure_system_user(&admin.username, &admin.password_hash)?;
            Ok::<_, StorageError>(storage)
        })
        .await
        .map_err(|e| ControllerError::InitializationFailed(format!("storage task: {}", e)))??;

        Self::with_storage(config, Arc::new(storage))
    }

    /// Build the services over an already opened store whose system account is seeded.
    pub fn with_storage(config: Config, storage: Arc<dyn Storage>) -> Result<Self, ControllerError> {
        config.validate()?;
        let auth = AuthService::new(
            storage.clone(),
            &config.auth,
            config.admin.clone(),
            config.game.starting_stake,
        )
        .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        let recorder = SessionRecorder::new(storage.clone(), config.game.balance_mode);
        let balance = Arc::new(BalanceReconciler::new(storage.clone(), &config.game));
        let stats = Arc::new(StatsAggregator::new(storage.clone(), config.game.clone()));
        let admin = AdminReporting::new(storage, stats.clone(), balance.clone());

        let services = Services {
            auth: Arc::new(auth),
            recorder: Arc::new(recorder),
            balance,
            stats,
            admin: Arc::new(admin),
        };
        let web_server =
            WebServer::new(services.clone(), &config.server).map_err(ControllerError::WebError)?;

        info!(
            "Controller ready (balance mode {:?}, database {})",
            config.game.balance_mode, config.storage.database_path
        );
        Ok(Self {
            config,
            services,
            web_server,
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve HTTP until Ctrl-C, letting in-flight requests finish.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
        };
        self.web_server.start(ctrl_c).await.map_err(|e| {
            error!("Web server stopped: {}", e);
            ControllerError::WebError(e)
        })?;
        self.shutdown();
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("Stopping HTTP API on {}", self.web_server.addr());
    }
}

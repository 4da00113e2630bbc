use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;
use warp::Filter;

use crate::admin::AdminReporting;
use crate::auth::AuthService;
use crate::balance::BalanceReconciler;
use crate::configuration::ServerConfig;
use crate::error_handling::types::WebError;
use crate::session_management::SessionRecorder;
use crate::statistics::StatsAggregator;
use crate::web_interface::filters::handle_rejection;
use crate::web_interface::routes::api_routes;

/// Shared handles the request handlers work with.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<AuthService>,
    pub recorder: Arc<SessionRecorder>,
    pub balance: Arc<BalanceReconciler>,
    pub stats: Arc<StatsAggregator>,
    pub admin: Arc<AdminReporting>,
}

/// HTTP JSON API server
pub struct WebServer {
    services: Services,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(services: Services, config: &ServerConfig) -> Result<Self, WebError> {
        let ip: IpAddr = config.bind_address.parse().map_err(|_| {
            WebError::BindFailed(format!("invalid bind address '{}'", config.bind_address))
        })?;
        Ok(Self {
            services,
            addr: SocketAddr::new(ip, config.port),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` resolves, then drain open connections.
    ///
    /// Fails with [`WebError::BindFailed`] when the address cannot be bound.
    pub async fn start<S>(&self, shutdown: S) -> Result<(), WebError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", self.addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WebError::BindFailed(format!("{}: {}", self.addr, e)))?;

        let routes = api_routes(self.services.clone())
            .recover(handle_rejection)
            .unify()
            .with(warp::log("bombcard::http"));

        info!("HTTP API listening on http://{}", local_addr);
        warp::serve(routes)
            .incoming(listener)
            .graceful(shutdown)
            .run()
            .await;
        info!("HTTP API on {} stopped", local_addr);
        Ok(())
    }
}

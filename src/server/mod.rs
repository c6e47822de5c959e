pub mod api;
pub mod conversation;

use crate::cli::Args;
use crate::config::FoundrySettings;
use crate::relay::FoundryClient;
use api::{ build_router, AppState };
use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use axum::Router;
use log::{ error, info, warn };
use tokio_util::sync::CancellationToken;

const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Server {
    addr: String,
    settings: Arc<FoundrySettings>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, settings: Arc<FoundrySettings>, args: Args) -> Self {
        Self { addr, settings, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let client = FoundryClient::from_settings(self.settings.clone())?;

        let shutdown = CancellationToken::new();
        let app_state = AppState {
            settings: self.settings.clone(),
            client: Arc::new(client),
            shutdown: shutdown.clone(),
        };

        let static_dir = Path::new(&self.args.static_dir);
        if !static_dir.is_dir() {
            info!("Static directory '{}' not found, serving API only", static_dir.display());
        }
        let app = build_router(app_state, Some(static_dir));

        tokio::spawn(watch_ctrl_c(shutdown.clone()));

        if self.args.enable_tls {
            self.serve_tls(addr, app, shutdown).await
        } else {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                e
            })?;
            info!("HTTP server listening on http://{}", addr);
            axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
            info!("HTTP server stopped");
            Ok(())
        }
    }

    async fn serve_tls(
        &self,
        addr: SocketAddr,
        app: Router,
        shutdown: CancellationToken
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let (cert_path, key_path) = match (&self.args.tls_cert_path, &self.args.tls_key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err("ENABLE_TLS requires both TLS_CERT_PATH and TLS_KEY_PATH".into());
            }
        };

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        let handle = axum_server::Handle::new();
        let on_shutdown = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            on_shutdown.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        });

        info!("HTTPS server listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service()).await?;
        info!("HTTPS server stopped");
        Ok(())
    }
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, draining connections");
    shutdown.cancel();
}

//! Webhook HTTP(S) server
//!
//! The API server only talks HTTPS to admission webhooks, so in a cluster the
//! router is served with rustls from a mounted certificate and key. Plain HTTP
//! is available for local testing or when TLS is terminated in front of the
//! injector.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{error, info};

use crate::error::Error;
use crate::Result;

/// Time in-flight admission requests get to finish on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// PEM files for the serving certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// Certificate chain
    pub cert: PathBuf,
    /// Private key
    pub key: PathBuf,
}

/// Listen address and optional TLS material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Socket address to bind
    pub listen: SocketAddr,
    /// Serve HTTPS when set, plain HTTP otherwise
    pub tls: Option<TlsFiles>,
}

impl ServerConfig {
    /// Validate that the certificate and key are given together
    pub fn new(listen: SocketAddr, cert: Option<PathBuf>, key: Option<PathBuf>) -> Result<Self> {
        let tls = match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            (Some(_), None) => return Err(Error::config("--tls-cert requires --tls-key")),
            (None, Some(_)) => return Err(Error::config("--tls-key requires --tls-cert")),
        };
        Ok(Self { listen, tls })
    }
}

/// Serve `router` until SIGINT/SIGTERM
pub async fn serve(router: Router, config: ServerConfig) -> Result<()> {
    match config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| Error::tls(format!("failed to load {}: {e}", tls.cert.display())))?;

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                }
            });

            info!(addr = %config.listen, "Starting HTTPS webhook server");
            axum_server::bind_rustls(config.listen, tls_config)
                .handle(handle)
                .serve(router.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(config.listen).await?;
            info!(addr = %config.listen, "Starting plain HTTP webhook server");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    info!("Webhook server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
    info!("Signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        crate::DEFAULT_LISTEN_ADDR.parse().unwrap()
    }

    #[test]
    fn test_plain_http_without_tls_files() {
        let config = ServerConfig::new(addr(), None, None).unwrap();
        assert!(config.tls.is_none());
        assert_eq!(config.listen.port(), 8443);
    }

    #[test]
    fn test_tls_with_cert_and_key() {
        let config = ServerConfig::new(
            addr(),
            Some(PathBuf::from("/tls/tls.crt")),
            Some(PathBuf::from("/tls/tls.key")),
        )
        .unwrap();

        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert: PathBuf::from("/tls/tls.crt"),
                key: PathBuf::from("/tls/tls.key"),
            })
        );
    }

    #[test]
    fn test_half_configured_tls_is_rejected() {
        let err = ServerConfig::new(addr(), Some(PathBuf::from("/tls/tls.crt")), None).unwrap_err();
        assert!(err.to_string().contains("--tls-key"));

        let err = ServerConfig::new(addr(), None, Some(PathBuf::from("/tls/tls.key"))).unwrap_err();
        assert!(err.to_string().contains("--tls-cert"));
    }

    #[tokio::test]
    async fn test_missing_certificate_files_fail_before_binding() {
        let config = ServerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            Some(PathBuf::from("/nonexistent/tls.crt")),
            Some(PathBuf::from("/nonexistent/tls.key")),
        )
        .unwrap();

        let result = serve(Router::new(), config).await;
        assert!(matches!(result, Err(Error::Tls(_))));
    }
}

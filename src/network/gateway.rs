//! Gateway - listener that accepts and authenticates incoming connections.
//!
//! The Gateway binds one socket (optionally TLS-terminated) and performs
//! the WebSocket upgrade for each client. Authentication happens inside
//! the handshake callback, against the `token` query parameter - the
//! transport cannot reliably carry custom headers at this point. A bad
//! origin or token turns into an HTTP rejection before the upgrade, so
//! no Connection is created and no loops ever start for it.

use http::StatusCode;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::io::{BufReader, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::{Claims, TokenValidator};
use crate::config::{HeartbeatConfig, HubConfig, ListenConfig, TlsConfig};
use crate::hub::Hub;
use crate::metrics;
use crate::network::Connection;
use crate::router::EventRouter;

/// The Gateway accepts incoming connections and spawns their loops.
pub struct Gateway {
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    allow_origins: Vec<String>,
    heartbeat: HeartbeatConfig,
    hub_config: HubConfig,
    hub: Hub,
    router: EventRouter,
    validator: Arc<dyn TokenValidator>,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    pub async fn bind(
        listen: ListenConfig,
        heartbeat: HeartbeatConfig,
        hub_config: HubConfig,
        hub: Hub,
        router: EventRouter,
        validator: Arc<dyn TokenValidator>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen.address).await?;
        info!(address = %listen.address, "Listener bound");

        let tls_acceptor = match &listen.tls {
            Some(tls_cfg) => {
                let acceptor = Self::load_tls(tls_cfg)?;
                info!("TLS termination enabled");
                Some(acceptor)
            }
            None => None,
        };

        Ok(Self {
            listener,
            tls_acceptor,
            allow_origins: listen.allow_origins,
            heartbeat,
            hub_config,
            hub,
            router,
            validator,
        })
    }

    /// The address actually bound (resolves an ephemeral port).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Load TLS certificates and create a TlsAcceptor.
    fn load_tls(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
        let cert_file = std::fs::read(&config.cert_path)?;
        let cert_reader = &mut BufReader::new(Cursor::new(cert_file));
        let certs: Vec<CertificateDer> = certs(cert_reader).collect::<Result<Vec<_>, _>>()?;

        if certs.is_empty() {
            anyhow::bail!("No certificates found in {}", config.cert_path);
        }

        let key_file = std::fs::read(&config.key_path)?;
        let key_reader = &mut BufReader::new(Cursor::new(key_file));
        let mut keys: Vec<PrivateKeyDer> = pkcs8_private_keys(key_reader)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(PrivateKeyDer::from)
            .collect();

        if keys.is_empty() {
            anyhow::bail!("No private keys found in {}", config.key_path);
        }

        let key = keys.remove(0);

        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "connection attempt");

                    let tls_acceptor = self.tls_acceptor.clone();
                    let allow_origins = self.allow_origins.clone();
                    let heartbeat = self.heartbeat;
                    let hub_config = self.hub_config;
                    let hub = self.hub.clone();
                    let router = self.router.clone();
                    let validator = Arc::clone(&self.validator);

                    tokio::spawn(async move {
                        match tls_acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    upgrade(
                                        tls_stream,
                                        addr,
                                        allow_origins,
                                        heartbeat,
                                        hub_config,
                                        hub,
                                        router,
                                        validator,
                                    )
                                    .await;
                                }
                                Err(e) => {
                                    warn!(%addr, error = %e, "TLS handshake failed");
                                }
                            },
                            None => {
                                upgrade(
                                    stream,
                                    addr,
                                    allow_origins,
                                    heartbeat,
                                    hub_config,
                                    hub,
                                    router,
                                    validator,
                                )
                                .await;
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Perform the WebSocket handshake with origin and token validation, then
/// hand the socket to a Connection. Rejections never allocate hub state.
#[allow(clippy::too_many_arguments)]
async fn upgrade<S>(
    stream: S,
    addr: SocketAddr,
    allow_origins: Vec<String>,
    heartbeat: HeartbeatConfig,
    hub_config: HubConfig,
    hub: Hub,
    router: EventRouter,
    validator: Arc<dyn TokenValidator>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut validated: Option<Claims> = None;

    let callback = |req: &http::Request<()>, response: http::Response<()>| {
        // Origin allow-list first; an empty list allows all origins.
        if !allow_origins.is_empty() {
            let allowed = req
                .headers()
                .get("Origin")
                .and_then(|o| o.to_str().ok())
                .is_some_and(|origin| allow_origins.iter().any(|a| a == origin || a == "*"));
            if !allowed {
                metrics::record_handshake_rejected("origin");
                warn!(%addr, "handshake rejected: origin not allowed");
                return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed"));
            }
        }

        let token = match req.uri().query().and_then(token_param) {
            Some(token) => token,
            None => {
                metrics::record_handshake_rejected("missing");
                warn!(%addr, "handshake rejected: no token");
                return Err(reject(StatusCode::UNAUTHORIZED, "Missing token"));
            }
        };

        match validator.validate(token) {
            Ok(claims) => {
                validated = Some(claims);
                Ok(response)
            }
            Err(e) => {
                metrics::record_handshake_rejected(e.error_code());
                warn!(%addr, reason = e.error_code(), "handshake rejected: bad token");
                Err(reject(StatusCode::UNAUTHORIZED, &e.to_string()))
            }
        }
    };

    match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => {
            let Some(claims) = validated else {
                // The callback always fills this on success.
                error!(%addr, "handshake accepted without claims; dropping");
                return;
            };
            info!(%addr, user_id = claims.sub, "handshake successful");
            Connection::new(claims, hub, router, heartbeat, hub_config)
                .run(ws_stream)
                .await;
        }
        Err(e) => {
            debug!(%addr, error = %e, "handshake did not complete");
        }
    }
}

fn reject(status: StatusCode, reason: &str) -> http::Response<Option<String>> {
    http::Response::builder()
        .status(status)
        .body(Some(reason.to_string()))
        .unwrap()
}

/// Extract the `token` parameter from a raw query string. Tokens are
/// URL-safe by construction, so no percent-decoding is involved.
fn token_param(query: &str) -> Option<&str> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|token| !token.is_empty())
}

//! agorad - Agora real-time messaging hub daemon.

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use agorad::auth::JwtValidator;
use agorad::config::Config;
use agorad::conversations::{ConversationProvider, NoOpProvider, SqliteProvider};
use agorad::hub::Hub;
use agorad::network::Gateway;
use agorad::router::EventRouter;
use agorad::{http, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting agorad");

    // SECURITY: Refuse to start with a default/weak token secret. Tokens
    // signed with a guessable secret can be forged for any user and role.
    if config.auth.is_insecure_secret() {
        if std::env::var("AGORAD_ALLOW_INSECURE_SECRET").is_ok() {
            warn!("INSECURE: running with a weak auth secret (allowed via AGORAD_ALLOW_INSECURE_SECRET)");
        } else {
            error!("FATAL: insecure auth.secret detected!");
            error!("  Set a random secret of at least 32 characters in config.toml:");
            error!("    [auth]");
            error!("    secret = \"<random-32-char-string>\"");
            error!("  Generate one with: openssl rand -hex 32");
            error!("  For testing only, set AGORAD_ALLOW_INSECURE_SECRET=1 to bypass this check.");
            return Err(anyhow::anyhow!(
                "Refusing to start with insecure auth.secret. See error messages above."
            ));
        }
    }

    // Conversation store: the platform database when configured, a no-op
    // provider otherwise (typing/read routing disabled, push API intact).
    let conversations: Arc<dyn ConversationProvider> = match &config.database {
        Some(db) => Arc::new(SqliteProvider::connect(&db.path).await?),
        None => {
            warn!("No database configured; conversation lookups disabled");
            Arc::new(NoOpProvider)
        }
    };

    // The hub: constructed once, handed by reference to everything that
    // routes or pushes events, alive until process exit.
    let hub = Hub::spawn();
    let router = EventRouter::new(hub.clone(), conversations);
    let validator = Arc::new(JwtValidator::new(&config.auth.secret));

    // Prometheus metrics are optional.
    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = config.server.metrics_port.unwrap_or(9090);
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "Metrics HTTP server started");
    }

    let gateway = Gateway::bind(
        config.listen,
        config.heartbeat,
        config.hub,
        hub,
        router,
        validator,
    )
    .await?;

    gateway.run().await
}

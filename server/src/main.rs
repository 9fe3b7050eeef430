use std::sync::Arc;
use tokio::net::TcpListener;

use courier_server::auth::{jwt, AuthService};
use courier_server::config::{generate_config_template, Config};
use courier_server::db::{self, SqliteCredentialStore};
use courier_server::error::StartupError;
use courier_server::state::{AppState, SessionSettings};
use courier_server::routes;
use courier_server::ws::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load().map_err(StartupError::from)?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);

    tracing::info!("Courier gateway v{} starting", env!("CARGO_PKG_VERSION"));

    // Open the credential store and verify it answers before serving anything
    let db = db::init_db(&config.data_dir)?;
    let store = SqliteCredentialStore::new(db);
    let auth = AuthService::new(Arc::new(store), config.bcrypt_cost);
    if let Err(e) = auth.check_store() {
        tracing::error!(error = %e, "Credential store unreachable");
        return Err(StartupError::StoreUnreachable(e).into());
    }
    tracing::info!(bcrypt_cost = auth.cost(), "Credential store connection established");

    let session_secret =
        jwt::load_or_generate_session_secret(&config.data_dir).map_err(StartupError::from)?;

    let app_state = AppState {
        auth,
        connections: ConnectionRegistry::new(),
        session_secret,
        settings: SessionSettings::from_config(&config),
    };

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("courier_server=info"));

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

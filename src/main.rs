use std::net::TcpListener;
use std::sync::Arc;

use finance_sessions::clock::SystemClock;
use finance_sessions::configuration::{get_configuration, StorageBackend};
use finance_sessions::session::{InMemorySessionStore, PgSessionStore};
use finance_sessions::startup::{run, AppState};
use finance_sessions::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // .env is optional; real deployments set APP_* directly
    let _ = dotenvy::dotenv();
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!(storage = ?config.storage, "Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let clock = Arc::new(SystemClock);

    let state = match configuration.storage {
        StorageBackend::Postgres => {
            tracing::info!("Attempting to connect to database");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&configuration.database.connection_string())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create connection pool: {}", e);
                    std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "Database connection error",
                    )
                })?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to run migrations: {}", e);
                    std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
                })?;
            tracing::info!("Database connection pool created successfully");

            let store = Arc::new(PgSessionStore::new(pool));
            AppState::new(store.clone(), store, configuration.jwt.clone(), clock)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory session storage; sessions are lost on restart");
            let store = Arc::new(InMemorySessionStore::new());
            AppState::new(store.clone(), store, configuration.jwt.clone(), clock)
        }
    };

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, state)?.await
}

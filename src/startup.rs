use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::clock::Clock;
use crate::configuration::JwtSettings;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{get_current_user, health_check, login, logout, refresh};
use crate::session::{SessionEngine, SessionStore, UserStore};

/// Shared, read-only handler state
pub struct AppState {
    pub engine: SessionEngine,
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        jwt_config: JwtSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine: SessionEngine::new(sessions, jwt_config, clock),
            users,
        }
    }
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let minter = state.engine.minter().clone();
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(state.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
            // Protected routes (require a bearer access token)
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(minter.clone()))
                    .route("/me", web::get().to(get_current_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

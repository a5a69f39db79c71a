use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use hivegrid_api::config;
use hivegrid_api::database;
use hivegrid_api::handlers::{devices, org, pools, public, users};
use hivegrid_api::middleware::jwt_auth_middleware;
use hivegrid_api::services::{LoggedNotifier, LoggedPolicyService};
use hivegrid_api::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = config::config();
    tracing::info!("Starting hivegrid-api in {:?} mode", config.environment);

    let pool = match database::connect(&config.database) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("database configuration error: {}", err);
            std::process::exit(1);
        }
    };

    let state = AppState::new(
        pool,
        Arc::new(LoggedPolicyService),
        Arc::new(LoggedNotifier),
    );
    let app = app(state);

    // Allow tests or deployments to override port via env
    let port = std::env::var("HIVEGRID_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("hivegrid-api listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app(state: AppState) -> Router {
    let router = Router::new()
        // Public
        .route("/", get(public::service_banner))
        .route("/health", get(public::health_check))
        // Protected business operations
        .merge(protected_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config::config().security.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

fn protected_routes() -> Router<AppState> {
    Router::new()
        // Organisation lifecycle
        .route(
            "/api/org",
            post(org::create_organisation).delete(org::delete_organisation),
        )
        .route("/api/org/join", post(org::join_organisation))
        .route("/api/org/leave", post(org::leave_organisation))
        .route("/api/org/invite", post(org::invite_to_organisation))
        .route("/api/org/address", put(org::update_organisation_address))
        .route("/api/org/overview", get(org::organisation_overview))
        // Member roles
        .route("/api/users/promote", post(users::promote_user))
        .route("/api/users/demote", post(users::demote_user))
        .route("/api/users", delete(users::remove_user_from_organisation))
        .route("/api/users/me", get(users::user_details))
        // Pool tree
        .route(
            "/api/pools",
            post(pools::create_pool).delete(pools::delete_pool),
        )
        .route("/api/pools/name", put(pools::rename_pool))
        .route(
            "/api/pools/devices",
            post(pools::add_device_to_pool).delete(pools::remove_device_from_pool),
        )
        .route(
            "/api/pools/users",
            post(pools::add_user_to_pool).delete(pools::remove_user_from_pool),
        )
        // Devices
        .route(
            "/api/devices",
            post(devices::register_device).delete(devices::remove_device),
        )
        .route("/api/devices/name", put(devices::rename_device))
        .layer(axum_middleware::from_fn(jwt_auth_middleware))
}

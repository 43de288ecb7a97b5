use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    extract::WebSocketUpgrade,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use fundtracker_api::auth::{AppState, AppStateInner};
use fundtracker_api::backend::{DbAuthBackend, DbProjectDirectory};
use fundtracker_api::mailer::Mailer;
use fundtracker_api::{auth, donations, expenses, ngos, projects};
use fundtracker_db::Database;
use fundtracker_gateway::connection::{GatewayContext, handle_connection};
use fundtracker_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fundtracker=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("FUNDTRACKER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    if jwt_secret == "dev-secret-change-me" {
        tracing::warn!("FUNDTRACKER_JWT_SECRET not set, using development default");
    }

    let host = std::env::var("FUNDTRACKER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("FUNDTRACKER_PORT")
        .unwrap_or_else(|_| "3400".into())
        .parse()?;
    let db_path: PathBuf = std::env::var("FUNDTRACKER_DB_PATH")
        .unwrap_or_else(|_| "fundtracker.db".into())
        .into();

    let db = Database::open(&db_path)?;
    let dispatcher = Dispatcher::new();
    let mailer = Mailer::from_env();
    if mailer.is_none() {
        info!("RESEND_API_KEY not set, email notifications disabled");
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        dispatcher: dispatcher.clone(),
        mailer,
    });

    let gateway_ctx = GatewayContext {
        backend: Arc::new(DbAuthBackend::new(state.clone())),
        directory: Arc::new(DbProjectDirectory::new(state.clone())),
        dispatcher,
    };

    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/ngos", get(ngos::list_ngos))
        .route("/ngos/{id}", get(ngos::get_ngo))
        .route("/projects", get(projects::list_projects))
        .route("/projects/{id}", get(projects::get_project))
        .route("/projects/{id}/donations", get(donations::list_donations))
        .route("/projects/{id}/expenses", get(expenses::list_expenses));

    let protected = Router::new()
        .route("/ngos", post(ngos::create_ngo))
        .route("/ngos/{id}/verification", patch(ngos::set_verification))
        .route("/projects", post(projects::create_project))
        .route("/projects/{id}/donations", post(donations::create_donation))
        .route("/projects/{id}/expenses", post(expenses::create_expense))
        .route("/expenses/{id}/flag", post(expenses::flag_expense))
        .route("/admin/expenses/flagged", get(expenses::list_flagged))
        .layer(middleware::from_fn(fundtracker_api::middleware::require_auth));

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .route("/gateway", get(gateway_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .layer(axum::Extension(gateway_ctx));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("FundTracker server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn gateway_upgrade(
    ws: WebSocketUpgrade,
    axum::Extension(ctx): axum::Extension<GatewayContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, ctx))
}

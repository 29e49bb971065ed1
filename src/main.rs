use axum::{
    middleware::from_fn,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use clinic_api::database::DatabaseManager;
use clinic_api::handlers::{
    appointments, auth, collections, image_tags, patients, progress_notes,
};
use clinic_api::middleware::jwt_auth_middleware;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = clinic_api::config::config();
    tracing::info!("Starting clinic API in {:?} mode", config.environment);

    let app = app();

    // Allow tests or deployments to override port via env
    let port = std::env::var("CLINIC_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app() -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/login", post(auth::login))
        // Protected API behind the session middleware
        .merge(api_routes())
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router {
    Router::new()
        .route("/api/auth/whoami", get(auth::whoami))
        .merge(patient_routes())
        .merge(appointment_routes())
        .merge(note_routes())
        .merge(collection_routes())
        .merge(imaging_routes())
        .route_layer(from_fn(jwt_auth_middleware))
}

fn patient_routes() -> Router {
    Router::new()
        .route("/api/patients", get(patients::list).post(patients::create))
        .route(
            "/api/patients/:id",
            get(patients::get)
                .patch(patients::update)
                .delete(patients::delete),
        )
        .route("/api/patients/:id/restore", post(patients::restore))
}

fn appointment_routes() -> Router {
    Router::new()
        .route(
            "/api/appointments",
            get(appointments::list).post(appointments::create),
        )
        .route(
            "/api/appointments/:id",
            get(appointments::get).delete(appointments::delete),
        )
        .route("/api/appointments/:id/flow", get(appointments::flow))
        .route("/api/appointments/:id/check-in", post(appointments::check_in))
        .route("/api/appointments/:id/seat", post(appointments::seat))
        .route("/api/appointments/:id/complete", post(appointments::complete))
        .route("/api/appointments/:id/cancel", post(appointments::cancel))
}

fn note_routes() -> Router {
    Router::new()
        .route(
            "/api/progress-notes",
            get(progress_notes::list).post(progress_notes::create),
        )
        .route(
            "/api/progress-notes/:id",
            get(progress_notes::get)
                .patch(progress_notes::update)
                .delete(progress_notes::delete),
        )
        .route("/api/progress-notes/:id/submit", post(progress_notes::submit))
        .route("/api/progress-notes/:id/sign", post(progress_notes::sign))
        .route("/api/progress-notes/:id/cosign", post(progress_notes::cosign))
}

fn collection_routes() -> Router {
    Router::new()
        // Static segment before the :id route so "aging" never parses as an id
        .route("/api/collections/aging", get(collections::aging))
        .route(
            "/api/collections",
            get(collections::list_cases).post(collections::create_case),
        )
        .route("/api/collections/:id", get(collections::get_case))
        .route(
            "/api/collections/:id/promises",
            get(collections::list_promises).post(collections::create_promise),
        )
        .route("/api/promises/:id/fulfill", post(collections::fulfill_promise))
        .route("/api/promises/:id/break", post(collections::break_promise))
}

fn imaging_routes() -> Router {
    Router::new()
        .route(
            "/api/image-tags",
            get(image_tags::list).post(image_tags::create),
        )
        .route("/api/image-tags/:id", delete(image_tags::delete))
        .route(
            "/api/image-tags/:id/assignments",
            get(image_tags::list_assignments).post(image_tags::create_assignment),
        )
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "Clinic API",
            "version": version,
            "description": "Multi-tenant practice management API built with Rust (Axum)",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "login": "/auth/login (public - token acquisition)",
                "patients": "/api/patients[/:id] (protected)",
                "appointments": "/api/appointments[/:id] (protected)",
                "progress_notes": "/api/progress-notes[/:id] (protected)",
                "collections": "/api/collections[/:id] (protected)",
                "imaging": "/api/image-tags[/:id] (protected)",
            }
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": {
                    "code": "SERVICE_UNAVAILABLE",
                    "message": "database unavailable",
                    "details": { "status": "degraded", "timestamp": now, "database_error": e.to_string() }
                }
            })),
        ),
    }
}

use axum::http::StatusCode;
use axum::Json;
use diesel::{
    r2d2::{ConnectionManager, Pool},
    PgConnection,
};
use serde_json::json;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn() -> Result<DbPool, r2d2::Error> {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://petromonitor:@localhost:5432/petromonitor".to_string());
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().build(manager)
}

pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    log::error!("Internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
}

pub fn not_found(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({"error": message})))
}

pub fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

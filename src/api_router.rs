//! Combines the per-module routers into the application's API surface.

use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crate::projects::configure())
        .merge(crate::projects::phases::configure())
        .merge(crate::projects::operations::configure())
        .merge(crate::projects::team::configure())
        .merge(crate::thresholds::configure())
        .merge(crate::history::configure())
        .merge(crate::alerts::configure())
        .merge(crate::problems::configure())
        .merge(crate::dashboard::configure())
}

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::schema::historique_modifications;
use crate::shared::models::HistoriqueModification;
use crate::shared::state::AppState;
use crate::shared::utils::{internal_error, ApiError};

/// Append one audit row. Callers that pair this with another write must do
/// so inside the same transaction.
pub fn enregistrer_modification(
    conn: &mut PgConnection,
    table: &str,
    record_id: Uuid,
    champ: &str,
    ancienne_valeur: Option<String>,
    nouvelle_valeur: Option<String>,
    modifie_par: Option<Uuid>,
    commentaire: Option<String>,
) -> QueryResult<HistoriqueModification> {
    let entry = HistoriqueModification {
        id: Uuid::new_v4(),
        table_modifiee: table.to_string(),
        id_enregistrement: record_id,
        champ_modifie: champ.to_string(),
        ancienne_valeur,
        nouvelle_valeur,
        date_modification: Utc::now(),
        modifie_par,
        commentaire,
    };
    diesel::insert_into(historique_modifications::table)
        .values(&entry)
        .get_result(conn)
}

#[derive(Debug, Deserialize)]
pub struct HistoriqueQuery {
    pub table: Option<String>,
    pub record_id: Option<Uuid>,
    pub limit: Option<i64>,
}

async fn list_historique(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoriqueQuery>,
) -> Result<Json<Vec<HistoriqueModification>>, ApiError> {
    let pool = state.conn.clone();
    let entries = tokio::task::spawn_blocking(move || -> Result<_, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let mut db_query = historique_modifications::table.into_boxed();
        if let Some(ref table) = query.table {
            db_query = db_query.filter(historique_modifications::table_modifiee.eq(table.clone()));
        }
        if let Some(record_id) = query.record_id {
            db_query = db_query.filter(historique_modifications::id_enregistrement.eq(record_id));
        }

        db_query
            .order(historique_modifications::date_modification.desc())
            .limit(query.limit.unwrap_or(100))
            .load::<HistoriqueModification>(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(entries))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/historique", get(list_historique))
}

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::projects::{rollup, status};
use crate::shared::models::schema::{operations, phases};
use crate::shared::models::{statut_entite, Operation};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_error, not_found, ApiError};
use crate::projects::status::StatutCouleur;

#[derive(Debug, Deserialize)]
pub struct CreateOperationRequest {
    pub nom: String,
    pub description: Option<String>,
    pub type_operation: Option<String>,
    pub date_debut_prevue: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub cout_prevue: Option<BigDecimal>,
    pub cout_reel: Option<BigDecimal>,
    pub progression: Option<BigDecimal>,
    pub statut: Option<String>,
    pub responsable_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = operations)]
pub struct UpdateOperationRequest {
    pub nom: Option<String>,
    pub description: Option<String>,
    pub type_operation: Option<String>,
    pub date_debut_prevue: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub date_debut_reelle: Option<NaiveDate>,
    pub date_fin_reelle: Option<NaiveDate>,
    pub cout_prevue: Option<BigDecimal>,
    pub cout_reel: Option<BigDecimal>,
    pub progression: Option<BigDecimal>,
    pub statut: Option<String>,
    pub responsable_id: Option<Uuid>,
}

impl UpdateOperationRequest {
    // diesel rejects an all-None changeset, so callers short-circuit.
    fn est_vide(&self) -> bool {
        self.nom.is_none()
            && self.description.is_none()
            && self.type_operation.is_none()
            && self.date_debut_prevue.is_none()
            && self.date_fin_prevue.is_none()
            && self.date_debut_reelle.is_none()
            && self.date_fin_reelle.is_none()
            && self.cout_prevue.is_none()
            && self.cout_reel.is_none()
            && self.progression.is_none()
            && self.statut.is_none()
            && self.responsable_id.is_none()
    }
}

/// Leaf-state update coming from the field: progression, actual cost,
/// actual dates, status.
#[derive(Debug, Deserialize)]
pub struct ProgressionRequest {
    pub progression: Option<BigDecimal>,
    pub cout_reel: Option<BigDecimal>,
    pub date_debut_reelle: Option<NaiveDate>,
    pub date_fin_reelle: Option<NaiveDate>,
    pub statut: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OperationStatut {
    #[serde(flatten)]
    pub operation: Operation,
    pub statut_couleur: StatutCouleur,
}

fn progression_valide(progression: &BigDecimal) -> bool {
    progression >= &BigDecimal::from(0) && progression <= &BigDecimal::from(100)
}

async fn list_operations(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<Uuid>,
) -> Result<Json<Vec<Operation>>, ApiError> {
    let pool = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Option<Vec<Operation>>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let phase_existe: bool = diesel::select(diesel::dsl::exists(
            phases::table.filter(phases::id.eq(phase_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if !phase_existe {
            return Ok(None);
        }
        operations::table
            .filter(operations::phase_id.eq(phase_id))
            .load::<Operation>(&mut conn)
            .map(Some)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    rows.map(Json).ok_or_else(|| not_found("Phase not found"))
}

async fn create_operation(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<Uuid>,
    Json(req): Json<CreateOperationRequest>,
) -> Result<Json<Operation>, ApiError> {
    if let Some(ref progression) = req.progression {
        if !progression_valide(progression) {
            return Err(bad_request("progression must be between 0 and 100"));
        }
    }
    if let (Some(debut), Some(fin)) = (req.date_debut_prevue, req.date_fin_prevue) {
        if fin < debut {
            return Err(bad_request("date_fin_prevue must come after date_debut_prevue"));
        }
    }

    let operation = Operation {
        id: Uuid::new_v4(),
        phase_id,
        nom: req.nom,
        description: req.description,
        type_operation: req.type_operation,
        date_debut_prevue: req.date_debut_prevue,
        date_fin_prevue: req.date_fin_prevue,
        date_debut_reelle: None,
        date_fin_reelle: None,
        cout_prevue: req.cout_prevue,
        cout_reel: req.cout_reel,
        progression: req.progression.unwrap_or_else(|| BigDecimal::from(0)),
        statut: req
            .statut
            .unwrap_or_else(|| statut_entite::PLANIFIE.to_string()),
        responsable_id: req.responsable_id,
    };

    let pool = state.conn.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<Option<Operation>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let phase_existe: bool = diesel::select(diesel::dsl::exists(
            phases::table.filter(phases::id.eq(phase_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if !phase_existe {
            return Ok(None);
        }

        let created: Operation = diesel::insert_into(operations::table)
            .values(&operation)
            .get_result(&mut conn)
            .map_err(|e| e.to_string())?;

        // New leaf values change the phase aggregates immediately.
        rollup::update_phase_costs(&mut conn, phase_id).map_err(|e| e.to_string())?;
        rollup::update_phase_progress(&mut conn, phase_id).map_err(|e| e.to_string())?;
        Ok(Some(created))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    created.map(Json).ok_or_else(|| not_found("Phase not found"))
}

async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationStatut>, ApiError> {
    let pool = state.conn.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<OperationStatut>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let operation = operations::table
            .find(id)
            .first::<Operation>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(operation) = operation else {
            return Ok(None);
        };
        let today = Utc::now().date_naive();
        let statut_couleur =
            status::statut_operation(&mut conn, &operation, today).map_err(|e| e.to_string())?;
        Ok(Some(OperationStatut {
            operation,
            statut_couleur,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    result.map(Json).ok_or_else(|| not_found("Operation not found"))
}

async fn update_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateOperationRequest>,
) -> Result<Json<Operation>, ApiError> {
    if let Some(ref progression) = req.progression {
        if !progression_valide(progression) {
            return Err(bad_request("progression must be between 0 and 100"));
        }
    }

    let pool = state.conn.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<Option<Operation>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let updated = if req.est_vide() {
            operations::table
                .find(id)
                .first::<Operation>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())?
        } else {
            diesel::update(operations::table.find(id))
                .set(&req)
                .get_result::<Operation>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())?
        };
        let Some(updated) = updated else {
            return Ok(None);
        };

        rollup::update_phase_costs(&mut conn, updated.phase_id).map_err(|e| e.to_string())?;
        rollup::update_phase_progress(&mut conn, updated.phase_id).map_err(|e| e.to_string())?;
        Ok(Some(updated))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    updated.map(Json).ok_or_else(|| not_found("Operation not found"))
}

async fn delete_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<bool, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let operation = operations::table
            .find(id)
            .first::<Operation>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(operation) = operation else {
            return Ok(false);
        };
        diesel::delete(operations::table.find(id))
            .execute(&mut conn)
            .map_err(|e| e.to_string())?;
        rollup::update_phase_costs(&mut conn, operation.phase_id).map_err(|e| e.to_string())?;
        rollup::update_phase_progress(&mut conn, operation.phase_id).map_err(|e| e.to_string())?;
        Ok(true)
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if !deleted {
        return Err(not_found("Operation not found"));
    }
    Ok(Json(json!({"success": true})))
}

/// Field update of the leaf values, then the bottom-up rollup: operation,
/// phase costs, phase progression, project costs.
async fn update_progression(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProgressionRequest>,
) -> Result<Json<OperationStatut>, ApiError> {
    if let Some(ref progression) = req.progression {
        if !progression_valide(progression) {
            return Err(bad_request("progression must be between 0 and 100"));
        }
    }

    let pool = state.conn.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<OperationStatut>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let existante = operations::table
            .find(id)
            .first::<Operation>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(existante) = existante else {
            return Ok(None);
        };

        let operation = diesel::update(operations::table.find(id))
            .set((
                operations::progression
                    .eq(req.progression.unwrap_or(existante.progression.clone())),
                operations::cout_reel
                    .eq(req.cout_reel.or(existante.cout_reel.clone())),
                operations::date_debut_reelle
                    .eq(req.date_debut_reelle.or(existante.date_debut_reelle)),
                operations::date_fin_reelle
                    .eq(req.date_fin_reelle.or(existante.date_fin_reelle)),
                operations::statut.eq(req.statut.unwrap_or(existante.statut.clone())),
            ))
            .get_result::<Operation>(&mut conn)
            .map_err(|e| e.to_string())?;

        rollup::update_phase_costs(&mut conn, operation.phase_id).map_err(|e| e.to_string())?;
        rollup::update_phase_progress(&mut conn, operation.phase_id).map_err(|e| e.to_string())?;

        let today = Utc::now().date_naive();
        let statut_couleur =
            status::statut_operation(&mut conn, &operation, today).map_err(|e| e.to_string())?;
        Ok(Some(OperationStatut {
            operation,
            statut_couleur,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    result.map(Json).ok_or_else(|| not_found("Operation not found"))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/phases/:phase_id/operations",
            get(list_operations).post(create_operation),
        )
        .route(
            "/operations/:id",
            get(get_operation)
                .put(update_operation)
                .delete(delete_operation),
        )
        .route("/operations/:id/progression", post(update_progression))
}

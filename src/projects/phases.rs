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
use crate::shared::models::schema::{operations, phases, projets};
use crate::shared::models::{statut_entite, Operation, Phase};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_error, not_found, ApiError};
use crate::projects::status::StatutCouleur;

#[derive(Debug, Deserialize)]
pub struct CreatePhaseRequest {
    pub nom: String,
    pub description: Option<String>,
    pub ordre: i32,
    pub date_debut_prevue: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub budget_alloue: Option<BigDecimal>,
    pub statut: Option<String>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = phases)]
pub struct UpdatePhaseRequest {
    pub nom: Option<String>,
    pub description: Option<String>,
    pub ordre: Option<i32>,
    pub date_debut_prevue: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub date_debut_reelle: Option<NaiveDate>,
    pub date_fin_reelle: Option<NaiveDate>,
    pub budget_alloue: Option<BigDecimal>,
    pub statut: Option<String>,
}

impl UpdatePhaseRequest {
    // diesel rejects an all-None changeset, so callers short-circuit.
    fn est_vide(&self) -> bool {
        self.nom.is_none()
            && self.description.is_none()
            && self.ordre.is_none()
            && self.date_debut_prevue.is_none()
            && self.date_fin_prevue.is_none()
            && self.date_debut_reelle.is_none()
            && self.date_fin_reelle.is_none()
            && self.budget_alloue.is_none()
            && self.statut.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct PhaseDetail {
    #[serde(flatten)]
    pub phase: Phase,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Serialize)]
pub struct PhaseStatut {
    pub id: Uuid,
    pub nom: String,
    pub progression: BigDecimal,
    #[serde(flatten)]
    pub statut_couleur: StatutCouleur,
}

async fn list_phases(
    State(state): State<Arc<AppState>>,
    Path(projet_id): Path<Uuid>,
) -> Result<Json<Vec<Phase>>, ApiError> {
    let pool = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Option<Vec<Phase>>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let projet_existe: bool = diesel::select(diesel::dsl::exists(
            projets::table.filter(projets::id.eq(projet_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if !projet_existe {
            return Ok(None);
        }
        phases::table
            .filter(phases::projet_id.eq(projet_id))
            .order(phases::ordre.asc())
            .load::<Phase>(&mut conn)
            .map(Some)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    rows.map(Json).ok_or_else(|| not_found("Projet not found"))
}

async fn create_phase(
    State(state): State<Arc<AppState>>,
    Path(projet_id): Path<Uuid>,
    Json(req): Json<CreatePhaseRequest>,
) -> Result<Json<Phase>, ApiError> {
    if let (Some(debut), Some(fin)) = (req.date_debut_prevue, req.date_fin_prevue) {
        if fin < debut {
            return Err(bad_request("date_fin_prevue must come after date_debut_prevue"));
        }
    }

    let phase = Phase {
        id: Uuid::new_v4(),
        projet_id,
        nom: req.nom,
        description: req.description,
        ordre: req.ordre,
        date_debut_prevue: req.date_debut_prevue,
        date_fin_prevue: req.date_fin_prevue,
        date_debut_reelle: None,
        date_fin_reelle: None,
        budget_alloue: req.budget_alloue,
        cout_actuel: None,
        progression: BigDecimal::from(0),
        statut: req
            .statut
            .unwrap_or_else(|| statut_entite::PLANIFIE.to_string()),
    };

    let pool = state.conn.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<Option<Phase>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let projet_existe: bool = diesel::select(diesel::dsl::exists(
            projets::table.filter(projets::id.eq(projet_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if !projet_existe {
            return Ok(None);
        }

        let created: Phase = diesel::insert_into(phases::table)
            .values(&phase)
            .get_result(&mut conn)
            .map_err(|e| e.to_string())?;
        rollup::update_project_costs(&mut conn, projet_id).map_err(|e| e.to_string())?;
        Ok(Some(created))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    created.map(Json).ok_or_else(|| not_found("Projet not found"))
}

async fn get_phase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PhaseDetail>, ApiError> {
    let pool = state.conn.clone();
    let detail = tokio::task::spawn_blocking(move || -> Result<Option<PhaseDetail>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let phase = phases::table
            .find(id)
            .first::<Phase>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(phase) = phase else {
            return Ok(None);
        };
        let ops = operations::table
            .filter(operations::phase_id.eq(id))
            .load::<Operation>(&mut conn)
            .map_err(|e| e.to_string())?;
        Ok(Some(PhaseDetail {
            phase,
            operations: ops,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    detail.map(Json).ok_or_else(|| not_found("Phase not found"))
}

/// Raw-field update, then an explicit rollup pass: a changed budget can
/// move the weighted progression, so both cost and progress are refreshed.
async fn update_phase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePhaseRequest>,
) -> Result<Json<Phase>, ApiError> {
    let pool = state.conn.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<Option<Phase>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let updated = if req.est_vide() {
            phases::table
                .find(id)
                .first::<Phase>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())?
        } else {
            diesel::update(phases::table.find(id))
                .set(&req)
                .get_result::<Phase>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())?
        };
        let Some(_) = updated else {
            return Ok(None);
        };

        rollup::update_phase_costs(&mut conn, id).map_err(|e| e.to_string())?;
        rollup::update_phase_progress(&mut conn, id).map_err(|e| e.to_string())?;

        phases::table
            .find(id)
            .first::<Phase>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    updated.map(Json).ok_or_else(|| not_found("Phase not found"))
}

async fn delete_phase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<bool, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let phase = phases::table
            .find(id)
            .first::<Phase>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(phase) = phase else {
            return Ok(false);
        };
        diesel::delete(phases::table.find(id))
            .execute(&mut conn)
            .map_err(|e| e.to_string())?;
        rollup::update_project_costs(&mut conn, phase.projet_id).map_err(|e| e.to_string())?;
        Ok(true)
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if !deleted {
        return Err(not_found("Phase not found"));
    }
    Ok(Json(json!({"success": true})))
}

async fn statut_phase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PhaseStatut>, ApiError> {
    let pool = state.conn.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<PhaseStatut>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let phase = phases::table
            .find(id)
            .first::<Phase>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(phase) = phase else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        let statut_couleur =
            status::statut_phase(&mut conn, phase.id, today).map_err(|e| e.to_string())?;
        Ok(Some(PhaseStatut {
            id: phase.id,
            nom: phase.nom,
            progression: phase.progression,
            statut_couleur,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    result.map(Json).ok_or_else(|| not_found("Phase not found"))
}

/// Recompute the phase's derived fields from its operations and return the
/// refreshed row.
async fn update_phase_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Phase>, ApiError> {
    let pool = state.conn.clone();
    let phase = tokio::task::spawn_blocking(move || -> Result<Option<Phase>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        if !rollup::update_phase_costs(&mut conn, id).map_err(|e| e.to_string())? {
            return Ok(None);
        }
        rollup::update_phase_progress(&mut conn, id).map_err(|e| e.to_string())?;
        phases::table
            .find(id)
            .first::<Phase>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    phase.map(Json).ok_or_else(|| not_found("Phase not found"))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/projets/:projet_id/phases",
            get(list_phases).post(create_phase),
        )
        .route(
            "/phases/:id",
            get(get_phase).put(update_phase).delete(delete_phase),
        )
        .route("/phases/:id/statut", get(statut_phase))
        .route("/phases/:id/update-progress", post(update_phase_progress))
}

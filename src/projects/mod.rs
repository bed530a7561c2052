pub mod operations;
pub mod phases;
pub mod rollup;
pub mod status;
pub mod team;

use axum::{
    extract::{Path, Query, State},
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

use crate::shared::models::schema::phases as phases_dsl;
use crate::shared::models::schema::projets;
use crate::shared::models::{statut_entite, Phase, Projet};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_error, not_found, ApiError};
use self::status::StatutCouleur;

#[derive(Debug, Deserialize)]
pub struct CreateProjetRequest {
    pub nom: String,
    pub description: Option<String>,
    pub localisation: Option<String>,
    pub budget_initial: Option<BigDecimal>,
    pub date_debut: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub statut: Option<String>,
    pub responsable_id: Option<Uuid>,
    pub seuil_alerte_cout: Option<BigDecimal>,
    pub seuil_alerte_delai: Option<BigDecimal>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = projets)]
pub struct UpdateProjetRequest {
    pub nom: Option<String>,
    pub description: Option<String>,
    pub localisation: Option<String>,
    pub budget_initial: Option<BigDecimal>,
    pub date_debut: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub date_fin_reelle: Option<NaiveDate>,
    pub statut: Option<String>,
    pub responsable_id: Option<Uuid>,
    pub seuil_alerte_cout: Option<BigDecimal>,
    pub seuil_alerte_delai: Option<BigDecimal>,
}

impl UpdateProjetRequest {
    // diesel rejects an all-None changeset, so callers short-circuit.
    fn est_vide(&self) -> bool {
        self.nom.is_none()
            && self.description.is_none()
            && self.localisation.is_none()
            && self.budget_initial.is_none()
            && self.date_debut.is_none()
            && self.date_fin_prevue.is_none()
            && self.date_fin_reelle.is_none()
            && self.statut.is_none()
            && self.responsable_id.is_none()
            && self.seuil_alerte_cout.is_none()
            && self.seuil_alerte_delai.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjetFilters {
    pub statut: Option<String>,
    pub responsable_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ProjetDetail {
    #[serde(flatten)]
    pub projet: Projet,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Serialize)]
pub struct ProjetStatut {
    pub id: Uuid,
    pub nom: String,
    pub progression: BigDecimal,
    #[serde(flatten)]
    pub statut_couleur: StatutCouleur,
}

fn valider_dates_et_budget(
    date_debut: Option<NaiveDate>,
    date_fin_prevue: Option<NaiveDate>,
    budget_initial: Option<&BigDecimal>,
) -> Result<(), ApiError> {
    if let (Some(debut), Some(fin)) = (date_debut, date_fin_prevue) {
        if fin < debut {
            return Err(bad_request(
                "date_fin_prevue must come after date_debut",
            ));
        }
    }
    if let Some(budget) = budget_initial {
        if budget < &BigDecimal::from(0) {
            return Err(bad_request("budget_initial must be positive"));
        }
    }
    Ok(())
}

fn statut_valide(statut: &str) -> bool {
    [
        statut_entite::PLANIFIE,
        statut_entite::EN_COURS,
        statut_entite::TERMINE,
        statut_entite::SUSPENDU,
    ]
    .contains(&statut)
}

async fn list_projets(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<ProjetFilters>,
) -> Result<Json<Vec<Projet>>, ApiError> {
    let pool = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<_, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let mut query = projets::table.into_boxed();
        if let Some(ref statut) = filters.statut {
            query = query.filter(projets::statut.eq(statut.clone()));
        }
        if let Some(responsable_id) = filters.responsable_id {
            query = query.filter(projets::responsable_id.eq(responsable_id));
        }
        query
            .order(projets::date_creation.desc())
            .load::<Projet>(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(rows))
}

async fn create_projet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjetRequest>,
) -> Result<Json<Projet>, ApiError> {
    valider_dates_et_budget(req.date_debut, req.date_fin_prevue, req.budget_initial.as_ref())?;
    let statut = req
        .statut
        .unwrap_or_else(|| statut_entite::PLANIFIE.to_string());
    if !statut_valide(&statut) {
        return Err(bad_request("Unknown project statut"));
    }

    let projet = Projet {
        id: Uuid::new_v4(),
        nom: req.nom,
        description: req.description,
        localisation: req.localisation,
        budget_initial: req.budget_initial,
        cout_actuel: None,
        date_debut: req.date_debut,
        date_fin_prevue: req.date_fin_prevue,
        date_fin_reelle: None,
        statut,
        responsable_id: req.responsable_id,
        seuil_alerte_cout: req.seuil_alerte_cout.unwrap_or_else(|| BigDecimal::from(80)),
        seuil_alerte_delai: req
            .seuil_alerte_delai
            .unwrap_or_else(|| BigDecimal::from(80)),
        date_creation: Utc::now(),
    };

    let pool = state.conn.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<Projet, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::insert_into(projets::table)
            .values(&projet)
            .get_result(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(created))
}

async fn get_projet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjetDetail>, ApiError> {
    let pool = state.conn.clone();
    let detail = tokio::task::spawn_blocking(move || -> Result<Option<ProjetDetail>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let projet = projets::table
            .find(id)
            .first::<Projet>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(projet) = projet else {
            return Ok(None);
        };
        let phase_rows = phases_dsl::table
            .filter(phases_dsl::projet_id.eq(id))
            .order(phases_dsl::ordre.asc())
            .load::<Phase>(&mut conn)
            .map_err(|e| e.to_string())?;
        Ok(Some(ProjetDetail {
            projet,
            phases: phase_rows,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    detail.map(Json).ok_or_else(|| not_found("Projet not found"))
}

async fn update_projet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProjetRequest>,
) -> Result<Json<Projet>, ApiError> {
    valider_dates_et_budget(req.date_debut, req.date_fin_prevue, req.budget_initial.as_ref())?;
    if let Some(ref statut) = req.statut {
        if !statut_valide(statut) {
            return Err(bad_request("Unknown project statut"));
        }
    }

    let pool = state.conn.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<Option<Projet>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        if req.est_vide() {
            return projets::table
                .find(id)
                .first::<Projet>(&mut conn)
                .optional()
                .map_err(|e| e.to_string());
        }
        diesel::update(projets::table.find(id))
            .set(&req)
            .get_result::<Projet>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    updated.map(Json).ok_or_else(|| not_found("Projet not found"))
}

async fn delete_projet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::delete(projets::table.find(id))
            .execute(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if deleted == 0 {
        return Err(not_found("Projet not found"));
    }
    Ok(Json(json!({"success": true})))
}

/// Read-only health view: colour triple plus computed progression.
async fn statut_projet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjetStatut>, ApiError> {
    let pool = state.conn.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<ProjetStatut>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let projet = projets::table
            .find(id)
            .first::<Projet>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(projet) = projet else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        let statut_couleur =
            status::statut_projet(&mut conn, projet.id, today).map_err(|e| e.to_string())?;
        let progression =
            rollup::calculate_project_progress(&mut conn, projet.id).map_err(|e| e.to_string())?;

        Ok(Some(ProjetStatut {
            id: projet.id,
            nom: projet.nom,
            progression,
            statut_couleur,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    result.map(Json).ok_or_else(|| not_found("Projet not found"))
}

/// Refresh every derived field under the project (phase costs and
/// progressions, then the project cost) and return the updated picture.
async fn update_projet_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<serde_json::Value>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        if !rollup::refresh_project_rollups(&mut conn, id).map_err(|e| e.to_string())? {
            return Ok(None);
        }

        let projet = projets::table
            .find(id)
            .first::<Projet>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(projet) = projet else {
            return Ok(None);
        };
        let phase_rows = phases_dsl::table
            .filter(phases_dsl::projet_id.eq(id))
            .order(phases_dsl::ordre.asc())
            .load::<Phase>(&mut conn)
            .map_err(|e| e.to_string())?;

        let today = Utc::now().date_naive();
        let statut_couleur =
            status::statut_projet(&mut conn, id, today).map_err(|e| e.to_string())?;
        let progression =
            rollup::calculate_project_progress(&mut conn, id).map_err(|e| e.to_string())?;

        Ok(Some(json!({
            "id": projet.id,
            "nom": projet.nom,
            "cout_actuel": projet.cout_actuel,
            "progression": progression,
            "statut_couleur": statut_couleur,
            "phases": phase_rows,
        })))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    result.map(Json).ok_or_else(|| not_found("Projet not found"))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projets", get(list_projets).post(create_projet))
        .route(
            "/projets/:id",
            get(get_projet).put(update_projet).delete(delete_projet),
        )
        .route("/projets/:id/statut", get(statut_projet))
        .route("/projets/:id/update-progress", post(update_projet_progress))
}

//! Project team assignments. A (projet, utilisateur) pair is unique, and
//! every role change leaves an audit row behind.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::history::enregistrer_modification;
use crate::shared::models::schema::{equipes_projet, projets, utilisateurs};
use crate::shared::models::{EquipeProjet, Utilisateur};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_error, not_found, ApiError};

#[derive(Debug, Deserialize)]
pub struct AffectationRequest {
    pub projet_id: Uuid,
    pub utilisateur_id: Uuid,
    pub role_projet: String,
    pub affecte_par: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ChangementRoleRequest {
    pub role_projet: String,
    pub modifie_par: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MembreEquipe {
    #[serde(flatten)]
    pub affectation: EquipeProjet,
    pub utilisateur: Utilisateur,
}

async fn projet_membres(
    State(state): State<Arc<AppState>>,
    Path(projet_id): Path<Uuid>,
) -> Result<Json<Vec<MembreEquipe>>, ApiError> {
    let pool = state.conn.clone();
    let membres = tokio::task::spawn_blocking(move || -> Result<Option<Vec<MembreEquipe>>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let projet_existe: bool = diesel::select(diesel::dsl::exists(
            projets::table.filter(projets::id.eq(projet_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if !projet_existe {
            return Ok(None);
        }

        let rows: Vec<(EquipeProjet, Utilisateur)> = equipes_projet::table
            .inner_join(utilisateurs::table)
            .filter(equipes_projet::projet_id.eq(projet_id))
            .order(equipes_projet::date_affectation.asc())
            .load(&mut conn)
            .map_err(|e| e.to_string())?;
        Ok(Some(
            rows.into_iter()
                .map(|(affectation, utilisateur)| MembreEquipe {
                    affectation,
                    utilisateur,
                })
                .collect(),
        ))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    membres.map(Json).ok_or_else(|| not_found("Projet not found"))
}

async fn affecter_utilisateur(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AffectationRequest>,
) -> Result<Json<EquipeProjet>, ApiError> {
    if req.role_projet.trim().is_empty() {
        return Err(bad_request("role_projet must not be empty"));
    }

    let pool = state.conn.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Result<EquipeProjet, &'static str>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let deja_affecte: bool = diesel::select(diesel::dsl::exists(
            equipes_projet::table
                .filter(equipes_projet::projet_id.eq(req.projet_id))
                .filter(equipes_projet::utilisateur_id.eq(req.utilisateur_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if deja_affecte {
            return Ok(Err("User is already assigned to this project"));
        }

        let affectation = EquipeProjet {
            id: Uuid::new_v4(),
            projet_id: req.projet_id,
            utilisateur_id: req.utilisateur_id,
            role_projet: req.role_projet,
            date_affectation: Utc::now(),
            affecte_par: req.affecte_par,
        };
        diesel::insert_into(equipes_projet::table)
            .values(&affectation)
            .get_result(&mut conn)
            .map(Ok)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    match result {
        Ok(affectation) => Ok(Json(affectation)),
        Err(message) => Err(bad_request(message)),
    }
}

/// Change a member's project role; the old value goes to the audit trail
/// in the same transaction.
async fn changer_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangementRoleRequest>,
) -> Result<Json<EquipeProjet>, ApiError> {
    if req.role_projet.trim().is_empty() {
        return Err(bad_request("role_projet must not be empty"));
    }

    let pool = state.conn.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<Option<EquipeProjet>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let existante = equipes_projet::table
            .find(id)
            .first::<EquipeProjet>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(existante) = existante else {
            return Ok(None);
        };

        if existante.role_projet == req.role_projet {
            return Ok(Some(existante));
        }

        conn.transaction::<EquipeProjet, diesel::result::Error, _>(|conn| {
            enregistrer_modification(
                conn,
                "EquipeProjet",
                existante.id,
                "role_projet",
                Some(existante.role_projet.clone()),
                Some(req.role_projet.clone()),
                req.modifie_par,
                None,
            )?;
            diesel::update(equipes_projet::table.find(id))
                .set(equipes_projet::role_projet.eq(req.role_projet.clone()))
                .get_result(conn)
        })
        .map(Some)
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    updated
        .map(Json)
        .ok_or_else(|| not_found("Affectation not found"))
}

async fn desaffecter_utilisateur(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::delete(equipes_projet::table.find(id))
            .execute(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if deleted == 0 {
        return Err(not_found("Affectation not found"));
    }
    Ok(Json(json!({"success": true})))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projets/:projet_id/membres", get(projet_membres))
        .route("/equipes/affecter", post(affecter_utilisateur))
        .route(
            "/equipes/:id",
            put(changer_role).delete(desaffecter_utilisateur),
        )
}

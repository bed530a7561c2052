//! Threshold triples (seuils) attached to operations, with write-time
//! validation and a field-level audit trail on every change.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::history::enregistrer_modification;
use crate::shared::models::schema::{historique_modifications, operations, seuils};
use crate::shared::models::{HistoriqueModification, Seuil};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_error, not_found, ApiError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeuilValidationError {
    #[error("valeur_verte must be strictly lower than valeur_jaune")]
    VerteAuDessusDuJaune,
    #[error("valeur_jaune must be lower than or equal to valeur_rouge")]
    JauneAuDessusDuRouge,
}

/// The triple must be increasing: verte < jaune <= rouge. Rejected before
/// persistence, never silently corrected.
pub fn valider_seuil(
    verte: &BigDecimal,
    jaune: &BigDecimal,
    rouge: &BigDecimal,
) -> Result<(), SeuilValidationError> {
    if verte >= jaune {
        return Err(SeuilValidationError::VerteAuDessusDuJaune);
    }
    if jaune > rouge {
        return Err(SeuilValidationError::JauneAuDessusDuRouge);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateSeuilRequest {
    pub valeur_verte: BigDecimal,
    pub valeur_jaune: BigDecimal,
    pub valeur_rouge: BigDecimal,
    pub defini_par: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSeuilRequest {
    pub valeur_verte: Option<BigDecimal>,
    pub valeur_jaune: Option<BigDecimal>,
    pub valeur_rouge: Option<BigDecimal>,
    pub modifie_par: Option<Uuid>,
}

async fn list_seuils_operation(
    State(state): State<Arc<AppState>>,
    Path(operation_id): Path<Uuid>,
) -> Result<Json<Vec<Seuil>>, ApiError> {
    let pool = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<_, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        seuils::table
            .filter(seuils::operation_id.eq(operation_id))
            .order(seuils::date_definition.asc())
            .load::<Seuil>(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(rows))
}

async fn create_seuil(
    State(state): State<Arc<AppState>>,
    Path(operation_id): Path<Uuid>,
    Json(req): Json<CreateSeuilRequest>,
) -> Result<Json<Seuil>, ApiError> {
    if let Err(e) = valider_seuil(&req.valeur_verte, &req.valeur_jaune, &req.valeur_rouge) {
        return Err(bad_request(&e.to_string()));
    }

    let pool = state.conn.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<Option<Seuil>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let operation_existe: bool = diesel::select(diesel::dsl::exists(
            operations::table.filter(operations::id.eq(operation_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if !operation_existe {
            return Ok(None);
        }

        let seuil = Seuil {
            id: Uuid::new_v4(),
            operation_id,
            valeur_verte: req.valeur_verte,
            valeur_jaune: req.valeur_jaune,
            valeur_rouge: req.valeur_rouge,
            date_definition: Utc::now(),
            defini_par: req.defini_par,
            date_modification: None,
            modifie_par: None,
        };
        diesel::insert_into(seuils::table)
            .values(&seuil)
            .get_result(&mut conn)
            .map(Some)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    created
        .map(Json)
        .ok_or_else(|| not_found("Operation not found"))
}

async fn get_seuil(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Seuil>, ApiError> {
    let pool = state.conn.clone();
    let seuil = tokio::task::spawn_blocking(move || -> Result<Option<Seuil>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        seuils::table
            .find(id)
            .first::<Seuil>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    seuil.map(Json).ok_or_else(|| not_found("Seuil not found"))
}

/// Update a threshold. The merged triple is validated, the stamped fields
/// are refreshed, and one history row per changed value is written in the
/// same transaction as the update.
async fn update_seuil(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSeuilRequest>,
) -> Result<Json<Seuil>, ApiError> {
    let pool = state.conn.clone();
    let result = tokio::task::spawn_blocking(
        move || -> Result<Result<Option<Seuil>, SeuilValidationError>, String> {
            let mut conn = pool.get().map_err(|e| e.to_string())?;

            let existant = seuils::table
                .find(id)
                .first::<Seuil>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())?;
            let Some(existant) = existant else {
                return Ok(Ok(None));
            };

            let verte = req.valeur_verte.clone().unwrap_or(existant.valeur_verte.clone());
            let jaune = req.valeur_jaune.clone().unwrap_or(existant.valeur_jaune.clone());
            let rouge = req.valeur_rouge.clone().unwrap_or(existant.valeur_rouge.clone());
            if let Err(e) = valider_seuil(&verte, &jaune, &rouge) {
                return Ok(Err(e));
            }

            let updated = conn
                .transaction::<Seuil, diesel::result::Error, _>(|conn| {
                    let changements = [
                        ("valeur_verte", &existant.valeur_verte, &verte),
                        ("valeur_jaune", &existant.valeur_jaune, &jaune),
                        ("valeur_rouge", &existant.valeur_rouge, &rouge),
                    ];
                    for (champ, ancienne, nouvelle) in changements {
                        if ancienne != nouvelle {
                            enregistrer_modification(
                                conn,
                                "Seuil",
                                existant.id,
                                champ,
                                Some(ancienne.to_string()),
                                Some(nouvelle.to_string()),
                                req.modifie_par,
                                None,
                            )?;
                        }
                    }

                    diesel::update(seuils::table.find(id))
                        .set((
                            seuils::valeur_verte.eq(verte),
                            seuils::valeur_jaune.eq(jaune),
                            seuils::valeur_rouge.eq(rouge),
                            seuils::modifie_par.eq(req.modifie_par),
                            seuils::date_modification.eq(Some(Utc::now())),
                        ))
                        .get_result(conn)
                })
                .map_err(|e| e.to_string())?;
            Ok(Ok(Some(updated)))
        },
    )
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    match result {
        Ok(Some(seuil)) => Ok(Json(seuil)),
        Ok(None) => Err(not_found("Seuil not found")),
        Err(e) => Err(bad_request(&e.to_string())),
    }
}

async fn delete_seuil(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::delete(seuils::table.find(id))
            .execute(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if deleted == 0 {
        return Err(not_found("Seuil not found"));
    }
    Ok(Json(json!({"success": true})))
}

async fn historique_seuil(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<HistoriqueModification>>, ApiError> {
    let pool = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<_, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        historique_modifications::table
            .filter(historique_modifications::table_modifiee.eq("Seuil"))
            .filter(historique_modifications::id_enregistrement.eq(id))
            .order(historique_modifications::date_modification.desc())
            .load::<HistoriqueModification>(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(rows))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/operations/:operation_id/seuils",
            get(list_seuils_operation).post(create_seuil),
        )
        .route(
            "/seuils/:id",
            get(get_seuil).put(update_seuil).delete(delete_seuil),
        )
        .route("/seuils/:id/historique", get(historique_seuil))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bd(value: i64) -> BigDecimal {
        BigDecimal::from(value)
    }

    #[test]
    fn triple_croissant_accepte() {
        assert!(valider_seuil(&bd(10), &bd(20), &bd(30)).is_ok());
    }

    #[test]
    fn jaune_egal_rouge_accepte() {
        assert!(valider_seuil(&bd(10), &bd(30), &bd(30)).is_ok());
    }

    #[test]
    fn verte_au_dessus_du_jaune_rejete() {
        assert_eq!(
            valider_seuil(&bd(30), &bd(20), &bd(40)),
            Err(SeuilValidationError::VerteAuDessusDuJaune)
        );
    }

    #[test]
    fn verte_egale_jaune_rejete() {
        assert_eq!(
            valider_seuil(&bd(20), &bd(20), &bd(40)),
            Err(SeuilValidationError::VerteAuDessusDuJaune)
        );
    }

    #[test]
    fn jaune_au_dessus_du_rouge_rejete() {
        assert_eq!(
            valider_seuil(&bd(10), &bd(50), &bd(40)),
            Err(SeuilValidationError::JauneAuDessusDuRouge)
        );
    }
}

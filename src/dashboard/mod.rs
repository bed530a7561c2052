//! Read-only aggregation endpoints backing the monitoring dashboards.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::problems::{gravite_probleme, statut_probleme};
use crate::projects::{rollup, status};
use crate::shared::models::schema::{alertes, operations, phases, problemes, projets};
use crate::shared::models::{niveau_alerte, statut_entite, Operation, Phase, Projet};
use crate::shared::state::AppState;
use crate::shared::utils::{internal_error, not_found, ApiError};

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

async fn dashboard_general(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let data = tokio::task::spawn_blocking(move || -> Result<serde_json::Value, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tous: Vec<Projet> = projets::table.load(&mut conn).map_err(|e| e.to_string())?;

        let compte = |statut: &str| tous.iter().filter(|p| p.statut == statut).count();
        let budget_initial_total: BigDecimal = tous
            .iter()
            .filter_map(|p| p.budget_initial.clone())
            .sum();
        let cout_actuel_total: BigDecimal =
            tous.iter().filter_map(|p| p.cout_actuel.clone()).sum();
        let ecart_budgetaire = &cout_actuel_total - &budget_initial_total;

        let today = Utc::now().date_naive();
        let en_retard = tous
            .iter()
            .filter(|p| {
                p.statut == statut_entite::EN_COURS
                    && p.date_fin_reelle.is_none()
                    && p.date_fin_prevue.map_or(false, |fin| fin < today)
            })
            .count();

        // Mean slip of finished-late projects, in days.
        let retards: Vec<i64> = tous
            .iter()
            .filter(|p| p.statut == statut_entite::TERMINE)
            .filter_map(|p| match (p.date_fin_reelle, p.date_fin_prevue) {
                (Some(reelle), Some(prevue)) if reelle > prevue => {
                    Some((reelle - prevue).num_days())
                }
                _ => None,
            })
            .collect();
        let retard_moyen_jours = if retards.is_empty() {
            0
        } else {
            retards.iter().sum::<i64>() / retards.len() as i64
        };

        let mut progression_moyenne = zero();
        let mut projets_avec_phases = 0;
        for projet in &tous {
            let nb_phases: i64 = phases::table
                .filter(phases::projet_id.eq(projet.id))
                .count()
                .get_result(&mut conn)
                .map_err(|e| e.to_string())?;
            if nb_phases > 0 {
                progression_moyenne += rollup::calculate_project_progress(&mut conn, projet.id)
                    .map_err(|e| e.to_string())?;
                projets_avec_phases += 1;
            }
        }
        if projets_avec_phases > 0 {
            progression_moyenne =
                (progression_moyenne / BigDecimal::from(projets_avec_phases)).round(2);
        }

        let termines = compte(statut_entite::TERMINE);
        let taux_reussite = if termines > 0 {
            let reussis = tous
                .iter()
                .filter(|p| p.statut == statut_entite::TERMINE)
                .filter(|p| match (p.date_fin_reelle, p.date_fin_prevue) {
                    (Some(reelle), Some(prevue)) => reelle <= prevue,
                    _ => false,
                })
                .filter(|p| match (&p.cout_actuel, &p.budget_initial) {
                    (Some(cout), Some(budget)) => cout <= budget,
                    _ => false,
                })
                .count();
            (reussis as f64 / termines as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(json!({
            "total_projets": tous.len(),
            "projets_planifies": compte(statut_entite::PLANIFIE),
            "projets_en_cours": compte(statut_entite::EN_COURS),
            "projets_termines": termines,
            "projets_suspendus": compte(statut_entite::SUSPENDU),
            "budget_initial_total": budget_initial_total,
            "cout_actuel_total": cout_actuel_total,
            "ecart_budgetaire": ecart_budgetaire,
            "projets_en_retard": en_retard,
            "retard_moyen_jours": retard_moyen_jours,
            "progression_moyenne": progression_moyenne,
            "taux_reussite": taux_reussite,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(data))
}

async fn dashboard_projet(
    State(state): State<Arc<AppState>>,
    Path(projet_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let data = tokio::task::spawn_blocking(move || -> Result<Option<serde_json::Value>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let projet = projets::table
            .find(projet_id)
            .first::<Projet>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(projet) = projet else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        let progression = rollup::calculate_project_progress(&mut conn, projet_id)
            .map_err(|e| e.to_string())?;
        let statut_couleur =
            status::statut_projet(&mut conn, projet_id, today).map_err(|e| e.to_string())?;

        let budget_initial = projet.budget_initial.clone().unwrap_or_else(zero);
        let cout_actuel = projet.cout_actuel.clone().unwrap_or_else(zero);
        let pourcentage_budget_consomme = if budget_initial > zero() {
            (&cout_actuel * BigDecimal::from(100) / &budget_initial).round(2)
        } else {
            zero()
        };

        let mut retard_jours = 0;
        let mut retard_pourcentage = zero();
        if let Some(fin_prevue) = projet.date_fin_prevue {
            retard_jours = match projet.date_fin_reelle {
                Some(fin_reelle) => (fin_reelle - fin_prevue).num_days().max(0),
                None if today > fin_prevue => (today - fin_prevue).num_days(),
                None => 0,
            };
            if let Some(debut) = projet.date_debut {
                let duree_prevue = (fin_prevue - debut).num_days();
                if duree_prevue > 0 {
                    retard_pourcentage = (BigDecimal::from(retard_jours) * BigDecimal::from(100)
                        / BigDecimal::from(duree_prevue))
                    .round(2);
                }
            }
        }

        let compte_alertes = |conn: &mut PgConnection, niveau: &str| -> Result<i64, String> {
            alertes::table
                .filter(alertes::projet_id.eq(projet_id))
                .filter(alertes::niveau.eq(niveau))
                .count()
                .get_result(conn)
                .map_err(|e| e.to_string())
        };
        let alertes_critiques = compte_alertes(&mut conn, niveau_alerte::CRITIQUE)?;
        let alertes_avertissements = compte_alertes(&mut conn, niveau_alerte::WARNING)?;
        let alertes_informations = compte_alertes(&mut conn, niveau_alerte::INFO)?;

        let compte_problemes = |conn: &mut PgConnection, gravite: &str| -> Result<i64, String> {
            problemes::table
                .filter(problemes::projet_id.eq(projet_id))
                .filter(problemes::statut.eq_any(statut_probleme::NON_RESOLUS))
                .filter(problemes::gravite.eq(gravite))
                .count()
                .get_result(conn)
                .map_err(|e| e.to_string())
        };

        Ok(Some(json!({
            "id": projet.id,
            "nom": projet.nom,
            "progression": progression,
            "statut_cout": statut_couleur.statut_cout,
            "statut_delai": statut_couleur.statut_delai,
            "statut_global": statut_couleur.statut_global,
            "budget_initial": budget_initial,
            "cout_actuel": cout_actuel,
            "pourcentage_budget_consomme": pourcentage_budget_consomme,
            "date_debut": projet.date_debut,
            "date_fin_prevue": projet.date_fin_prevue,
            "date_fin_reelle": projet.date_fin_reelle,
            "retard_jours": retard_jours,
            "retard_pourcentage": retard_pourcentage,
            "alertes_critiques": alertes_critiques,
            "alertes_avertissements": alertes_avertissements,
            "alertes_informations": alertes_informations,
            "problemes_non_resolus_critiques": compte_problemes(&mut conn, gravite_probleme::CRITIQUE)?,
            "problemes_non_resolus_eleves": compte_problemes(&mut conn, gravite_probleme::ELEVEE)?,
            "problemes_non_resolus_moyens": compte_problemes(&mut conn, gravite_probleme::MOYENNE)?,
            "problemes_non_resolus_faibles": compte_problemes(&mut conn, gravite_probleme::FAIBLE)?,
        })))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    data.map(Json).ok_or_else(|| not_found("Projet not found"))
}

async fn dashboard_phase(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let data = tokio::task::spawn_blocking(move || -> Result<Option<serde_json::Value>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let phase = phases::table
            .find(phase_id)
            .first::<Phase>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(phase) = phase else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        let statut_couleur =
            status::statut_phase(&mut conn, phase_id, today).map_err(|e| e.to_string())?;

        let ops: Vec<Operation> = operations::table
            .filter(operations::phase_id.eq(phase_id))
            .load(&mut conn)
            .map_err(|e| e.to_string())?;

        let budget_alloue = phase.budget_alloue.clone().unwrap_or_else(zero);
        let cout_actuel: BigDecimal = ops.iter().filter_map(|op| op.cout_reel.clone()).sum();
        let pourcentage_budget_consomme = if budget_alloue > zero() {
            (&cout_actuel * BigDecimal::from(100) / &budget_alloue).round(2)
        } else {
            zero()
        };

        let retard_jours = match (phase.date_fin_prevue, phase.date_fin_reelle) {
            (Some(prevue), Some(reelle)) => (reelle - prevue).num_days(),
            (Some(prevue), None) if prevue < today && phase.statut != statut_entite::TERMINE => {
                (today - prevue).num_days()
            }
            _ => 0,
        };

        let compte = |statut: &str| ops.iter().filter(|op| op.statut == statut).count();
        let mut operations_retard = 0;
        let mut operations_avec_date = 0;
        for op in ops.iter().filter(|op| op.statut != statut_entite::TERMINE) {
            if let Some(fin_prevue) = op.date_fin_prevue {
                operations_avec_date += 1;
                if fin_prevue < today {
                    operations_retard += 1;
                }
            }
        }
        let pourcentage_operations_retard = if operations_avec_date > 0 {
            (operations_retard as f64 / operations_avec_date as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(Some(json!({
            "id": phase.id,
            "nom": phase.nom,
            "progression": phase.progression,
            "statut_cout": statut_couleur.statut_cout,
            "statut_delai": statut_couleur.statut_delai,
            "statut_global": statut_couleur.statut_global,
            "budget_alloue": budget_alloue,
            "cout_actuel": cout_actuel,
            "pourcentage_budget_consomme": pourcentage_budget_consomme,
            "date_debut_prevue": phase.date_debut_prevue,
            "date_fin_prevue": phase.date_fin_prevue,
            "date_debut_reelle": phase.date_debut_reelle,
            "date_fin_reelle": phase.date_fin_reelle,
            "retard_jours": retard_jours,
            "operations_terminees": compte(statut_entite::TERMINE),
            "operations_en_cours": compte(statut_entite::EN_COURS),
            "operations_planifiees": compte(statut_entite::PLANIFIE),
            "operations_suspendues": compte(statut_entite::SUSPENDU),
            "pourcentage_operations_retard": pourcentage_operations_retard,
        })))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    data.map(Json).ok_or_else(|| not_found("Phase not found"))
}

async fn dashboard_operation(
    State(state): State<Arc<AppState>>,
    Path(operation_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let data = tokio::task::spawn_blocking(move || -> Result<Option<serde_json::Value>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let operation = operations::table
            .find(operation_id)
            .first::<Operation>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(operation) = operation else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        let statut_couleur =
            status::statut_operation(&mut conn, &operation, today).map_err(|e| e.to_string())?;

        let cout_prevue = operation.cout_prevue.clone().unwrap_or_else(zero);
        let cout_reel = operation.cout_reel.clone().unwrap_or_else(zero);
        let ecart_cout = &cout_reel - &cout_prevue;
        let pourcentage_ecart_cout = if cout_prevue > zero() {
            (&ecart_cout * BigDecimal::from(100) / &cout_prevue).round(2)
        } else {
            zero()
        };

        let retard_jours = match (operation.date_fin_prevue, operation.date_fin_reelle) {
            (Some(prevue), Some(reelle)) if reelle > prevue => (reelle - prevue).num_days(),
            (Some(prevue), None) if today > prevue => (today - prevue).num_days(),
            _ => 0,
        };

        let compte_problemes = |conn: &mut PgConnection, statut: &str| -> Result<i64, String> {
            problemes::table
                .filter(problemes::operation_id.eq(operation_id))
                .filter(problemes::statut.eq(statut))
                .count()
                .get_result(conn)
                .map_err(|e| e.to_string())
        };

        Ok(Some(json!({
            "id": operation.id,
            "nom": operation.nom,
            "progression": operation.progression,
            "statut_cout": statut_couleur.statut_cout,
            "statut_delai": statut_couleur.statut_delai,
            "statut_global": statut_couleur.statut_global,
            "cout_prevue": cout_prevue,
            "cout_reel": cout_reel,
            "ecart_cout": ecart_cout,
            "pourcentage_ecart_cout": pourcentage_ecart_cout,
            "date_debut_prevue": operation.date_debut_prevue,
            "date_fin_prevue": operation.date_fin_prevue,
            "date_debut_reelle": operation.date_debut_reelle,
            "date_fin_reelle": operation.date_fin_reelle,
            "retard_jours": retard_jours,
            "problemes_ouverts": compte_problemes(&mut conn, statut_probleme::OUVERT)?,
            "problemes_en_cours": compte_problemes(&mut conn, statut_probleme::EN_COURS)?,
            "problemes_resolus": compte_problemes(&mut conn, statut_probleme::RESOLU)?,
        })))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    data.map(Json).ok_or_else(|| not_found("Operation not found"))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard/general", get(dashboard_general))
        .route("/dashboard/projets/:id", get(dashboard_projet))
        .route("/dashboard/phases/:id", get(dashboard_phase))
        .route("/dashboard/operations/:id", get(dashboard_operation))
}

//! Field problems and their proposed solutions. Status transitions are
//! tracked in the modification history; a solution being put in place
//! pulls its open problem into EN_COURS.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::history::enregistrer_modification;
use crate::shared::models::schema::{problemes, solutions};
use crate::shared::models::{Probleme, Solution};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_error, not_found, ApiError};

pub mod statut_probleme {
    pub const OUVERT: &str = "OUVERT";
    pub const EN_COURS: &str = "EN_COURS";
    pub const RESOLU: &str = "RESOLU";
    pub const FERME: &str = "FERME";

    pub const TOUS: [&str; 4] = [OUVERT, EN_COURS, RESOLU, FERME];
    pub const NON_RESOLUS: [&str; 2] = [OUVERT, EN_COURS];
}

pub mod statut_solution {
    pub const PROPOSEE: &str = "PROPOSEE";
    pub const VALIDEE: &str = "VALIDEE";
    pub const REJETEE: &str = "REJETEE";
    pub const MISE_EN_OEUVRE: &str = "MISE_EN_OEUVRE";

    pub const TOUS: [&str; 4] = [PROPOSEE, VALIDEE, REJETEE, MISE_EN_OEUVRE];
}

pub mod gravite_probleme {
    pub const FAIBLE: &str = "FAIBLE";
    pub const MOYENNE: &str = "MOYENNE";
    pub const ELEVEE: &str = "ELEVEE";
    pub const CRITIQUE: &str = "CRITIQUE";

    pub const TOUTES: [&str; 4] = [FAIBLE, MOYENNE, ELEVEE, CRITIQUE];
}

#[derive(Debug, Deserialize)]
pub struct ProblemeFilters {
    pub projet_id: Option<Uuid>,
    pub statut: Option<String>,
    pub gravite: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProblemeRequest {
    pub projet_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub operation_id: Option<Uuid>,
    pub titre: String,
    pub description: Option<String>,
    pub gravite: String,
    pub signale_par: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ChangementStatutRequest {
    pub statut: String,
    pub utilisateur_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSolutionRequest {
    pub description: String,
    pub type_solution: Option<String>,
    pub cout_estime: Option<bigdecimal::BigDecimal>,
    pub delai_estime: Option<i32>,
    pub proposee_par: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ProblemeDetail {
    #[serde(flatten)]
    pub probleme: Probleme,
    pub solutions: Vec<Solution>,
}

/// Shared by the problem and solution transition handlers: the old status
/// is written to the audit trail together with the update.
fn track_probleme_status_change(
    conn: &mut PgConnection,
    probleme: &Probleme,
    nouveau_statut: &str,
    utilisateur_id: Option<Uuid>,
) -> QueryResult<Probleme> {
    enregistrer_modification(
        conn,
        "Probleme",
        probleme.id,
        "statut",
        Some(probleme.statut.clone()),
        Some(nouveau_statut.to_string()),
        utilisateur_id,
        Some(format!("Changement de statut du probleme '{}'", probleme.titre)),
    )?;

    let (date_resolution, resolu_par) = if nouveau_statut == statut_probleme::RESOLU {
        (Some(Utc::now()), utilisateur_id)
    } else {
        (probleme.date_resolution, probleme.resolu_par)
    };

    diesel::update(problemes::table.find(probleme.id))
        .set((
            problemes::statut.eq(nouveau_statut),
            problemes::date_resolution.eq(date_resolution),
            problemes::resolu_par.eq(resolu_par),
        ))
        .get_result(conn)
}

async fn list_problemes(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<ProblemeFilters>,
) -> Result<Json<Vec<Probleme>>, ApiError> {
    let pool = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<_, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let mut query = problemes::table.into_boxed();
        if let Some(projet_id) = filters.projet_id {
            query = query.filter(problemes::projet_id.eq(projet_id));
        }
        if let Some(ref statut) = filters.statut {
            query = query.filter(problemes::statut.eq(statut.clone()));
        }
        if let Some(ref gravite) = filters.gravite {
            query = query.filter(problemes::gravite.eq(gravite.clone()));
        }
        query
            .order(problemes::date_signalement.desc())
            .limit(filters.limit.unwrap_or(100))
            .load::<Probleme>(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(rows))
}

async fn create_probleme(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProblemeRequest>,
) -> Result<Json<Probleme>, ApiError> {
    if req.projet_id.is_none() && req.phase_id.is_none() && req.operation_id.is_none() {
        return Err(bad_request(
            "A problem must reference a projet, a phase or an operation",
        ));
    }
    if !gravite_probleme::TOUTES.contains(&req.gravite.as_str()) {
        return Err(bad_request("Unknown gravite"));
    }

    let probleme = Probleme {
        id: Uuid::new_v4(),
        projet_id: req.projet_id,
        phase_id: req.phase_id,
        operation_id: req.operation_id,
        titre: req.titre,
        description: req.description,
        gravite: req.gravite,
        statut: statut_probleme::OUVERT.to_string(),
        date_signalement: Utc::now(),
        signale_par: req.signale_par,
        date_resolution: None,
        resolu_par: None,
    };

    let pool = state.conn.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<Probleme, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::insert_into(problemes::table)
            .values(&probleme)
            .get_result(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(created))
}

async fn get_probleme(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProblemeDetail>, ApiError> {
    let pool = state.conn.clone();
    let detail = tokio::task::spawn_blocking(move || -> Result<Option<ProblemeDetail>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let probleme = problemes::table
            .find(id)
            .first::<Probleme>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(probleme) = probleme else {
            return Ok(None);
        };
        let solutions_rows = solutions::table
            .filter(solutions::probleme_id.eq(id))
            .order(solutions::date_proposition.asc())
            .load::<Solution>(&mut conn)
            .map_err(|e| e.to_string())?;
        Ok(Some(ProblemeDetail {
            probleme,
            solutions: solutions_rows,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    detail.map(Json).ok_or_else(|| not_found("Probleme not found"))
}

async fn changer_statut_probleme(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangementStatutRequest>,
) -> Result<Json<Probleme>, ApiError> {
    if !statut_probleme::TOUS.contains(&req.statut.as_str()) {
        return Err(bad_request("Unknown problem statut"));
    }

    let pool = state.conn.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<Option<Probleme>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let probleme = problemes::table
            .find(id)
            .first::<Probleme>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(probleme) = probleme else {
            return Ok(None);
        };
        if probleme.statut == req.statut {
            return Ok(Some(probleme));
        }

        conn.transaction::<Probleme, diesel::result::Error, _>(|conn| {
            track_probleme_status_change(conn, &probleme, &req.statut, req.utilisateur_id)
        })
        .map(Some)
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    updated.map(Json).ok_or_else(|| not_found("Probleme not found"))
}

async fn create_solution(
    State(state): State<Arc<AppState>>,
    Path(probleme_id): Path<Uuid>,
    Json(req): Json<CreateSolutionRequest>,
) -> Result<Json<Solution>, ApiError> {
    let pool = state.conn.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<Option<Solution>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let probleme_existe: bool = diesel::select(diesel::dsl::exists(
            problemes::table.filter(problemes::id.eq(probleme_id)),
        ))
        .get_result(&mut conn)
        .map_err(|e| e.to_string())?;
        if !probleme_existe {
            return Ok(None);
        }

        let solution = Solution {
            id: Uuid::new_v4(),
            probleme_id,
            description: req.description,
            type_solution: req.type_solution,
            cout_estime: req.cout_estime,
            delai_estime: req.delai_estime,
            proposee_par: req.proposee_par,
            date_proposition: Utc::now(),
            statut: statut_solution::PROPOSEE.to_string(),
            date_validation: None,
            validee_par: None,
        };
        diesel::insert_into(solutions::table)
            .values(&solution)
            .get_result(&mut conn)
            .map(Some)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    created.map(Json).ok_or_else(|| not_found("Probleme not found"))
}

/// Solution transition. MISE_EN_OEUVRE on a still-open problem drags the
/// problem into EN_COURS, both changes audited in one transaction.
async fn changer_statut_solution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangementStatutRequest>,
) -> Result<Json<Solution>, ApiError> {
    if !statut_solution::TOUS.contains(&req.statut.as_str()) {
        return Err(bad_request("Unknown solution statut"));
    }

    let pool = state.conn.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<Option<Solution>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let solution = solutions::table
            .find(id)
            .first::<Solution>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(solution) = solution else {
            return Ok(None);
        };
        if solution.statut == req.statut {
            return Ok(Some(solution));
        }

        conn.transaction::<Solution, diesel::result::Error, _>(|conn| {
            enregistrer_modification(
                conn,
                "Solution",
                solution.id,
                "statut",
                Some(solution.statut.clone()),
                Some(req.statut.clone()),
                req.utilisateur_id,
                Some("Changement de statut d'une solution".to_string()),
            )?;

            let (date_validation, validee_par) = if req.statut == statut_solution::VALIDEE {
                (Some(Utc::now()), req.utilisateur_id)
            } else {
                (solution.date_validation, solution.validee_par)
            };

            let mise_a_jour: Solution = diesel::update(solutions::table.find(id))
                .set((
                    solutions::statut.eq(req.statut.clone()),
                    solutions::date_validation.eq(date_validation),
                    solutions::validee_par.eq(validee_par),
                ))
                .get_result(conn)?;

            if req.statut == statut_solution::MISE_EN_OEUVRE {
                let probleme = problemes::table
                    .find(solution.probleme_id)
                    .first::<Probleme>(conn)
                    .optional()?;
                if let Some(probleme) = probleme {
                    if statut_probleme::NON_RESOLUS.contains(&probleme.statut.as_str())
                        && probleme.statut != statut_probleme::EN_COURS
                    {
                        track_probleme_status_change(
                            conn,
                            &probleme,
                            statut_probleme::EN_COURS,
                            req.utilisateur_id,
                        )?;
                    }
                }
            }

            Ok(mise_a_jour)
        })
        .map(Some)
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    updated.map(Json).ok_or_else(|| not_found("Solution not found"))
}

#[derive(Debug, Deserialize)]
pub struct StatistiquesQuery {
    pub projet_id: Option<Uuid>,
}

async fn statistiques_problemes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatistiquesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let stats = tokio::task::spawn_blocking(move || -> Result<serde_json::Value, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let rows: Vec<Probleme> = match query.projet_id {
            Some(projet_id) => problemes::table
                .filter(problemes::projet_id.eq(projet_id))
                .load(&mut conn)
                .map_err(|e| e.to_string())?,
            None => problemes::table.load(&mut conn).map_err(|e| e.to_string())?,
        };

        let mut par_statut = serde_json::Map::new();
        for statut in statut_probleme::TOUS {
            let count = rows.iter().filter(|p| p.statut == statut).count();
            par_statut.insert(statut.to_string(), count.into());
        }
        let mut par_gravite = serde_json::Map::new();
        for gravite in gravite_probleme::TOUTES {
            let count = rows.iter().filter(|p| p.gravite == gravite).count();
            par_gravite.insert(gravite.to_string(), count.into());
        }

        let total = rows.len();
        let resolus = rows
            .iter()
            .filter(|p| {
                p.statut == statut_probleme::RESOLU || p.statut == statut_probleme::FERME
            })
            .count();
        let taux_resolution = if total > 0 {
            (resolus as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(serde_json::json!({
            "total": total,
            "par_statut": par_statut,
            "par_gravite": par_gravite,
            "taux_resolution": taux_resolution,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(stats))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/problemes", get(list_problemes).post(create_probleme))
        .route("/problemes/statistiques", get(statistiques_problemes))
        .route("/problemes/:id", get(get_probleme))
        .route("/problemes/:id/statut", post(changer_statut_probleme))
        .route("/problemes/:id/solutions", post(create_solution))
        .route("/solutions/:id/statut", post(changer_statut_solution))
}

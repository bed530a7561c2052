pub mod detector;
pub mod notifier;
pub mod report;
pub mod scheduler;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::schema::alertes;
use crate::shared::models::{niveau_alerte, statut_alerte, Alerte};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_error, not_found, ApiError};

pub use scheduler::AlertScheduler;

#[derive(Debug, Deserialize)]
pub struct AlerteFilters {
    pub niveau: Option<String>,
    pub statut: Option<String>,
    pub type_alerte: Option<String>,
    pub projet: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAlerteRequest {
    pub projet_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub operation_id: Option<Uuid>,
    pub type_alerte: String,
    pub niveau: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LectureRequest {
    pub utilisateur_id: Option<Uuid>,
}

async fn list_alertes(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<AlerteFilters>,
) -> Result<Json<Vec<Alerte>>, ApiError> {
    let pool = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<_, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let mut query = alertes::table.into_boxed();
        if let Some(ref niveau) = filters.niveau {
            query = query.filter(alertes::niveau.eq(niveau.clone()));
        }
        if let Some(ref statut) = filters.statut {
            query = query.filter(alertes::statut.eq(statut.clone()));
        }
        if let Some(ref type_alerte) = filters.type_alerte {
            query = query.filter(alertes::type_alerte.eq(type_alerte.clone()));
        }
        if let Some(projet_id) = filters.projet {
            query = query.filter(alertes::projet_id.eq(projet_id));
        }

        query
            .order(alertes::date_alerte.desc())
            .limit(filters.limit.unwrap_or(100))
            .load::<Alerte>(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(rows))
}

async fn create_alerte(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAlerteRequest>,
) -> Result<Json<Alerte>, ApiError> {
    if req.projet_id.is_none() && req.phase_id.is_none() && req.operation_id.is_none() {
        return Err(bad_request(
            "An alert must reference a projet, a phase or an operation",
        ));
    }
    if ![
        niveau_alerte::INFO,
        niveau_alerte::WARNING,
        niveau_alerte::CRITIQUE,
    ]
    .contains(&req.niveau.as_str())
    {
        return Err(bad_request("niveau must be INFO, WARNING or CRITIQUE"));
    }

    let pool = state.conn.clone();
    let alerte = Alerte {
        id: Uuid::new_v4(),
        projet_id: req.projet_id,
        phase_id: req.phase_id,
        operation_id: req.operation_id,
        type_alerte: req.type_alerte,
        niveau: req.niveau,
        message: req.message,
        date_alerte: Utc::now(),
        statut: statut_alerte::NON_LU.to_string(),
        lue_par: None,
        date_lecture: None,
    };

    let created = tokio::task::spawn_blocking(move || -> Result<Alerte, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::insert_into(alertes::table)
            .values(&alerte)
            .get_result(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(created))
}

async fn get_alerte(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alerte>, ApiError> {
    let pool = state.conn.clone();
    let alerte = tokio::task::spawn_blocking(move || -> Result<Option<Alerte>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        alertes::table
            .find(id)
            .first::<Alerte>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    alerte.map(Json).ok_or_else(|| not_found("Alerte not found"))
}

async fn delete_alerte(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::delete(alertes::table.find(id))
            .execute(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if deleted == 0 {
        return Err(not_found("Alerte not found"));
    }
    Ok(Json(json!({"success": true})))
}

/// NON_LU -> LU, stamping who read it and when.
async fn marquer_alerte_lue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<LectureRequest>,
) -> Result<Json<Alerte>, ApiError> {
    let pool = state.conn.clone();
    let alerte = tokio::task::spawn_blocking(move || -> Result<Option<Alerte>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::update(alertes::table.find(id))
            .set((
                alertes::statut.eq(statut_alerte::LU),
                alertes::lue_par.eq(req.utilisateur_id),
                alertes::date_lecture.eq(Some(Utc::now())),
            ))
            .get_result::<Alerte>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    alerte.map(Json).ok_or_else(|| not_found("Alerte not found"))
}

/// Terminal transition. Read stamps are preserved when already set.
async fn marquer_alerte_traitee(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<LectureRequest>,
) -> Result<Json<Alerte>, ApiError> {
    let pool = state.conn.clone();
    let alerte = tokio::task::spawn_blocking(move || -> Result<Option<Alerte>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let existante = alertes::table
            .find(id)
            .first::<Alerte>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())?;
        let Some(existante) = existante else {
            return Ok(None);
        };

        let (lue_par, date_lecture) = if existante.lue_par.is_some() {
            (existante.lue_par, existante.date_lecture)
        } else {
            (req.utilisateur_id, Some(Utc::now()))
        };

        diesel::update(alertes::table.find(id))
            .set((
                alertes::statut.eq(statut_alerte::TRAITEE),
                alertes::lue_par.eq(lue_par),
                alertes::date_lecture.eq(date_lecture),
            ))
            .get_result::<Alerte>(&mut conn)
            .optional()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    alerte.map(Json).ok_or_else(|| not_found("Alerte not found"))
}

async fn marquer_toutes_lues(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LectureRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let count = tokio::task::spawn_blocking(move || -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        diesel::update(alertes::table.filter(alertes::statut.eq(statut_alerte::NON_LU)))
            .set((
                alertes::statut.eq(statut_alerte::LU),
                alertes::lue_par.eq(req.utilisateur_id),
                alertes::date_lecture.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(json!({
        "message": format!("{} alertes marquees comme lues", count),
        "count": count,
    })))
}

async fn statistiques_alertes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let stats = tokio::task::spawn_blocking(move || -> Result<serde_json::Value, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let run = |e: diesel::result::Error| e.to_string();

        let total: i64 = alertes::table.count().get_result(&mut conn).map_err(run)?;
        let non_lues: i64 = alertes::table
            .filter(alertes::statut.eq(statut_alerte::NON_LU))
            .count()
            .get_result(&mut conn)
            .map_err(run)?;
        let critiques: i64 = alertes::table
            .filter(alertes::niveau.eq(niveau_alerte::CRITIQUE))
            .count()
            .get_result(&mut conn)
            .map_err(run)?;
        let sept_jours = Utc::now() - Duration::days(7);
        let recentes: i64 = alertes::table
            .filter(alertes::date_alerte.ge(sept_jours))
            .count()
            .get_result(&mut conn)
            .map_err(run)?;

        let par_niveau: Vec<(String, i64)> = alertes::table
            .group_by(alertes::niveau)
            .select((alertes::niveau, diesel::dsl::count_star()))
            .order(alertes::niveau.asc())
            .load(&mut conn)
            .map_err(run)?;
        let par_statut: Vec<(String, i64)> = alertes::table
            .group_by(alertes::statut)
            .select((alertes::statut, diesel::dsl::count_star()))
            .order(alertes::statut.asc())
            .load(&mut conn)
            .map_err(run)?;
        let par_type: Vec<(String, i64)> = alertes::table
            .group_by(alertes::type_alerte)
            .select((alertes::type_alerte, diesel::dsl::count_star()))
            .order(alertes::type_alerte.asc())
            .load(&mut conn)
            .map_err(run)?;

        Ok(json!({
            "total_alertes": total,
            "alertes_non_lues": non_lues,
            "alertes_critiques": critiques,
            "alertes_recentes": recentes,
            "par_niveau": par_niveau.into_iter().map(|(niveau, count)| json!({"niveau": niveau, "count": count})).collect::<Vec<_>>(),
            "par_statut": par_statut.into_iter().map(|(statut, count)| json!({"statut": statut, "count": count})).collect::<Vec<_>>(),
            "par_type": par_type.into_iter().map(|(type_alerte, count)| json!({"type_alerte": type_alerte, "count": count})).collect::<Vec<_>>(),
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(stats))
}

/// Compact extract for the dashboard header: recent criticals and unread.
async fn alertes_tableau_bord(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let data = tokio::task::spawn_blocking(move || -> Result<serde_json::Value, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;

        let critiques: Vec<Alerte> = alertes::table
            .filter(alertes::niveau.eq(niveau_alerte::CRITIQUE))
            .filter(alertes::statut.eq_any(statut_alerte::NON_RESOLUS))
            .order(alertes::date_alerte.desc())
            .limit(5)
            .load(&mut conn)
            .map_err(|e| e.to_string())?;

        let non_lues: Vec<Alerte> = alertes::table
            .filter(alertes::statut.eq(statut_alerte::NON_LU))
            .order(alertes::date_alerte.desc())
            .limit(10)
            .load(&mut conn)
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "alertes_critiques": critiques,
            "total_non_lues": non_lues.len(),
            "alertes_non_lues": non_lues,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(data))
}

/// On-demand detection run, same engine the scheduler uses.
async fn detecter_alertes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.conn.clone();
    let mailer = state.mailer.clone();
    let config = state.config.alerts.clone();

    let creees = tokio::task::spawn_blocking(move || -> Result<Vec<Alerte>, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        Ok(detector::detecter_toutes_alertes(&mut conn, &mailer, &config))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(json!({
        "message": format!("{} nouvelles alertes detectees", creees.len()),
        "alertes": creees,
    })))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/alertes", get(list_alertes).post(create_alerte))
        .route("/alertes/statistiques", get(statistiques_alertes))
        .route("/alertes/tableau-bord", get(alertes_tableau_bord))
        .route("/alertes/detecter", post(detecter_alertes))
        .route("/alertes/toutes-lues", post(marquer_toutes_lues))
        .route("/alertes/:id", get(get_alerte).delete(delete_alerte))
        .route("/alertes/:id/lue", post(marquer_alerte_lue))
        .route("/alertes/:id/traitee", post(marquer_alerte_traitee))
}

//! Housekeeping over the alert table: periodic cleanup of processed
//! alerts and the aggregated report mailed out every week.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::info;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::shared::models::schema::{alertes, projets};
use crate::shared::models::{niveau_alerte, statut_alerte, Alerte};

/// Delete TRAITEE alerts older than the retention window. Returns how many
/// rows went away.
pub fn nettoyer_anciennes_alertes(conn: &mut PgConnection, jours: i64) -> QueryResult<usize> {
    let date_limite = Utc::now() - Duration::days(jours);
    let supprimees = diesel::delete(
        alertes::table
            .filter(alertes::statut.eq(statut_alerte::TRAITEE))
            .filter(alertes::date_alerte.lt(date_limite)),
    )
    .execute(conn)?;
    info!("Alert cleanup removed {} old alert(s)", supprimees);
    Ok(supprimees)
}

/// Aggregate alert statistics over a period: counts by niveau, type,
/// statut and project, plus the list of critical alerts.
pub fn generer_rapport_alertes(
    conn: &mut PgConnection,
    date_debut: DateTime<Utc>,
    date_fin: DateTime<Utc>,
) -> QueryResult<serde_json::Value> {
    let periode: Vec<Alerte> = alertes::table
        .filter(alertes::date_alerte.ge(date_debut))
        .filter(alertes::date_alerte.le(date_fin))
        .order(alertes::date_alerte.desc())
        .load(conn)?;

    let mut par_niveau: HashMap<&str, usize> = HashMap::new();
    for niveau in [
        niveau_alerte::INFO,
        niveau_alerte::WARNING,
        niveau_alerte::CRITIQUE,
    ] {
        par_niveau.insert(niveau, 0);
    }
    let mut par_type: HashMap<String, usize> = HashMap::new();
    let mut par_statut: HashMap<&str, usize> = HashMap::new();
    for statut in [
        statut_alerte::NON_LU,
        statut_alerte::LU,
        statut_alerte::TRAITEE,
    ] {
        par_statut.insert(statut, 0);
    }
    let mut par_projet: HashMap<Uuid, usize> = HashMap::new();

    for alerte in &periode {
        if let Some(count) = par_niveau.get_mut(alerte.niveau.as_str()) {
            *count += 1;
        }
        *par_type.entry(alerte.type_alerte.clone()).or_insert(0) += 1;
        if let Some(count) = par_statut.get_mut(alerte.statut.as_str()) {
            *count += 1;
        }
        if let Some(projet_id) = alerte.projet_id {
            *par_projet.entry(projet_id).or_insert(0) += 1;
        }
    }

    // Resolve project names for the per-project counts.
    let noms: Vec<(Uuid, String)> = projets::table
        .filter(projets::id.eq_any(par_projet.keys().copied().collect::<Vec<_>>()))
        .select((projets::id, projets::nom))
        .load(conn)?;
    let noms: HashMap<Uuid, String> = noms.into_iter().collect();
    let par_projet: HashMap<String, usize> = par_projet
        .into_iter()
        .map(|(id, count)| {
            let nom = noms.get(&id).cloned().unwrap_or_else(|| id.to_string());
            (nom, count)
        })
        .collect();

    let critiques: Vec<serde_json::Value> = periode
        .iter()
        .filter(|a| a.niveau == niveau_alerte::CRITIQUE)
        .map(|a| {
            json!({
                "type_alerte": a.type_alerte,
                "message": a.message,
                "date_alerte": a.date_alerte,
                "projet": a.projet_id.and_then(|id| noms.get(&id).cloned()),
            })
        })
        .collect();

    Ok(json!({
        "periode": { "debut": date_debut, "fin": date_fin },
        "statistiques": {
            "total": periode.len(),
            "par_niveau": par_niveau,
            "par_type": par_type,
            "par_statut": par_statut,
            "par_projet": par_projet,
        },
        "alertes_critiques": critiques,
    }))
}

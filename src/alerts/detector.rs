//! Threshold-breach detection over active projects and operations.
//!
//! Detection is best-effort: every check catches its own failures, logs
//! them, and lets the batch continue. An alert of a given (entity, type)
//! pair is only created while no unresolved alert of that pair exists, so
//! repeated runs do not pile up duplicates; a TRAITEE alert opens the door
//! again.

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use log::{error, info};
use uuid::Uuid;

use crate::alerts::notifier::{envoyer_notification_alerte, Mailer};
use crate::config::AlertConfig;
use crate::shared::models::schema::{alertes, operations, phases, projets};
use crate::shared::models::statut_entite::ACTIFS;
use crate::shared::models::{
    niveau_alerte, statut_alerte, type_alerte, Alerte, Operation, Phase, Projet,
};

/// Alert level for a budget consumption percentage that already crossed
/// the project's alert threshold.
pub(crate) fn niveau_depassement_budget(pourcentage: &BigDecimal) -> &'static str {
    if pourcentage >= &BigDecimal::from(100) {
        niveau_alerte::CRITIQUE
    } else {
        niveau_alerte::WARNING
    }
}

/// Level and breached colour for an operation cost measured against its
/// threshold triple; None while the cost stays under the yellow line.
pub(crate) fn niveau_depassement_seuil<'a>(
    cout_reel: &BigDecimal,
    seuil: &'a crate::shared::models::Seuil,
) -> Option<(&'static str, &'static str, &'a BigDecimal)> {
    if cout_reel >= &seuil.valeur_rouge {
        Some((niveau_alerte::CRITIQUE, "ROUGE", &seuil.valeur_rouge))
    } else if cout_reel >= &seuil.valeur_jaune {
        Some((niveau_alerte::WARNING, "JAUNE", &seuil.valeur_jaune))
    } else {
        None
    }
}

/// True while an unresolved (NON_LU/LU) alert of this type exists for the
/// given project.
pub fn alerte_projet_existe(
    conn: &mut PgConnection,
    projet_id: Uuid,
    type_alerte: &str,
) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        alertes::table
            .filter(alertes::projet_id.eq(projet_id))
            .filter(alertes::type_alerte.eq(type_alerte))
            .filter(alertes::statut.eq_any(statut_alerte::NON_RESOLUS)),
    ))
    .get_result(conn)
}

/// Same pre-check keyed on an operation.
pub fn alerte_operation_existe(
    conn: &mut PgConnection,
    operation_id: Uuid,
    type_alerte: &str,
) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        alertes::table
            .filter(alertes::operation_id.eq(operation_id))
            .filter(alertes::type_alerte.eq(type_alerte))
            .filter(alertes::statut.eq_any(statut_alerte::NON_RESOLUS)),
    ))
    .get_result(conn)
}

/// Insert an alert and dispatch its notification. Returns None on failure;
/// creation problems are logged, never propagated.
pub fn creer_alerte(
    conn: &mut PgConnection,
    mailer: &Mailer,
    projet_id: Option<Uuid>,
    phase_id: Option<Uuid>,
    operation_id: Option<Uuid>,
    type_alerte: &str,
    niveau: &str,
    message: String,
) -> Option<Alerte> {
    let alerte = Alerte {
        id: Uuid::new_v4(),
        projet_id,
        phase_id,
        operation_id,
        type_alerte: type_alerte.to_string(),
        niveau: niveau.to_string(),
        message,
        date_alerte: Utc::now(),
        statut: statut_alerte::NON_LU.to_string(),
        lue_par: None,
        date_lecture: None,
    };

    match diesel::insert_into(alertes::table)
        .values(&alerte)
        .get_result::<Alerte>(conn)
    {
        Ok(created) => {
            envoyer_notification_alerte(conn, mailer, &created);
            Some(created)
        }
        Err(e) => {
            error!("Failed to create {} alert: {}", type_alerte, e);
            None
        }
    }
}

/// Budget and deadline checks for one project.
pub fn verifier_seuils_projet(
    conn: &mut PgConnection,
    mailer: &Mailer,
    projet: &Projet,
    config: &AlertConfig,
) -> Vec<Alerte> {
    match verifier_seuils_projet_inner(conn, mailer, projet, config) {
        Ok(creees) => creees,
        Err(e) => {
            error!("Threshold check failed for project {}: {}", projet.id, e);
            Vec::new()
        }
    }
}

fn verifier_seuils_projet_inner(
    conn: &mut PgConnection,
    mailer: &Mailer,
    projet: &Projet,
    config: &AlertConfig,
) -> QueryResult<Vec<Alerte>> {
    let mut creees = Vec::new();
    let zero = BigDecimal::from(0);

    if let (Some(budget), Some(cout)) = (&projet.budget_initial, &projet.cout_actuel) {
        if budget > &zero {
            let pourcentage = cout * BigDecimal::from(100) / budget;
            if pourcentage >= projet.seuil_alerte_cout
                && !alerte_projet_existe(conn, projet.id, type_alerte::DEPASSEMENT_BUDGET)?
            {
                let niveau = niveau_depassement_budget(&pourcentage);
                let message = format!(
                    "Budget utilise a {}% ({} / {})",
                    pourcentage.round(1),
                    cout,
                    budget
                );
                creees.extend(creer_alerte(
                    conn,
                    mailer,
                    Some(projet.id),
                    None,
                    None,
                    type_alerte::DEPASSEMENT_BUDGET,
                    niveau,
                    message,
                ));
            }
        }
    }

    if let Some(fin_prevue) = projet.date_fin_prevue {
        if ACTIFS.contains(&projet.statut.as_str()) {
            let aujourd_hui = Utc::now().date_naive();
            let jours_restants = (fin_prevue - aujourd_hui).num_days();

            if jours_restants <= 0 {
                if !alerte_projet_existe(conn, projet.id, type_alerte::DEPASSEMENT_DELAI)? {
                    let message = format!("Projet en retard de {} jour(s)", -jours_restants);
                    creees.extend(creer_alerte(
                        conn,
                        mailer,
                        Some(projet.id),
                        None,
                        None,
                        type_alerte::DEPASSEMENT_DELAI,
                        niveau_alerte::CRITIQUE,
                        message,
                    ));
                }
            } else if jours_restants <= config.echeance_proche_jours
                && !alerte_projet_existe(conn, projet.id, type_alerte::ECHEANCE_PROCHE)?
            {
                let message = format!("Echeance dans {} jour(s)", jours_restants);
                creees.extend(creer_alerte(
                    conn,
                    mailer,
                    Some(projet.id),
                    None,
                    None,
                    type_alerte::ECHEANCE_PROCHE,
                    niveau_alerte::WARNING,
                    message,
                ));
            }
        }
    }

    Ok(creees)
}

/// Flag projects whose mean phase progression trails the elapsed-time
/// expectation by more than the configured margin.
pub fn verifier_progression_anormale(
    conn: &mut PgConnection,
    mailer: &Mailer,
    projet: &Projet,
    config: &AlertConfig,
) -> Vec<Alerte> {
    match verifier_progression_anormale_inner(conn, mailer, projet, config) {
        Ok(creees) => creees,
        Err(e) => {
            error!("Progress check failed for project {}: {}", projet.id, e);
            Vec::new()
        }
    }
}

fn verifier_progression_anormale_inner(
    conn: &mut PgConnection,
    mailer: &Mailer,
    projet: &Projet,
    config: &AlertConfig,
) -> QueryResult<Vec<Alerte>> {
    let mut creees = Vec::new();

    let (Some(debut), Some(fin_prevue)) = (projet.date_debut, projet.date_fin_prevue) else {
        return Ok(creees);
    };
    let duree_totale = (fin_prevue - debut).num_days();
    if duree_totale <= 0 {
        return Ok(creees);
    }

    let aujourd_hui = Utc::now().date_naive();
    let duree_ecoulee = (aujourd_hui - debut).num_days();
    let progression_attendue =
        BigDecimal::from(duree_ecoulee) * BigDecimal::from(100) / BigDecimal::from(duree_totale);

    let phases_projet: Vec<Phase> = phases::table
        .filter(phases::projet_id.eq(projet.id))
        .load(conn)?;
    if phases_projet.is_empty() {
        return Ok(creees);
    }

    let somme: BigDecimal = phases_projet.iter().map(|p| p.progression.clone()).sum();
    let progression_reelle = somme / BigDecimal::from(phases_projet.len() as i64);

    let marge = BigDecimal::from(config.progression_retard_pct);
    if progression_reelle < &progression_attendue - marge
        && !alerte_projet_existe(conn, projet.id, type_alerte::PROGRESSION_FAIBLE)?
    {
        let message = format!(
            "Progression faible: {}% (attendu: {}%)",
            progression_reelle.round(1),
            progression_attendue.round(1)
        );
        creees.extend(creer_alerte(
            conn,
            mailer,
            Some(projet.id),
            None,
            None,
            type_alerte::PROGRESSION_FAIBLE,
            niveau_alerte::WARNING,
            message,
        ));
    }

    Ok(creees)
}

/// Cost-threshold and overdue checks for one operation.
pub fn verifier_seuils_operation(
    conn: &mut PgConnection,
    mailer: &Mailer,
    operation: &Operation,
) -> Vec<Alerte> {
    match verifier_seuils_operation_inner(conn, mailer, operation) {
        Ok(creees) => creees,
        Err(e) => {
            error!(
                "Threshold check failed for operation {}: {}",
                operation.id, e
            );
            Vec::new()
        }
    }
}

fn verifier_seuils_operation_inner(
    conn: &mut PgConnection,
    mailer: &Mailer,
    operation: &Operation,
) -> QueryResult<Vec<Alerte>> {
    let mut creees = Vec::new();

    let phase: Option<Phase> = phases::table
        .find(operation.phase_id)
        .first(conn)
        .optional()?;
    let (phase_id, projet_id) = match &phase {
        Some(phase) => (Some(phase.id), Some(phase.projet_id)),
        None => (None, None),
    };

    let seuil = crate::projects::status::seuil_pour_operation(conn, operation.id)?;
    if let (Some(seuil), Some(cout_reel)) = (&seuil, &operation.cout_reel) {
        if let Some((niveau, couleur, limite)) = niveau_depassement_seuil(cout_reel, seuil) {
            if !alerte_operation_existe(conn, operation.id, type_alerte::DEPASSEMENT_SEUIL)? {
                let message = format!(
                    "Seuil {} depasse pour {}: {} (seuil: {})",
                    couleur, operation.nom, cout_reel, limite
                );
                creees.extend(creer_alerte(
                    conn,
                    mailer,
                    projet_id,
                    phase_id,
                    Some(operation.id),
                    type_alerte::DEPASSEMENT_SEUIL,
                    niveau,
                    message,
                ));
            }
        }
    }

    if let Some(fin_prevue) = operation.date_fin_prevue {
        if ACTIFS.contains(&operation.statut.as_str()) {
            let aujourd_hui = Utc::now().date_naive();
            let jours_restants = (fin_prevue - aujourd_hui).num_days();
            if jours_restants <= 0
                && !alerte_operation_existe(conn, operation.id, type_alerte::OPERATION_RETARD)?
            {
                let message = format!("Operation en retard de {} jour(s)", -jours_restants);
                creees.extend(creer_alerte(
                    conn,
                    mailer,
                    projet_id,
                    phase_id,
                    Some(operation.id),
                    type_alerte::OPERATION_RETARD,
                    niveau_alerte::CRITIQUE,
                    message,
                ));
            }
        }
    }

    Ok(creees)
}

/// Full detection sweep over every active project. Never fails: partial
/// results are returned and problems are logged per entity.
pub fn detecter_toutes_alertes(
    conn: &mut PgConnection,
    mailer: &Mailer,
    config: &AlertConfig,
) -> Vec<Alerte> {
    let mut creees = Vec::new();

    let projets_actifs: Vec<Projet> = match projets::table
        .filter(projets::statut.eq_any(ACTIFS))
        .load(conn)
    {
        Ok(projets_actifs) => projets_actifs,
        Err(e) => {
            error!("Failed to load active projects for detection: {}", e);
            return creees;
        }
    };

    for projet in &projets_actifs {
        creees.extend(verifier_seuils_projet(conn, mailer, projet, config));
        creees.extend(verifier_progression_anormale(conn, mailer, projet, config));

        let ops: Vec<Operation> = match operations::table
            .inner_join(phases::table)
            .filter(phases::projet_id.eq(projet.id))
            .filter(operations::statut.eq_any(ACTIFS))
            .select(operations::all_columns)
            .load(conn)
        {
            Ok(ops) => ops,
            Err(e) => {
                error!("Failed to load operations of project {}: {}", projet.id, e);
                continue;
            }
        };
        for operation in &ops {
            creees.extend(verifier_seuils_operation(conn, mailer, operation));
        }
    }

    info!("Automatic detection finished: {} alert(s) created", creees.len());
    creees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Seuil;

    fn seuil(verte: i64, jaune: i64, rouge: i64) -> Seuil {
        Seuil {
            id: Uuid::new_v4(),
            operation_id: Uuid::new_v4(),
            valeur_verte: BigDecimal::from(verte),
            valeur_jaune: BigDecimal::from(jaune),
            valeur_rouge: BigDecimal::from(rouge),
            date_definition: Utc::now(),
            defini_par: None,
            date_modification: None,
            modifie_par: None,
        }
    }

    #[test]
    fn budget_a_85_pourcent_est_warning() {
        assert_eq!(
            niveau_depassement_budget(&BigDecimal::from(85)),
            niveau_alerte::WARNING
        );
    }

    #[test]
    fn budget_a_105_pourcent_est_critique() {
        assert_eq!(
            niveau_depassement_budget(&BigDecimal::from(105)),
            niveau_alerte::CRITIQUE
        );
        assert_eq!(
            niveau_depassement_budget(&BigDecimal::from(100)),
            niveau_alerte::CRITIQUE
        );
    }

    #[test]
    fn cout_sous_le_jaune_ne_declenche_rien() {
        let s = seuil(10_000, 20_000, 30_000);
        assert!(niveau_depassement_seuil(&BigDecimal::from(15_000), &s).is_none());
        assert!(niveau_depassement_seuil(&BigDecimal::from(5_000), &s).is_none());
    }

    #[test]
    fn cout_au_jaune_est_warning() {
        let s = seuil(10_000, 20_000, 30_000);
        let (niveau, couleur, limite) =
            niveau_depassement_seuil(&BigDecimal::from(20_000), &s).unwrap();
        assert_eq!(niveau, niveau_alerte::WARNING);
        assert_eq!(couleur, "JAUNE");
        assert_eq!(limite, &BigDecimal::from(20_000));
    }

    #[test]
    fn cout_au_rouge_est_critique() {
        let s = seuil(10_000, 20_000, 30_000);
        let (niveau, couleur, limite) =
            niveau_depassement_seuil(&BigDecimal::from(31_000), &s).unwrap();
        assert_eq!(niveau, niveau_alerte::CRITIQUE);
        assert_eq!(couleur, "ROUGE");
        assert_eq!(limite, &BigDecimal::from(30_000));
    }
}

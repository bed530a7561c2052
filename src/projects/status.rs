//! VERT/JAUNE/ROUGE health evaluation.
//!
//! Operations are classified against their threshold triple on two axes
//! (cost and delay); phases and projects take the worst value found among
//! their children on each axis, never an average. One red operation turns
//! its phase and project red.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::shared::models::schema::{operations, phases, seuils};
use crate::shared::models::{statut_entite, Operation, Seuil};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Couleur {
    #[serde(rename = "VERT")]
    Vert,
    #[serde(rename = "JAUNE")]
    Jaune,
    #[serde(rename = "ROUGE")]
    Rouge,
}

impl Couleur {
    pub fn as_str(&self) -> &'static str {
        match self {
            Couleur::Vert => "VERT",
            Couleur::Jaune => "JAUNE",
            Couleur::Rouge => "ROUGE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatutCouleur {
    pub statut_cout: Couleur,
    pub statut_delai: Couleur,
    pub statut_global: Couleur,
}

impl StatutCouleur {
    pub fn tout_vert() -> Self {
        Self {
            statut_cout: Couleur::Vert,
            statut_delai: Couleur::Vert,
            statut_global: Couleur::Vert,
        }
    }

    fn pire(self, other: Self) -> Self {
        Self {
            statut_cout: self.statut_cout.max(other.statut_cout),
            statut_delai: self.statut_delai.max(other.statut_delai),
            statut_global: self.statut_global.max(other.statut_global),
        }
    }
}

fn classer(valeur: &BigDecimal, seuil: &Seuil) -> Couleur {
    if valeur <= &seuil.valeur_verte {
        Couleur::Vert
    } else if valeur <= &seuil.valeur_jaune {
        Couleur::Jaune
    } else {
        Couleur::Rouge
    }
}

/// Health of a single operation against its threshold triple. Without a
/// threshold the operation is VERT on every axis, whatever its numbers.
pub fn evaluer_statut_couleur_operation(
    operation: &Operation,
    seuil: Option<&Seuil>,
    today: NaiveDate,
) -> StatutCouleur {
    let Some(seuil) = seuil else {
        return StatutCouleur::tout_vert();
    };

    let zero = BigDecimal::from(0);
    let statut_cout = match (&operation.cout_prevue, &operation.cout_reel) {
        (Some(prevue), Some(reel)) if prevue > &zero => {
            let pourcentage = reel * BigDecimal::from(100) / prevue;
            classer(&pourcentage, seuil)
        }
        _ => Couleur::Vert,
    };

    let statut_delai = statut_delai_operation(operation, seuil, today);

    StatutCouleur {
        statut_cout,
        statut_delai,
        statut_global: statut_cout.max(statut_delai),
    }
}

fn statut_delai_operation(operation: &Operation, seuil: &Seuil, today: NaiveDate) -> Couleur {
    let duree_prevue = match (operation.date_debut_prevue, operation.date_fin_prevue) {
        (Some(debut), Some(fin)) if fin > debut => (fin - debut).num_days(),
        _ => return Couleur::Vert,
    };

    if let Some(fin_reelle) = operation.date_fin_reelle {
        // Completed: actual slip as a percentage of the planned duration.
        let retard_jours = operation
            .date_fin_prevue
            .map(|prevue| (fin_reelle - prevue).num_days().max(0))
            .unwrap_or(0);
        let pourcentage_retard =
            BigDecimal::from(retard_jours) * BigDecimal::from(100) / BigDecimal::from(duree_prevue);
        classer(&pourcentage_retard, seuil)
    } else if let Some(debut_reelle) = operation.date_debut_reelle {
        // In progress: percentage-point gap between elapsed time and work
        // done. Elapsed time runs from the actual start against the
        // planned duration.
        let ecoule = (today - debut_reelle).num_days().max(0);
        let temps_ecoule_pct =
            BigDecimal::from(ecoule) * BigDecimal::from(100) / BigDecimal::from(duree_prevue);
        let ecart = temps_ecoule_pct - &operation.progression;
        classer(&ecart, seuil)
    } else {
        Couleur::Vert
    }
}

/// Worst-case fold over a phase's operations, axis by axis.
pub fn evaluer_statut_couleur_phase(
    children: &[(Operation, Option<Seuil>)],
    today: NaiveDate,
) -> StatutCouleur {
    children
        .iter()
        .map(|(op, seuil)| evaluer_statut_couleur_operation(op, seuil.as_ref(), today))
        .fold(StatutCouleur::tout_vert(), StatutCouleur::pire)
}

/// Worst-case fold over every operation of every phase of a project.
pub fn evaluer_statut_couleur_projet(
    phases_children: &[Vec<(Operation, Option<Seuil>)>],
    today: NaiveDate,
) -> StatutCouleur {
    phases_children
        .iter()
        .map(|children| evaluer_statut_couleur_phase(children, today))
        .fold(StatutCouleur::tout_vert(), StatutCouleur::pire)
}

/// Earliest threshold defined for an operation; the schema allows several
/// but evaluation uses the first one.
pub fn seuil_pour_operation(
    conn: &mut PgConnection,
    operation_id: Uuid,
) -> QueryResult<Option<Seuil>> {
    seuils::table
        .filter(seuils::operation_id.eq(operation_id))
        .order(seuils::date_definition.asc())
        .first::<Seuil>(conn)
        .optional()
}

pub fn statut_operation(
    conn: &mut PgConnection,
    operation: &Operation,
    today: NaiveDate,
) -> QueryResult<StatutCouleur> {
    let seuil = seuil_pour_operation(conn, operation.id)?;
    Ok(evaluer_statut_couleur_operation(
        operation,
        seuil.as_ref(),
        today,
    ))
}

pub fn statut_phase(
    conn: &mut PgConnection,
    phase_id: Uuid,
    today: NaiveDate,
) -> QueryResult<StatutCouleur> {
    let children = charger_operations_avec_seuils(conn, phase_id)?;
    Ok(evaluer_statut_couleur_phase(&children, today))
}

pub fn statut_projet(
    conn: &mut PgConnection,
    projet_id: Uuid,
    today: NaiveDate,
) -> QueryResult<StatutCouleur> {
    let phase_ids: Vec<Uuid> = phases::table
        .filter(phases::projet_id.eq(projet_id))
        .select(phases::id)
        .load(conn)?;

    let mut phases_children = Vec::with_capacity(phase_ids.len());
    for phase_id in phase_ids {
        phases_children.push(charger_operations_avec_seuils(conn, phase_id)?);
    }
    Ok(evaluer_statut_couleur_projet(&phases_children, today))
}

fn charger_operations_avec_seuils(
    conn: &mut PgConnection,
    phase_id: Uuid,
) -> QueryResult<Vec<(Operation, Option<Seuil>)>> {
    let ops = operations::table
        .filter(operations::phase_id.eq(phase_id))
        .load::<Operation>(conn)?;

    let mut children = Vec::with_capacity(ops.len());
    for op in ops {
        let seuil = seuil_pour_operation(conn, op.id)?;
        children.push((op, seuil));
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

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

    fn operation() -> Operation {
        Operation {
            id: Uuid::new_v4(),
            phase_id: Uuid::new_v4(),
            nom: "Cimentation".to_string(),
            description: None,
            type_operation: None,
            date_debut_prevue: None,
            date_fin_prevue: None,
            date_debut_reelle: None,
            date_fin_reelle: None,
            cout_prevue: None,
            cout_reel: None,
            progression: BigDecimal::from(0),
            statut: statut_entite::EN_COURS.to_string(),
            responsable_id: None,
        }
    }

    #[test]
    fn sans_seuil_tout_vert() {
        let mut op = operation();
        op.cout_prevue = Some(BigDecimal::from(10_000));
        op.cout_reel = Some(BigDecimal::from(900_000));
        let statut = evaluer_statut_couleur_operation(&op, None, today());
        assert_eq!(statut, StatutCouleur::tout_vert());
    }

    #[test]
    fn statut_cout_par_paliers() {
        let s = seuil(60, 80, 100);
        let mut op = operation();
        op.cout_prevue = Some(BigDecimal::from(10_000));

        op.cout_reel = Some(BigDecimal::from(5_000)); // 50%
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_cout,
            Couleur::Vert
        );

        op.cout_reel = Some(BigDecimal::from(7_000)); // 70%
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_cout,
            Couleur::Jaune
        );

        op.cout_reel = Some(BigDecimal::from(9_000)); // 90%, above jaune
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_cout,
            Couleur::Rouge
        );
    }

    #[test]
    fn statut_cout_sans_cout_prevu_reste_vert() {
        let s = seuil(60, 80, 100);
        let mut op = operation();
        op.cout_reel = Some(BigDecimal::from(9_000));
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_cout,
            Couleur::Vert
        );
    }

    #[test]
    fn statut_delai_operation_terminee() {
        let s = seuil(10, 20, 30);
        let mut op = operation();
        let debut = today() - Duration::days(40);
        op.date_debut_prevue = Some(debut);
        op.date_fin_prevue = Some(debut + Duration::days(20));
        // 5 days late on a 20-day plan: 25%, above jaune.
        op.date_fin_reelle = Some(debut + Duration::days(25));
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_delai,
            Couleur::Rouge
        );

        // Finished on time.
        op.date_fin_reelle = Some(debut + Duration::days(18));
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_delai,
            Couleur::Vert
        );
    }

    #[test]
    fn statut_delai_operation_en_cours() {
        let s = seuil(10, 25, 40);
        let mut op = operation();
        let debut = today() - Duration::days(50);
        op.date_debut_prevue = Some(debut);
        op.date_fin_prevue = Some(debut + Duration::days(100));
        op.date_debut_reelle = Some(debut);
        // 50% of the time gone, 20% done: 30-point gap, above jaune.
        op.progression = BigDecimal::from(20);
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_delai,
            Couleur::Rouge
        );

        // Ahead of schedule: negative gap stays green.
        op.progression = BigDecimal::from(80);
        assert_eq!(
            evaluer_statut_couleur_operation(&op, Some(&s), today()).statut_delai,
            Couleur::Vert
        );
    }

    #[test]
    fn statut_global_prend_le_pire_axe() {
        let s = seuil(10, 20, 30);
        let mut op = operation();
        op.cout_prevue = Some(BigDecimal::from(10_000));
        op.cout_reel = Some(BigDecimal::from(500)); // 5%: VERT
        let debut = today() - Duration::days(40);
        op.date_debut_prevue = Some(debut);
        op.date_fin_prevue = Some(debut + Duration::days(20));
        op.date_fin_reelle = Some(debut + Duration::days(25)); // 25%: ROUGE
        let statut = evaluer_statut_couleur_operation(&op, Some(&s), today());
        assert_eq!(statut.statut_cout, Couleur::Vert);
        assert_eq!(statut.statut_delai, Couleur::Rouge);
        assert_eq!(statut.statut_global, Couleur::Rouge);
    }

    #[test]
    fn phase_rouge_ssi_un_enfant_rouge() {
        let s = seuil(60, 80, 100);
        let mut verte = operation();
        verte.cout_prevue = Some(BigDecimal::from(10_000));
        verte.cout_reel = Some(BigDecimal::from(1_000));
        let mut jaune = operation();
        jaune.cout_prevue = Some(BigDecimal::from(10_000));
        jaune.cout_reel = Some(BigDecimal::from(7_000));

        let children = vec![
            (verte.clone(), Some(s.clone())),
            (jaune.clone(), Some(s.clone())),
        ];
        assert_eq!(
            evaluer_statut_couleur_phase(&children, today()).statut_global,
            Couleur::Jaune
        );

        let mut rouge = operation();
        rouge.cout_prevue = Some(BigDecimal::from(10_000));
        rouge.cout_reel = Some(BigDecimal::from(9_500));
        let children = vec![
            (verte, Some(s.clone())),
            (jaune, Some(s.clone())),
            (rouge, Some(s)),
        ];
        assert_eq!(
            evaluer_statut_couleur_phase(&children, today()).statut_global,
            Couleur::Rouge
        );
    }

    #[test]
    fn phase_vide_tout_vert() {
        assert_eq!(
            evaluer_statut_couleur_phase(&[], today()),
            StatutCouleur::tout_vert()
        );
    }

    #[test]
    fn projet_herite_du_pire_des_phases() {
        let s = seuil(60, 80, 100);
        let mut verte = operation();
        verte.cout_prevue = Some(BigDecimal::from(10_000));
        verte.cout_reel = Some(BigDecimal::from(1_000));
        let mut rouge = operation();
        rouge.cout_prevue = Some(BigDecimal::from(10_000));
        rouge.cout_reel = Some(BigDecimal::from(9_500));

        let phases_children = vec![
            vec![(verte, Some(s.clone()))],
            vec![(rouge, Some(s))],
        ];
        assert_eq!(
            evaluer_statut_couleur_projet(&phases_children, today()).statut_global,
            Couleur::Rouge
        );
    }
}

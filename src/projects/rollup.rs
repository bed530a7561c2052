//! Bottom-up rollup of derived fields: operation costs into phase costs
//! into project costs, and operation progression into phase progression.
//!
//! Mutating raw fields and recomputing derived fields are separate,
//! explicit steps. Handlers call these functions after every operation or
//! phase mutation, always operation -> phase -> project.

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::models::schema::{operations, phases, projets};
use crate::shared::models::{Operation, Phase};

/// Recompute a phase's cout_actuel from its operations and cascade into the
/// parent project. Returns false when the phase no longer exists; that is a
/// recoverable no-op, not an error.
pub fn update_phase_costs(conn: &mut PgConnection, phase_id: Uuid) -> QueryResult<bool> {
    let phase = phases::table
        .find(phase_id)
        .first::<Phase>(conn)
        .optional()?;
    let Some(phase) = phase else {
        return Ok(false);
    };

    let total: Option<BigDecimal> = operations::table
        .filter(operations::phase_id.eq(phase_id))
        .select(diesel::dsl::sum(operations::cout_reel))
        .first(conn)?;
    let total = total.unwrap_or_else(|| BigDecimal::from(0)).with_scale(2);

    diesel::update(phases::table.find(phase_id))
        .set(phases::cout_actuel.eq(Some(total)))
        .execute(conn)?;

    update_project_costs(conn, phase.projet_id)?;
    Ok(true)
}

/// Recompute a project's cout_actuel from its phases. Returns false when
/// the project no longer exists.
pub fn update_project_costs(conn: &mut PgConnection, projet_id: Uuid) -> QueryResult<bool> {
    let total: Option<BigDecimal> = phases::table
        .filter(phases::projet_id.eq(projet_id))
        .select(diesel::dsl::sum(phases::cout_actuel))
        .first(conn)?;
    let total = total.unwrap_or_else(|| BigDecimal::from(0)).with_scale(2);

    let updated = diesel::update(projets::table.find(projet_id))
        .set(projets::cout_actuel.eq(Some(total)))
        .execute(conn)?;
    Ok(updated > 0)
}

/// Phase progression: budget-weighted mean when every operation carries a
/// usable cout_prevue, plain mean otherwise. 0 with no operations.
pub fn calculate_phase_progress(conn: &mut PgConnection, phase_id: Uuid) -> QueryResult<BigDecimal> {
    let ops = operations::table
        .filter(operations::phase_id.eq(phase_id))
        .load::<Operation>(conn)?;
    Ok(phase_progress_from_operations(&ops))
}

/// Project progression: same dual strategy over phases, weighted by
/// budget_alloue. Computed on read; only phase progression is persisted.
pub fn calculate_project_progress(
    conn: &mut PgConnection,
    projet_id: Uuid,
) -> QueryResult<BigDecimal> {
    let phase_rows = phases::table
        .filter(phases::projet_id.eq(projet_id))
        .load::<Phase>(conn)?;
    Ok(project_progress_from_phases(&phase_rows))
}

/// Persist a freshly computed progression on the phase. Returns false when
/// the phase no longer exists.
pub fn update_phase_progress(conn: &mut PgConnection, phase_id: Uuid) -> QueryResult<bool> {
    let progression = calculate_phase_progress(conn, phase_id)?;
    let updated = diesel::update(phases::table.find(phase_id))
        .set(phases::progression.eq(progression))
        .execute(conn)?;
    Ok(updated > 0)
}

/// Refresh every derived field below a project: per-phase costs and
/// progression, then the project cost. Returns false when the project does
/// not exist.
pub fn refresh_project_rollups(conn: &mut PgConnection, projet_id: Uuid) -> QueryResult<bool> {
    let exists: bool = diesel::select(diesel::dsl::exists(
        projets::table.filter(projets::id.eq(projet_id)),
    ))
    .get_result(conn)?;
    if !exists {
        return Ok(false);
    }

    let phase_ids: Vec<Uuid> = phases::table
        .filter(phases::projet_id.eq(projet_id))
        .select(phases::id)
        .load(conn)?;

    for phase_id in phase_ids {
        let total: Option<BigDecimal> = operations::table
            .filter(operations::phase_id.eq(phase_id))
            .select(diesel::dsl::sum(operations::cout_reel))
            .first(conn)?;
        let total = total.unwrap_or_else(|| BigDecimal::from(0)).with_scale(2);
        let progression = calculate_phase_progress(conn, phase_id)?;
        diesel::update(phases::table.find(phase_id))
            .set((
                phases::cout_actuel.eq(Some(total)),
                phases::progression.eq(progression),
            ))
            .execute(conn)?;
    }

    update_project_costs(conn, projet_id)?;
    Ok(true)
}

pub(crate) fn phase_progress_from_operations(ops: &[Operation]) -> BigDecimal {
    if ops.is_empty() {
        return BigDecimal::from(0);
    }
    let zero = BigDecimal::from(0);
    let weighted = ops
        .iter()
        .all(|op| op.cout_prevue.as_ref().map_or(false, |c| c > &zero));

    let progress = if weighted {
        let total: BigDecimal = ops.iter().filter_map(|op| op.cout_prevue.clone()).sum();
        let sum: BigDecimal = ops
            .iter()
            .filter_map(|op| op.cout_prevue.as_ref().map(|c| c * &op.progression))
            .sum();
        sum / total
    } else {
        let sum: BigDecimal = ops.iter().map(|op| op.progression.clone()).sum();
        sum / BigDecimal::from(ops.len() as i64)
    };
    progress.round(2)
}

pub(crate) fn project_progress_from_phases(phase_rows: &[Phase]) -> BigDecimal {
    if phase_rows.is_empty() {
        return BigDecimal::from(0);
    }
    let zero = BigDecimal::from(0);
    let weighted = phase_rows
        .iter()
        .all(|p| p.budget_alloue.as_ref().map_or(false, |b| b > &zero));

    let progress = if weighted {
        let total: BigDecimal = phase_rows
            .iter()
            .filter_map(|p| p.budget_alloue.clone())
            .sum();
        let sum: BigDecimal = phase_rows
            .iter()
            .filter_map(|p| p.budget_alloue.as_ref().map(|b| b * &p.progression))
            .sum();
        sum / total
    } else {
        let sum: BigDecimal = phase_rows.iter().map(|p| p.progression.clone()).sum();
        sum / BigDecimal::from(phase_rows.len() as i64)
    };
    progress.round(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::statut_entite;

    fn op(progression: i64, cout_prevue: Option<i64>) -> Operation {
        Operation {
            id: uuid::Uuid::new_v4(),
            phase_id: uuid::Uuid::new_v4(),
            nom: "Forage".to_string(),
            description: None,
            type_operation: None,
            date_debut_prevue: None,
            date_fin_prevue: None,
            date_debut_reelle: None,
            date_fin_reelle: None,
            cout_prevue: cout_prevue.map(BigDecimal::from),
            cout_reel: None,
            progression: BigDecimal::from(progression),
            statut: statut_entite::EN_COURS.to_string(),
            responsable_id: None,
        }
    }

    fn phase(progression: i64, budget_alloue: Option<i64>) -> Phase {
        Phase {
            id: uuid::Uuid::new_v4(),
            projet_id: uuid::Uuid::new_v4(),
            nom: "Exploration".to_string(),
            description: None,
            ordre: 1,
            date_debut_prevue: None,
            date_fin_prevue: None,
            date_debut_reelle: None,
            date_fin_reelle: None,
            budget_alloue: budget_alloue.map(BigDecimal::from),
            cout_actuel: None,
            progression: BigDecimal::from(progression),
            statut: statut_entite::EN_COURS.to_string(),
        }
    }

    #[test]
    fn phase_progress_empty_is_zero() {
        assert_eq!(phase_progress_from_operations(&[]), BigDecimal::from(0));
    }

    #[test]
    fn phase_progress_budget_weighted() {
        // (50 x 20000 + 25 x 30000) / 50000 = 35.00
        let ops = vec![op(50, Some(20_000)), op(25, Some(30_000))];
        assert_eq!(phase_progress_from_operations(&ops), BigDecimal::from(35));
    }

    #[test]
    fn phase_progress_falls_back_to_mean_on_missing_weight() {
        let ops = vec![op(50, Some(20_000)), op(30, None)];
        assert_eq!(phase_progress_from_operations(&ops), BigDecimal::from(40));
    }

    #[test]
    fn phase_progress_falls_back_to_mean_on_zero_weight() {
        let ops = vec![op(50, Some(0)), op(30, Some(10_000))];
        assert_eq!(phase_progress_from_operations(&ops), BigDecimal::from(40));
    }

    #[test]
    fn phase_progress_rounds_to_two_decimals() {
        let ops = vec![op(50, None), op(25, None), op(25, None)];
        let expected: BigDecimal = "33.33".parse().unwrap();
        assert_eq!(phase_progress_from_operations(&ops), expected);
    }

    #[test]
    fn project_progress_budget_weighted() {
        // (40 x 80000 + 20 x 120000) / 200000 = 28.00
        let rows = vec![phase(40, Some(80_000)), phase(20, Some(120_000))];
        assert_eq!(project_progress_from_phases(&rows), BigDecimal::from(28));
    }

    #[test]
    fn project_progress_simple_mean_without_budgets() {
        let rows = vec![phase(40, None), phase(20, Some(120_000))];
        assert_eq!(project_progress_from_phases(&rows), BigDecimal::from(30));
    }

    #[test]
    fn progress_stays_in_bounds() {
        let ops = vec![op(100, Some(1)), op(100, Some(1_000_000))];
        assert_eq!(phase_progress_from_operations(&ops), BigDecimal::from(100));
        let ops = vec![op(0, None), op(0, None)];
        assert_eq!(phase_progress_from_operations(&ops), BigDecimal::from(0));
    }
}

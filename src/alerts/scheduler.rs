//! Periodic alerting tasks: detection, daily summary, cleanup, weekly
//! report. Cadence comes from AlertConfig cron expressions; the loop wakes
//! every minute, runs whatever became due, and logs failures without
//! retrying before the next occurrence.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use log::{error, info, warn};
use std::str::FromStr;
use std::sync::Arc;

use crate::alerts::detector::detecter_toutes_alertes;
use crate::alerts::notifier::envoyer_resume_quotidien;
use crate::alerts::report::{generer_rapport_alertes, nettoyer_anciennes_alertes};
use crate::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Detection,
    ResumeQuotidien,
    Nettoyage,
    RapportHebdomadaire,
}

struct PlannedTask {
    name: &'static str,
    kind: TaskKind,
    schedule: Schedule,
    next_run: DateTime<Utc>,
}

pub struct AlertScheduler {
    state: Arc<AppState>,
}

impl AlertScheduler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn planned_tasks(&self) -> Vec<PlannedTask> {
        let alerts = &self.state.config.alerts;
        let definitions = [
            ("alert_detection", TaskKind::Detection, &alerts.detection_cron),
            (
                "daily_summary",
                TaskKind::ResumeQuotidien,
                &alerts.resume_quotidien_cron,
            ),
            ("alert_cleanup", TaskKind::Nettoyage, &alerts.nettoyage_cron),
            (
                "weekly_report",
                TaskKind::RapportHebdomadaire,
                &alerts.rapport_cron,
            ),
        ];

        let now = Utc::now();
        let mut tasks = Vec::new();
        for (name, kind, expression) in definitions {
            match Schedule::from_str(expression) {
                Ok(schedule) => {
                    let Some(next_run) = schedule.after(&now).next() else {
                        warn!("Cron expression for {} never fires: {}", name, expression);
                        continue;
                    };
                    tasks.push(PlannedTask {
                        name,
                        kind,
                        schedule,
                        next_run,
                    });
                }
                Err(e) => warn!("Invalid cron expression for {} ({}): {}", name, expression, e),
            }
        }
        tasks
    }

    /// Spawn the scheduling loop on the runtime.
    pub fn start(&self) {
        let state = self.state.clone();
        let mut tasks = self.planned_tasks();
        info!("Alert scheduler started with {} task(s)", tasks.len());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let now = Utc::now();

                for task in tasks.iter_mut() {
                    if task.next_run > now {
                        continue;
                    }
                    info!("Running scheduled task: {}", task.name);
                    run_task(state.clone(), task.kind).await;
                    task.next_run = task
                        .schedule
                        .after(&now)
                        .next()
                        .unwrap_or_else(|| now + Duration::hours(1));
                }
            }
        });
    }
}

async fn run_task(state: Arc<AppState>, kind: TaskKind) {
    let result = tokio::task::spawn_blocking(move || -> Result<String, String> {
        let mut conn = state.conn.get().map_err(|e| e.to_string())?;
        match kind {
            TaskKind::Detection => {
                let creees =
                    detecter_toutes_alertes(&mut conn, &state.mailer, &state.config.alerts);
                Ok(format!("detection finished: {} alert(s) created", creees.len()))
            }
            TaskKind::ResumeQuotidien => {
                let destinataires =
                    envoyer_resume_quotidien(&mut conn, &state.mailer).map_err(|e| e.to_string())?;
                Ok(format!("daily summary sent to {} recipient(s)", destinataires))
            }
            TaskKind::Nettoyage => {
                let supprimees =
                    nettoyer_anciennes_alertes(&mut conn, state.config.alerts.retention_jours)
                        .map_err(|e| e.to_string())?;
                Ok(format!("cleanup removed {} alert(s)", supprimees))
            }
            TaskKind::RapportHebdomadaire => {
                let fin = Utc::now();
                let debut = fin - Duration::days(7);
                let rapport =
                    generer_rapport_alertes(&mut conn, debut, fin).map_err(|e| e.to_string())?;
                let total = rapport["statistiques"]["total"].as_u64().unwrap_or(0);
                info!("Weekly alert report: {}", rapport);
                Ok(format!("weekly report generated ({} alert(s))", total))
            }
        }
    })
    .await;

    match result {
        Ok(Ok(outcome)) => info!("Scheduled task completed: {}", outcome),
        Ok(Err(e)) => error!("Scheduled task failed: {}", e),
        Err(e) => error!("Scheduled task panicked: {}", e),
    }
}

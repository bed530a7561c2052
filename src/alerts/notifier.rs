//! Email dispatch for alerts. Every send is fail-silent: a broken SMTP
//! relay degrades monitoring to log lines, it never breaks detection.

use chrono::Utc;
use diesel::prelude::*;
use lettre::message::Mailbox;
use lettre::{transport::smtp::authentication::Credentials, Message, SmtpTransport, Transport};
use log::{error, info, warn};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::EmailConfig;
use crate::shared::models::schema::{
    alertes, equipes_projet, operations, phases, projets, utilisateurs,
};
use crate::shared::models::{
    niveau_alerte, role_projet, role_utilisateur, statut_alerte, statut_utilisateur, Alerte, Operation, Phase, Projet,
};

pub struct Mailer {
    transport: Option<SmtpTransport>,
    from: String,
}

impl Mailer {
    pub fn from_config(config: &EmailConfig) -> Self {
        if config.smtp_host.is_empty() {
            info!("SMTP not configured, alert notifications will only be logged");
            return Self {
                transport: None,
                from: config.from_address.clone(),
            };
        }

        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        match SmtpTransport::relay(&config.smtp_host) {
            Ok(builder) => Self {
                transport: Some(
                    builder
                        .port(config.smtp_port)
                        .credentials(credentials)
                        .build(),
                ),
                from: config.from_address.clone(),
            },
            Err(e) => {
                warn!("Invalid SMTP relay {}: {}", config.smtp_host, e);
                Self {
                    transport: None,
                    from: config.from_address.clone(),
                }
            }
        }
    }

    /// Send one mail to a recipient list, logging failures instead of
    /// propagating them.
    pub fn send(&self, destinataires: &[String], sujet: &str, corps: &str) {
        if destinataires.is_empty() {
            return;
        }
        let Some(transport) = &self.transport else {
            info!(
                "Notification (SMTP disabled) to {:?}: {}",
                destinataires, sujet
            );
            return;
        };

        let from: Mailbox = match self.from.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                error!("Invalid sender address {}: {}", self.from, e);
                return;
            }
        };

        let mut builder = Message::builder().from(from).subject(sujet);
        let mut any_recipient = false;
        for adresse in destinataires {
            match adresse.parse::<Mailbox>() {
                Ok(mailbox) => {
                    builder = builder.to(mailbox);
                    any_recipient = true;
                }
                Err(e) => warn!("Skipping invalid recipient {}: {}", adresse, e),
            }
        }
        if !any_recipient {
            return;
        }

        match builder.body(corps.to_string()) {
            Ok(message) => {
                if let Err(e) = transport.send(&message) {
                    error!("Failed to send notification '{}': {}", sujet, e);
                }
            }
            Err(e) => error!("Failed to build notification '{}': {}", sujet, e),
        }
    }
}

/// Recipients for one alert: project responsable, team members holding a
/// notified project role, operation responsable, plus every active expert
/// when the alert is critical.
fn destinataires_pour_alerte(conn: &mut PgConnection, alerte: &Alerte) -> QueryResult<Vec<String>> {
    let mut destinataires: BTreeSet<String> = BTreeSet::new();

    if let Some(projet_id) = alerte.projet_id {
        let responsable_id: Option<Option<Uuid>> = projets::table
            .find(projet_id)
            .select(projets::responsable_id)
            .first(conn)
            .optional()?;
        if let Some(Some(responsable_id)) = responsable_id {
            if let Some(email) = email_utilisateur(conn, responsable_id)? {
                destinataires.insert(email);
            }
        }

        let equipe: Vec<String> = equipes_projet::table
            .inner_join(utilisateurs::table)
            .filter(equipes_projet::projet_id.eq(projet_id))
            .filter(equipes_projet::role_projet.eq_any(role_projet::NOTIFIES))
            .select(utilisateurs::email)
            .load(conn)?;
        destinataires.extend(equipe);
    }

    if let Some(operation_id) = alerte.operation_id {
        let responsable_id: Option<Option<Uuid>> = operations::table
            .find(operation_id)
            .select(operations::responsable_id)
            .first(conn)
            .optional()?;
        if let Some(Some(responsable_id)) = responsable_id {
            if let Some(email) = email_utilisateur(conn, responsable_id)? {
                destinataires.insert(email);
            }
        }
    }

    if alerte.niveau == niveau_alerte::CRITIQUE {
        let experts: Vec<String> = utilisateurs::table
            .filter(utilisateurs::role.eq(role_utilisateur::EXPERT))
            .filter(utilisateurs::statut.eq(statut_utilisateur::ACTIF))
            .select(utilisateurs::email)
            .load(conn)?;
        destinataires.extend(experts);
    }

    Ok(destinataires
        .into_iter()
        .filter(|email| !email.is_empty())
        .collect())
}

fn email_utilisateur(conn: &mut PgConnection, id: Uuid) -> QueryResult<Option<String>> {
    utilisateurs::table
        .find(id)
        .select(utilisateurs::email)
        .first(conn)
        .optional()
}

/// Notify the relevant people about a freshly created alert.
pub fn envoyer_notification_alerte(conn: &mut PgConnection, mailer: &Mailer, alerte: &Alerte) {
    let destinataires = match destinataires_pour_alerte(conn, alerte) {
        Ok(destinataires) => destinataires,
        Err(e) => {
            error!(
                "Failed to resolve recipients for alert {}: {}",
                alerte.id, e
            );
            return;
        }
    };
    if destinataires.is_empty() {
        return;
    }

    let mut contexte = Vec::new();
    if let Some(projet_id) = alerte.projet_id {
        if let Ok(Some(projet)) = projets::table
            .find(projet_id)
            .first::<Projet>(conn)
            .optional()
        {
            contexte.push(format!("Projet: {}", projet.nom));
        }
    }
    if let Some(phase_id) = alerte.phase_id {
        if let Ok(Some(phase)) = phases::table.find(phase_id).first::<Phase>(conn).optional() {
            contexte.push(format!("Phase: {}", phase.nom));
        }
    }
    if let Some(operation_id) = alerte.operation_id {
        if let Ok(Some(operation)) = operations::table
            .find(operation_id)
            .first::<Operation>(conn)
            .optional()
        {
            contexte.push(format!("Operation: {}", operation.nom));
        }
    }

    let sujet = format!("Alerte {}: {}", alerte.niveau, alerte.type_alerte);
    let corps = format!(
        "Une nouvelle alerte a ete detectee par le systeme de monitoring.\n\n\
         Type: {}\n\
         Niveau: {}\n\
         Message: {}\n\
         Date: {}\n\n\
         {}\n\n\
         Connectez-vous au systeme de monitoring pour traiter cette alerte.\n",
        alerte.type_alerte,
        alerte.niveau,
        alerte.message,
        alerte.date_alerte.format("%d/%m/%Y %H:%M"),
        if contexte.is_empty() {
            "Aucun contexte specifique".to_string()
        } else {
            contexte.join("\n")
        }
    );

    mailer.send(&destinataires, &sujet, &corps);
    info!(
        "Notification sent for alert {} to {} recipient(s)",
        alerte.id,
        destinataires.len()
    );
}

/// Daily digest mailed to active experts and management. Returns the
/// number of recipients, 0 when there was nothing to report.
pub fn envoyer_resume_quotidien(conn: &mut PgConnection, mailer: &Mailer) -> QueryResult<usize> {
    let aujourd_hui = Utc::now().date_naive();
    let debut_jour = aujourd_hui
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now);

    let alertes_jour: Vec<Alerte> = alertes::table
        .filter(alertes::date_alerte.ge(debut_jour))
        .order(alertes::date_alerte.desc())
        .load(conn)?;

    let non_traitees: i64 = alertes::table
        .filter(alertes::statut.eq_any(statut_alerte::NON_RESOLUS))
        .count()
        .get_result(conn)?;

    let critiques: i64 = alertes::table
        .filter(alertes::niveau.eq(niveau_alerte::CRITIQUE))
        .filter(alertes::statut.eq_any(statut_alerte::NON_RESOLUS))
        .count()
        .get_result(conn)?;

    if alertes_jour.is_empty() && non_traitees == 0 {
        info!("No alerts to report today");
        return Ok(0);
    }

    let mut corps = format!(
        "RESUME QUOTIDIEN DES ALERTES - {}\n\n\
         Nouvelles alertes aujourd'hui: {}\n\
         Alertes non traitees: {}\n\
         Alertes critiques non traitees: {}\n",
        aujourd_hui.format("%d/%m/%Y"),
        alertes_jour.len(),
        non_traitees,
        critiques
    );
    if !alertes_jour.is_empty() {
        corps.push_str("\nNOUVELLES ALERTES AUJOURD'HUI:\n");
        for alerte in &alertes_jour {
            corps.push_str(&format!(
                "- [{}] {} : {}\n",
                alerte.niveau, alerte.type_alerte, alerte.message
            ));
        }
    }
    if critiques > 0 {
        corps.push_str(&format!(
            "\nATTENTION: {} alertes critiques necessitent une intervention immediate.\n",
            critiques
        ));
    }

    let destinataires: Vec<String> = utilisateurs::table
        .filter(
            utilisateurs::role
                .eq_any([role_utilisateur::EXPERT, role_utilisateur::TOP_MANAGEMENT]),
        )
        .filter(utilisateurs::statut.eq(statut_utilisateur::ACTIF))
        .select(utilisateurs::email)
        .load(conn)?;

    if destinataires.is_empty() {
        warn!("No recipients found for the daily alert summary");
        return Ok(0);
    }

    let sujet = format!(
        "Resume quotidien des alertes - {}",
        aujourd_hui.format("%d/%m/%Y")
    );
    mailer.send(&destinataires, &sujet, &corps);
    info!("Daily summary sent to {} recipient(s)", destinataires.len());
    Ok(destinataires.len())
}

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Entity statuses are stored as upper-snake strings, matching the
// historical schema. The constants below are the only values written.
pub mod statut_entite {
    pub const PLANIFIE: &str = "PLANIFIE";
    pub const EN_COURS: &str = "EN_COURS";
    pub const TERMINE: &str = "TERMINE";
    pub const SUSPENDU: &str = "SUSPENDU";

    pub const ACTIFS: [&str; 2] = [EN_COURS, PLANIFIE];
}

pub mod statut_alerte {
    pub const NON_LU: &str = "NON_LU";
    pub const LU: &str = "LU";
    pub const TRAITEE: &str = "TRAITEE";

    /// Statuses that still block re-creation of the same alert type.
    pub const NON_RESOLUS: [&str; 2] = [NON_LU, LU];
}

pub mod niveau_alerte {
    pub const INFO: &str = "INFO";
    pub const WARNING: &str = "WARNING";
    pub const CRITIQUE: &str = "CRITIQUE";
}

pub mod type_alerte {
    pub const DEPASSEMENT_BUDGET: &str = "DEPASSEMENT_BUDGET";
    pub const DEPASSEMENT_DELAI: &str = "DEPASSEMENT_DELAI";
    pub const ECHEANCE_PROCHE: &str = "ECHEANCE_PROCHE";
    pub const PROGRESSION_FAIBLE: &str = "PROGRESSION_FAIBLE";
    pub const DEPASSEMENT_SEUIL: &str = "DEPASSEMENT_SEUIL";
    pub const OPERATION_RETARD: &str = "OPERATION_RETARD";
}

pub mod role_utilisateur {
    pub const INGENIEUR_TERRAIN: &str = "INGENIEUR_TERRAIN";
    pub const EXPERT: &str = "EXPERT";
    pub const TOP_MANAGEMENT: &str = "TOP_MANAGEMENT";
}

pub mod statut_utilisateur {
    pub const ACTIF: &str = "ACTIF";
    pub const INACTIF: &str = "INACTIF";
    pub const SUSPENDU: &str = "SUSPENDU";
}

pub mod role_projet {
    pub const CHEF_PROJET: &str = "CHEF_PROJET";
    pub const RESPONSABLE_TECHNIQUE: &str = "RESPONSABLE_TECHNIQUE";

    /// Project roles that receive alert notifications.
    pub const NOTIFIES: [&str; 2] = [CHEF_PROJET, RESPONSABLE_TECHNIQUE];
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::utilisateurs)]
pub struct Utilisateur {
    pub id: Uuid,
    pub nom: String,
    pub prenom: String,
    pub email: String,
    pub role: String,
    pub statut: String,
    pub date_creation: DateTime<Utc>,
}

impl Utilisateur {
    pub fn nom_complet(&self) -> String {
        format!("{} {}", self.prenom, self.nom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::projets)]
pub struct Projet {
    pub id: Uuid,
    pub nom: String,
    pub description: Option<String>,
    pub localisation: Option<String>,
    pub budget_initial: Option<BigDecimal>,
    pub cout_actuel: Option<BigDecimal>,
    pub date_debut: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub date_fin_reelle: Option<NaiveDate>,
    pub statut: String,
    pub responsable_id: Option<Uuid>,
    pub seuil_alerte_cout: BigDecimal,
    pub seuil_alerte_delai: BigDecimal,
    pub date_creation: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::phases)]
pub struct Phase {
    pub id: Uuid,
    pub projet_id: Uuid,
    pub nom: String,
    pub description: Option<String>,
    pub ordre: i32,
    pub date_debut_prevue: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub date_debut_reelle: Option<NaiveDate>,
    pub date_fin_reelle: Option<NaiveDate>,
    pub budget_alloue: Option<BigDecimal>,
    pub cout_actuel: Option<BigDecimal>,
    pub progression: BigDecimal,
    pub statut: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::operations)]
pub struct Operation {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub nom: String,
    pub description: Option<String>,
    pub type_operation: Option<String>,
    pub date_debut_prevue: Option<NaiveDate>,
    pub date_fin_prevue: Option<NaiveDate>,
    pub date_debut_reelle: Option<NaiveDate>,
    pub date_fin_reelle: Option<NaiveDate>,
    pub cout_prevue: Option<BigDecimal>,
    pub cout_reel: Option<BigDecimal>,
    pub progression: BigDecimal,
    pub statut: String,
    pub responsable_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::seuils)]
pub struct Seuil {
    pub id: Uuid,
    pub operation_id: Uuid,
    pub valeur_verte: BigDecimal,
    pub valeur_jaune: BigDecimal,
    pub valeur_rouge: BigDecimal,
    pub date_definition: DateTime<Utc>,
    pub defini_par: Option<Uuid>,
    pub date_modification: Option<DateTime<Utc>>,
    pub modifie_par: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::alertes)]
pub struct Alerte {
    pub id: Uuid,
    pub projet_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub operation_id: Option<Uuid>,
    pub type_alerte: String,
    pub niveau: String,
    pub message: String,
    pub date_alerte: DateTime<Utc>,
    pub statut: String,
    pub lue_par: Option<Uuid>,
    pub date_lecture: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::historique_modifications)]
pub struct HistoriqueModification {
    pub id: Uuid,
    pub table_modifiee: String,
    pub id_enregistrement: Uuid,
    pub champ_modifie: String,
    pub ancienne_valeur: Option<String>,
    pub nouvelle_valeur: Option<String>,
    pub date_modification: DateTime<Utc>,
    pub modifie_par: Option<Uuid>,
    pub commentaire: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::equipes_projet)]
pub struct EquipeProjet {
    pub id: Uuid,
    pub projet_id: Uuid,
    pub utilisateur_id: Uuid,
    pub role_projet: String,
    pub date_affectation: DateTime<Utc>,
    pub affecte_par: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::problemes)]
pub struct Probleme {
    pub id: Uuid,
    pub projet_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub operation_id: Option<Uuid>,
    pub titre: String,
    pub description: Option<String>,
    pub gravite: String,
    pub statut: String,
    pub date_signalement: DateTime<Utc>,
    pub signale_par: Option<Uuid>,
    pub date_resolution: Option<DateTime<Utc>>,
    pub resolu_par: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = schema::solutions)]
pub struct Solution {
    pub id: Uuid,
    pub probleme_id: Uuid,
    pub description: String,
    pub type_solution: Option<String>,
    pub cout_estime: Option<BigDecimal>,
    pub delai_estime: Option<i32>,
    pub proposee_par: Option<Uuid>,
    pub date_proposition: DateTime<Utc>,
    pub statut: String,
    pub date_validation: Option<DateTime<Utc>>,
    pub validee_par: Option<Uuid>,
}

pub mod schema {
    diesel::table! {
        utilisateurs (id) {
            id -> Uuid,
            nom -> Varchar,
            prenom -> Varchar,
            email -> Varchar,
            role -> Varchar,
            statut -> Varchar,
            date_creation -> Timestamptz,
        }
    }

    diesel::table! {
        projets (id) {
            id -> Uuid,
            nom -> Varchar,
            description -> Nullable<Text>,
            localisation -> Nullable<Varchar>,
            budget_initial -> Nullable<Numeric>,
            cout_actuel -> Nullable<Numeric>,
            date_debut -> Nullable<Date>,
            date_fin_prevue -> Nullable<Date>,
            date_fin_reelle -> Nullable<Date>,
            statut -> Varchar,
            responsable_id -> Nullable<Uuid>,
            seuil_alerte_cout -> Numeric,
            seuil_alerte_delai -> Numeric,
            date_creation -> Timestamptz,
        }
    }

    diesel::table! {
        phases (id) {
            id -> Uuid,
            projet_id -> Uuid,
            nom -> Varchar,
            description -> Nullable<Text>,
            ordre -> Int4,
            date_debut_prevue -> Nullable<Date>,
            date_fin_prevue -> Nullable<Date>,
            date_debut_reelle -> Nullable<Date>,
            date_fin_reelle -> Nullable<Date>,
            budget_alloue -> Nullable<Numeric>,
            cout_actuel -> Nullable<Numeric>,
            progression -> Numeric,
            statut -> Varchar,
        }
    }

    diesel::table! {
        operations (id) {
            id -> Uuid,
            phase_id -> Uuid,
            nom -> Varchar,
            description -> Nullable<Text>,
            type_operation -> Nullable<Varchar>,
            date_debut_prevue -> Nullable<Date>,
            date_fin_prevue -> Nullable<Date>,
            date_debut_reelle -> Nullable<Date>,
            date_fin_reelle -> Nullable<Date>,
            cout_prevue -> Nullable<Numeric>,
            cout_reel -> Nullable<Numeric>,
            progression -> Numeric,
            statut -> Varchar,
            responsable_id -> Nullable<Uuid>,
        }
    }

    diesel::table! {
        seuils (id) {
            id -> Uuid,
            operation_id -> Uuid,
            valeur_verte -> Numeric,
            valeur_jaune -> Numeric,
            valeur_rouge -> Numeric,
            date_definition -> Timestamptz,
            defini_par -> Nullable<Uuid>,
            date_modification -> Nullable<Timestamptz>,
            modifie_par -> Nullable<Uuid>,
        }
    }

    diesel::table! {
        alertes (id) {
            id -> Uuid,
            projet_id -> Nullable<Uuid>,
            phase_id -> Nullable<Uuid>,
            operation_id -> Nullable<Uuid>,
            type_alerte -> Varchar,
            niveau -> Varchar,
            message -> Varchar,
            date_alerte -> Timestamptz,
            statut -> Varchar,
            lue_par -> Nullable<Uuid>,
            date_lecture -> Nullable<Timestamptz>,
        }
    }

    diesel::table! {
        historique_modifications (id) {
            id -> Uuid,
            table_modifiee -> Varchar,
            id_enregistrement -> Uuid,
            champ_modifie -> Varchar,
            ancienne_valeur -> Nullable<Text>,
            nouvelle_valeur -> Nullable<Text>,
            date_modification -> Timestamptz,
            modifie_par -> Nullable<Uuid>,
            commentaire -> Nullable<Varchar>,
        }
    }

    diesel::table! {
        equipes_projet (id) {
            id -> Uuid,
            projet_id -> Uuid,
            utilisateur_id -> Uuid,
            role_projet -> Varchar,
            date_affectation -> Timestamptz,
            affecte_par -> Nullable<Uuid>,
        }
    }

    diesel::table! {
        problemes (id) {
            id -> Uuid,
            projet_id -> Nullable<Uuid>,
            phase_id -> Nullable<Uuid>,
            operation_id -> Nullable<Uuid>,
            titre -> Varchar,
            description -> Nullable<Text>,
            gravite -> Varchar,
            statut -> Varchar,
            date_signalement -> Timestamptz,
            signale_par -> Nullable<Uuid>,
            date_resolution -> Nullable<Timestamptz>,
            resolu_par -> Nullable<Uuid>,
        }
    }

    diesel::table! {
        solutions (id) {
            id -> Uuid,
            probleme_id -> Uuid,
            description -> Text,
            type_solution -> Nullable<Varchar>,
            cout_estime -> Nullable<Numeric>,
            delai_estime -> Nullable<Int4>,
            proposee_par -> Nullable<Uuid>,
            date_proposition -> Timestamptz,
            statut -> Varchar,
            date_validation -> Nullable<Timestamptz>,
            validee_par -> Nullable<Uuid>,
        }
    }

    diesel::joinable!(phases -> projets (projet_id));
    diesel::joinable!(operations -> phases (phase_id));
    diesel::joinable!(seuils -> operations (operation_id));
    diesel::joinable!(equipes_projet -> projets (projet_id));
    diesel::joinable!(equipes_projet -> utilisateurs (utilisateur_id));
    diesel::joinable!(solutions -> problemes (probleme_id));

    diesel::allow_tables_to_appear_in_same_query!(
        utilisateurs,
        projets,
        phases,
        operations,
        seuils,
        alertes,
        historique_modifications,
        equipes_projet,
        problemes,
        solutions,
    );
}

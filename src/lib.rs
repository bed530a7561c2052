pub mod alerts;
pub mod api_router;
pub mod config;
pub mod dashboard;
pub mod history;
pub mod problems;
pub mod projects;
pub mod shared;
pub mod thresholds;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

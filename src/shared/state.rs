use crate::alerts::notifier::Mailer;
use crate::config::AppConfig;
use crate::shared::utils::DbPool;
use std::sync::Arc;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub mailer: Arc<Mailer>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            mailer: Arc::clone(&self.mailer),
        }
    }
}

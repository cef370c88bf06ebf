// Application state module
// Immutable per-process state shared by every connection

use super::types::Config;
use crate::handler::{DefaultFileHandler, NosniffResponder, StaticFiles};

/// File handler stack used by the server: the nosniff policies over the default engine hooks
pub type Responder = NosniffResponder<DefaultFileHandler>;

/// Application state
pub struct AppState {
    pub config: Config,
    pub files: StaticFiles<Responder>,
    /// Copy of `logging.access_log`
    pub access_log: bool,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let base = DefaultFileHandler::new(&config.http.server_name);
        let files = StaticFiles::new(
            &config.server.root,
            config.http.index_files.clone(),
            config.http.directory_listing,
            config.http.cache_max_age,
            NosniffResponder::new(base),
        );

        Self {
            config: config.clone(),
            files,
            access_log: config.logging.access_log,
        }
    }
}

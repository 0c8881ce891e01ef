use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::designer::analysis::RoomContext;
use crate::designer::director::Director;
use crate::designer::session::Session;
use crate::llm::GeminiClient;

/// Shared application state. Each session owns its own Context Store and
/// Orchestrator; nothing mutable is shared between sessions beyond the
/// registry itself.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub gemini: Arc<GeminiClient>,
    pub director: Arc<Director>,
    pub started_at: DateTime<Utc>,
    sessions: Arc<Mutex<HashMap<Uuid, Arc<Session>>>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: Database, gemini: Arc<GeminiClient>) -> Self {
        let director = Arc::new(Director::new(config.history_char_budget));
        AppState {
            config,
            db,
            gemini,
            director,
            started_at: Utc::now(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn create_session(&self, room_context: RoomContext) -> Arc<Session> {
        let session = Arc::new(Session::new(room_context));
        self.sessions.lock().insert(session.id(), session.clone());
        session
    }

    pub fn session(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn remove_session(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().remove(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

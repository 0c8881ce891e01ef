use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub room_context: String,
    pub room_type: String,
    pub analysis_json: String,
    pub created_at: DateTime<Utc>,
}

/// Redesign results listed without their image payloads.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRow {
    pub id: i64,
    pub project_id: String,
    pub instruction: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRow {
    pub id: i64,
    pub project_id: String,
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProjectInsert {
    pub id: String,
    pub room_context: String,
    pub room_type: String,
    pub analysis_json: String,
    pub original_image: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RenderInsert {
    pub project_id: String,
    pub instruction: String,
    pub image: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TranscriptInsert {
    pub project_id: String,
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One queued write for the background log writer.
#[derive(Debug, Clone)]
pub enum LogInsert {
    Project(ProjectInsert),
    Render(RenderInsert),
    Message(TranscriptInsert),
}

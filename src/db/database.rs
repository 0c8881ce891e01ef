use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::db::models::{
    LogInsert, ProjectInsert, ProjectRow, RenderInsert, RenderRow, TranscriptInsert, TranscriptRow,
};

/// Project log store. Purely a record of what happened, never consulted by
/// the Director during an active session. Writes go through a write-behind
/// queue so request handlers don't block on sqlite.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    sender: mpsc::Sender<LogInsert>,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS projects (\
                id TEXT PRIMARY KEY,\
                room_context TEXT NOT NULL,\
                room_type TEXT NOT NULL,\
                analysis_json TEXT NOT NULL,\
                original_image BLOB NOT NULL,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS renders (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                project_id TEXT NOT NULL,\
                instruction TEXT NOT NULL,\
                image BLOB NOT NULL,\
                created_at TEXT NOT NULL,\
                FOREIGN KEY(project_id) REFERENCES projects(id)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transcript (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                project_id TEXT NOT NULL,\
                role TEXT NOT NULL,\
                text TEXT NOT NULL,\
                created_at TEXT NOT NULL,\
                FOREIGN KEY(project_id) REFERENCES projects(id)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_renders_project_id ON renders(project_id);")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transcript_project_id ON transcript(project_id);",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        let (sender, receiver) = mpsc::channel(1000);
        let writer_pool = pool.clone();
        tokio::spawn(async move {
            log_writer(writer_pool, receiver).await;
        });

        Ok(Database { pool, sender })
    }

    /// Best-effort enqueue; a full queue drops the log entry with a warning
    /// rather than stalling the request path.
    pub fn queue_insert(&self, insert: LogInsert) {
        if let Err(err) = self.sender.try_send(insert) {
            warn!("Failed to queue project log insert: {err}");
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, room_context, room_type, analysis_json, created_at \
             FROM projects WHERE id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_renders(&self, project_id: &str) -> Result<Vec<RenderRow>> {
        let rows = sqlx::query_as::<_, RenderRow>(
            "SELECT id, project_id, instruction, created_at \
             FROM renders WHERE project_id = ? ORDER BY id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_transcript(&self, project_id: &str) -> Result<Vec<TranscriptRow>> {
        let rows = sqlx::query_as::<_, TranscriptRow>(
            "SELECT id, project_id, role, text, created_at \
             FROM transcript WHERE project_id = ? ORDER BY id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn insert_project(pool: &SqlitePool, insert: &ProjectInsert) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO projects (id, room_context, room_type, analysis_json, original_image, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&insert.id)
    .bind(&insert.room_context)
    .bind(&insert.room_type)
    .bind(&insert.analysis_json)
    .bind(&insert.original_image)
    .bind(insert.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_render(pool: &SqlitePool, insert: &RenderInsert) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO renders (project_id, instruction, image, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&insert.project_id)
    .bind(&insert.instruction)
    .bind(&insert.image)
    .bind(insert.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_transcript(
    pool: &SqlitePool,
    insert: &TranscriptInsert,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO transcript (project_id, role, text, created_at) VALUES (?, ?, ?, ?)")
        .bind(&insert.project_id)
        .bind(&insert.role)
        .bind(&insert.text)
        .bind(insert.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

async fn log_writer(pool: SqlitePool, mut receiver: mpsc::Receiver<LogInsert>) {
    while let Some(entry) = receiver.recv().await {
        let result = match &entry {
            LogInsert::Project(insert) => insert_project(&pool, insert).await,
            LogInsert::Render(insert) => insert_render(&pool, insert).await,
            LogInsert::Message(insert) => insert_transcript(&pool, insert).await,
        };
        if let Err(err) = result {
            warn!("Error in log_writer: {err}");
        }
    }

    pool.close().await;
    info!("Project log writer task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn temp_database() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("lumina-test.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let db = Database::init(&url).await.expect("database init");
        (db, dir)
    }

    #[tokio::test]
    async fn queued_project_log_entries_become_readable_rows() {
        let (db, _dir) = temp_database().await;
        let now = Utc::now();

        db.queue_insert(LogInsert::Project(ProjectInsert {
            id: "p1".to_string(),
            room_context: "Residential".to_string(),
            room_type: "Living Room".to_string(),
            analysis_json: "{}".to_string(),
            original_image: vec![1, 2, 3],
            created_at: now,
        }));
        db.queue_insert(LogInsert::Render(RenderInsert {
            project_id: "p1".to_string(),
            instruction: "CHANGE rug: jute weave.".to_string(),
            image: vec![4, 5],
            created_at: now,
        }));
        db.queue_insert(LogInsert::Message(TranscriptInsert {
            project_id: "p1".to_string(),
            role: "user".to_string(),
            text: "change the rug".to_string(),
            created_at: now,
        }));

        // the writer drains asynchronously; poll until the rows appear
        let mut project = None;
        for _ in 0..100 {
            project = db.get_project("p1").await.expect("query project");
            if project.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let project = project.expect("project row written");
        assert_eq!(project.room_type, "Living Room");

        let mut renders = Vec::new();
        for _ in 0..100 {
            renders = db.list_renders("p1").await.expect("query renders");
            if !renders.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(renders.len(), 1);
        assert!(renders[0].instruction.starts_with("CHANGE rug"));

        let mut transcript = Vec::new();
        for _ in 0..100 {
            transcript = db.list_transcript("p1").await.expect("query transcript");
            if !transcript.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(transcript[0].role, "user");
    }

    #[tokio::test]
    async fn health_check_succeeds_on_a_fresh_database() {
        let (db, _dir) = temp_database().await;
        db.health_check().await.expect("healthy");
    }
}

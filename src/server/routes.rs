use axum::extract::{Path, State};
use axum::Json;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::db::models::{LogInsert, ProjectInsert, ProjectRow, RenderInsert, RenderRow, TranscriptInsert, TranscriptRow};
use crate::designer::analysis::{RoomAnalysis, RoomContext};
use crate::designer::collaborator::GenerationCollaborator;
use crate::designer::context::ChatEntry;
use crate::designer::session::{self, Session};
use crate::designer::styles::{find_style, StyleOption, DESIGN_STYLES};
use crate::server::error::ApiError;
use crate::server::validate;
use crate::state::AppState;
use crate::utils::timing::RequestTimer;

#[derive(Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope {
        success: true,
        data,
    })
}

fn encode_image(image: &[u8]) -> String {
    general_purpose::STANDARD.encode(image)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub image_base64: String,
    pub context: RoomContext,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub analysis: RoomAnalysis,
}

/// POST /api/v1/sessions: accept an upload, run the room analysis, open a
/// session. Analysis failure discards the session entirely; the user
/// re-uploads.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<ApiEnvelope<CreateSessionResponse>>, ApiError> {
    let mut timer = RequestTimer::start("create_session", &Uuid::new_v4().to_string());

    let result = async {
        let image = validate::decode_image_field(
            "imageBase64",
            &request.image_base64,
            state.config.max_image_base64_len,
        )?;

        let session = state.create_session(request.context);
        match session::run_analysis(&session, state.gemini.as_ref(), image.clone()).await {
            Ok(analysis) => {
                state.db.queue_insert(LogInsert::Project(ProjectInsert {
                    id: session.id().to_string(),
                    room_context: request.context.as_str().to_string(),
                    room_type: analysis.room_type.clone(),
                    analysis_json: serde_json::to_string(&analysis)
                        .unwrap_or_else(|_| "{}".to_string()),
                    original_image: image,
                    created_at: Utc::now(),
                }));
                Ok(CreateSessionResponse {
                    session_id: session.id(),
                    analysis,
                })
            }
            Err(err) => {
                state.remove_session(&session.id());
                Err(ApiError::from(err))
            }
        }
    }
    .await;

    match &result {
        Ok(_) => timer.mark_status("success", None),
        Err(err) => timer.mark_status("error", Some(err.message.clone())),
    }
    timer.log_completed();
    result.map(ok)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedesignRequest {
    pub style_id: Option<String>,
    pub suggested_index: Option<usize>,
    pub prompt: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub image_base64: String,
}

fn lookup_session(state: &AppState, id: Uuid) -> Result<std::sync::Arc<Session>, ApiError> {
    state
        .session(&id)
        .ok_or_else(|| ApiError::not_found("Session not found. Upload a room photo to start."))
}

/// POST /api/v1/sessions/{id}/redesign: preset, AI-suggested, or custom
/// prompt. These are already explicit instructions and skip intent
/// classification.
pub async fn redesign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RedesignRequest>,
) -> Result<Json<ApiEnvelope<ImageResponse>>, ApiError> {
    let mut timer = RequestTimer::start("redesign", &id.to_string());

    let result = async {
        let session = lookup_session(&state, id)?;

        let instruction = if let Some(style_id) = &request.style_id {
            find_style(style_id)
                .ok_or_else(|| ApiError::bad_request("unknown style id"))?
                .prompt
                .to_string()
        } else if let Some(index) = request.suggested_index {
            let analysis = session
                .analysis()
                .ok_or_else(|| ApiError::conflict("The session has no analysis yet."))?;
            analysis
                .suggested_prompts
                .get(index)
                .ok_or_else(|| ApiError::bad_request("suggested prompt index out of range"))?
                .prompt
                .clone()
        } else if let Some(prompt) = &request.prompt {
            validate::validate_prompt(
                prompt,
                state.config.min_prompt_chars,
                state.config.max_prompt_chars,
            )?
        } else {
            return Err(ApiError::bad_request("select a style or provide a prompt"));
        };

        let image = session::run_redesign(
            &session,
            &state.director,
            state.gemini.as_ref(),
            &instruction,
        )
        .await?;

        state.db.queue_insert(LogInsert::Render(RenderInsert {
            project_id: session.id().to_string(),
            instruction,
            image: image.clone(),
            created_at: Utc::now(),
        }));

        Ok(ImageResponse {
            image_base64: encode_image(&image),
        })
    }
    .await;

    match &result {
        Ok(_) => timer.mark_status("success", None),
        Err(err) => timer.mark_status("error", Some(err.message.clone())),
    }
    timer.log_completed();
    result.map(ok)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    /// Set when the Director dispatched an edit and it failed; the previous
    /// image is still current and the request can be retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_error: Option<String>,
}

/// POST /api/v1/sessions/{id}/chat: one Director turn. A conversational
/// reply returns no image; a validated directive triggers a refinement
/// re-anchored to the original upload.
pub async fn chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ApiEnvelope<ChatResponse>>, ApiError> {
    let mut timer = RequestTimer::start("chat", &id.to_string());

    let result: Result<ChatResponse, ApiError> = async {
        let session = lookup_session(&state, id)?;
        let message =
            validate::validate_chat_message(&request.message, state.config.max_chat_message_chars)?;

        let outcome = session::run_chat(
            &session,
            &state.director,
            state.gemini.as_ref(),
            state.gemini.as_ref(),
            &message,
        )
        .await?;

        let project_id = session.id().to_string();
        let now = Utc::now();
        state.db.queue_insert(LogInsert::Message(TranscriptInsert {
            project_id: project_id.clone(),
            role: "user".to_string(),
            text: message,
            created_at: now,
        }));
        state.db.queue_insert(LogInsert::Message(TranscriptInsert {
            project_id: project_id.clone(),
            role: "assistant".to_string(),
            text: outcome.reply.clone(),
            created_at: now,
        }));
        if let (Some(image), Some(instruction)) = (&outcome.edited_image, &outcome.instruction) {
            state.db.queue_insert(LogInsert::Render(RenderInsert {
                project_id,
                instruction: instruction.clone(),
                image: image.clone(),
                created_at: now,
            }));
        }

        Ok(ChatResponse {
            reply: outcome.reply,
            image_base64: outcome.edited_image.as_deref().map(encode_image),
            edit_error: outcome.edit_error.map(|err| ApiError::from(err).message),
        })
    }
    .await;

    match &result {
        Ok(_) => timer.mark_status("success", None),
        Err(err) => timer.mark_status("error", Some(err.message.clone())),
    }
    timer.log_completed();
    result.map(ok)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub role: String,
    pub text: String,
    pub is_system_message: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub session_id: Uuid,
    pub phase: String,
    pub analysis: Option<RoomAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image_base64: Option<String>,
    pub messages: Vec<SessionMessage>,
}

/// GET /api/v1/sessions/{id}: current phase, analysis, displayed image and
/// chat log (display-only notices included, flagged as such).
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiEnvelope<SessionStatusResponse>>, ApiError> {
    let session = lookup_session(&state, id)?;

    let messages = session::transcript(&session)
        .into_iter()
        .map(|entry| match entry {
            ChatEntry::Message(message) => SessionMessage {
                role: message.role.as_str().to_string(),
                text: message.text,
                is_system_message: false,
            },
            ChatEntry::DisplayOnlyNotice(text) => SessionMessage {
                role: "assistant".to_string(),
                text,
                is_system_message: true,
            },
        })
        .collect();

    Ok(ok(SessionStatusResponse {
        session_id: id,
        phase: session.phase().as_str().to_string(),
        analysis: session.analysis(),
        current_image_base64: session.current_image().as_deref().map(encode_image),
        messages,
    }))
}

/// DELETE /api/v1/sessions/{id}: explicit reset; aborts any in-flight
/// collaborator call and discards all session data.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let session = lookup_session(&state, id)?;
    session.reset();
    state.remove_session(&id);
    Ok(ok(json!({ "reset": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
}

/// POST /api/v1/generate: text-to-image concept mode. No session, no
/// Director involvement.
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<ApiEnvelope<ImageResponse>>, ApiError> {
    let mut timer = RequestTimer::start("generate", &Uuid::new_v4().to_string());

    let result: Result<ImageResponse, ApiError> = async {
        let prompt = validate::validate_prompt(
            &request.prompt,
            state.config.min_prompt_chars,
            state.config.max_prompt_chars,
        )?;
        let image = state.gemini.generate(&prompt).await.map_err(ApiError::from)?;
        Ok(ImageResponse {
            image_base64: encode_image(&image),
        })
    }
    .await;

    match &result {
        Ok(_) => timer.mark_status("success", None),
        Err(err) => timer.mark_status("error", Some(err.message.clone())),
    }
    timer.log_completed();
    result.map(ok)
}

pub async fn list_styles() -> Json<ApiEnvelope<Vec<StyleOption>>> {
    ok(DESIGN_STYLES.to_vec())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub project: ProjectRow,
    pub renders: Vec<RenderRow>,
    pub transcript: Vec<TranscriptRow>,
}

/// GET /api/v1/projects/{id}: the persisted log of a past session.
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiEnvelope<ProjectResponse>>, ApiError> {
    let project_id = id.to_string();
    let project = state
        .db
        .get_project(&project_id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .ok_or_else(|| ApiError::not_found("Project not found."))?;
    let renders = state
        .db
        .list_renders(&project_id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let transcript = state
        .db
        .list_transcript(&project_id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;

    Ok(ok(ProjectResponse {
        project,
        renders,
        transcript,
    }))
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<ApiEnvelope<serde_json::Value>> {
    let db_status = match state.db.health_check().await {
        Ok(()) => "healthy",
        Err(_) => "degraded",
    };
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    ok(json!({
        "status": db_status,
        "timestamp": Utc::now().to_rfc3339(),
        "uptimeSeconds": uptime,
        "activeSessions": state.session_count(),
    }))
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{
    Config, DIRECTOR_SYSTEM_PROMPT, EDIT_HARD_CONSTRAINTS, EDIT_SYSTEM_INSTRUCTION,
    GENERATE_SYSTEM_INSTRUCTION, ROOM_ANALYSIS_PROMPT,
};
use crate::designer::analysis::{RoomAnalysis, RoomContext};
use crate::designer::collaborator::{
    AnalysisCollaborator, ChatCollaborator, CollaboratorError, ConverseReply, ConverseRequest,
    EditCollaborator, GenerationCollaborator,
};
use crate::llm::media::{
    detect_mime_type, downscale_for_prompt, ANALYSIS_JPEG_QUALITY, ANALYSIS_MAX_DIM,
    CHAT_JPEG_QUALITY, CHAT_MAX_DIM,
};
use crate::utils::timing::log_llm_timing;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;

/// Explicitly constructed Gemini client implementing all four collaborator
/// contracts. The reqwest client is built once at startup and injected; there
/// is no process-wide client state.
pub struct GeminiClient {
    http: reqwest::Client,
    config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value, system_prompt_label: Option<&str>) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        let label = system_prompt_label.unwrap_or("inline_system_prompt");
        summary.insert(
            "systemInstruction".to_string(),
            Value::String(label.to_string()),
        );
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

/// Pull a `retryDelay` hint ("37s") out of a Gemini quota-error body.
fn parse_retry_delay(body: &str) -> Option<Duration> {
    let value = serde_json::from_str::<Value>(body.trim()).ok()?;
    let details = value.pointer("/error/details")?.as_array()?;
    for detail in details {
        if let Some(delay) = detail.get("retryDelay").and_then(|v| v.as_str()) {
            if let Some(seconds) = delay.strip_suffix('s') {
                if let Ok(seconds) = seconds.parse::<f64>() {
                    return Some(Duration::from_secs_f64(seconds.max(0.0)));
                }
            }
        }
    }
    None
}

fn inline_image_part(image: &[u8]) -> Value {
    let mime_type = detect_mime_type(image).unwrap_or_else(|| "image/jpeg".to_string());
    let encoded = general_purpose::STANDARD.encode(image);
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": encoded
        }
    })
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::Text { text } = part {
                        if !text.trim().is_empty() {
                            text_parts.push(text);
                        }
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_images_from_response(response: GeminiResponse) -> Vec<Vec<u8>> {
    let mut images = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::InlineData { inline_data } = part {
                        if inline_data.mime_type.starts_with("image/") {
                            if let Ok(bytes) = general_purpose::STANDARD.decode(inline_data.data) {
                                images.push(bytes);
                            }
                        }
                    }
                }
            }
        }
    }
    images
}

fn analysis_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "roomType": { "type": "STRING" },
            "architecturalFeatures": { "type": "ARRAY", "items": { "type": "STRING" } },
            "designIssues": { "type": "ARRAY", "items": { "type": "STRING" } },
            "decorSuggestions": { "type": "ARRAY", "items": { "type": "STRING" } },
            "suggestedPrompts": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "prompt": { "type": "STRING" }
                    }
                }
            }
        }
    })
}

fn converse_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "text": { "type": "STRING" },
            "edit": {
                "type": "OBJECT",
                "nullable": true,
                "properties": {
                    "targetElements": { "type": "ARRAY", "items": { "type": "STRING" } },
                    "changeDescription": { "type": "STRING" },
                    "preserveElements": { "type": "ARRAY", "items": { "type": "STRING" } },
                    "restoreElements": { "type": "ARRAY", "items": { "type": "STRING" } }
                }
            }
        },
        "required": ["text"]
    })
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: Arc<Config>) -> Self {
        GeminiClient { http, config }
    }

    fn redact_api_key(&self, text: &str) -> String {
        let key = self.config.gemini_api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    fn build_safety_settings(&self) -> Vec<Value> {
        let threshold = match self.config.gemini_safety_settings.as_str() {
            "standard" => "BLOCK_MEDIUM_AND_ABOVE",
            _ => "OFF",
        };

        vec![
            json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
            json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
            json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
            json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
            json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
        ]
    }

    fn text_generation_config(&self, schema: Value) -> Value {
        json!({
            "temperature": self.config.gemini_temperature,
            "topK": self.config.gemini_top_k,
            "topP": self.config.gemini_top_p,
            "maxOutputTokens": self.config.gemini_max_output_tokens,
            "responseMimeType": "application/json",
            "responseSchema": schema,
        })
    }

    async fn call_api(
        &self,
        model: &str,
        payload: Value,
        system_prompt_label: Option<&str>,
    ) -> Result<GeminiResponse, CollaboratorError> {
        let url = format!("{GEMINI_BASE_URL}/{model}:generateContent");

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload, system_prompt_label);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.config.gemini_api_key)
                .timeout(Duration::from_secs(self.config.http_timeout_seconds))
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = self.redact_api_key(&err.to_string());
                    let should_retry =
                        gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(gemini_retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(CollaboratorError::Api(format!(
                        "Gemini request failed: {err_text}"
                    )));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                let should_retry =
                    gemini_should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(CollaboratorError::RateLimited {
                        retry_after: parse_retry_delay(&body),
                    });
                }
                let detail = message.unwrap_or(body_summary);
                return Err(CollaboratorError::Api(format!(
                    "Gemini request failed with status {status}: {detail}"
                )));
            }

            let value = response.json::<GeminiResponse>().await.map_err(|err| {
                CollaboratorError::Api(format!("Gemini response decode failed: {err}"))
            })?;
            return Ok(value);
        }
    }
}

#[async_trait]
impl AnalysisCollaborator for GeminiClient {
    async fn analyze(
        &self,
        image: &[u8],
        room_context: RoomContext,
    ) -> Result<RoomAnalysis, CollaboratorError> {
        let prompt = ROOM_ANALYSIS_PROMPT.replace("{room_context}", room_context.as_str());
        let scaled = downscale_for_prompt(image, ANALYSIS_MAX_DIM, ANALYSIS_JPEG_QUALITY);
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [inline_image_part(&scaled), { "text": prompt }]
            }],
            "generationConfig": self.text_generation_config(analysis_response_schema()),
            "safetySettings": self.build_safety_settings(),
        });

        let model = self.config.gemini_model.clone();
        log_llm_timing("gemini", &model, "analyze_room", None, || async {
            let response = self
                .call_api(&model, payload, Some("room_analysis_prompt"))
                .await?;
            let text = extract_text_from_response(response);
            if text.trim().is_empty() {
                return Err(CollaboratorError::NoPayload);
            }
            let value: Value = serde_json::from_str(&text).map_err(|err| {
                CollaboratorError::MalformedPayload(format!("analysis JSON did not parse: {err}"))
            })?;
            RoomAnalysis::from_payload(&value)
        })
        .await
    }
}

#[async_trait]
impl ChatCollaborator for GeminiClient {
    async fn converse(
        &self,
        request: ConverseRequest<'_>,
    ) -> Result<ConverseReply, CollaboratorError> {
        let original_reality = match request.analysis {
            Some(analysis) => format!(
                "Original Room Type: {}\nOriginal Authentic Materials (the \"before\" state): {}\nCurrent Context: {}",
                analysis.room_type,
                analysis.architectural_features.join(", "),
                request.room_context.as_str()
            ),
            None => "Original features unknown.".to_string(),
        };
        let system = DIRECTOR_SYSTEM_PROMPT.replace("{original_reality}", &original_reality);

        let scaled = downscale_for_prompt(request.current_image, CHAT_MAX_DIM, CHAT_JPEG_QUALITY);
        let user_content = format!(
            "User Request: \"{}\"\nConversation History: {}",
            request.user_message, request.history
        );
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{
                "role": "user",
                "parts": [inline_image_part(&scaled), { "text": user_content }]
            }],
            "generationConfig": self.text_generation_config(converse_response_schema()),
            "safetySettings": self.build_safety_settings(),
        });

        let model = self.config.gemini_model.clone();
        log_llm_timing("gemini", &model, "designer_chat", None, || async {
            let response = self
                .call_api(&model, payload, Some("director_system_prompt"))
                .await?;
            let text = extract_text_from_response(response);
            if text.trim().is_empty() {
                return Err(CollaboratorError::NoPayload);
            }
            serde_json::from_str::<ConverseReply>(&text).map_err(|err| {
                CollaboratorError::MalformedPayload(format!("chat JSON did not parse: {err}"))
            })
        })
        .await
    }
}

/// The hard constraints ride along on every edit request, no exceptions.
fn compose_edit_prompt(instruction: &str) -> String {
    format!("{instruction}\n\n{EDIT_HARD_CONSTRAINTS}")
}

#[async_trait]
impl EditCollaborator for GeminiClient {
    async fn edit(&self, image: &[u8], instruction: &str) -> Result<Vec<u8>, CollaboratorError> {
        let full_prompt = compose_edit_prompt(instruction);
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": EDIT_SYSTEM_INSTRUCTION }] },
            "contents": [{
                "role": "user",
                "parts": [inline_image_part(image), { "text": full_prompt }]
            }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
            "safetySettings": self.build_safety_settings(),
        });

        let model = self.config.gemini_image_model.clone();
        log_llm_timing("gemini", &model, "edit_room", None, || async {
            let response = self
                .call_api(&model, payload, Some("edit_system_instruction"))
                .await?;
            extract_images_from_response(response)
                .into_iter()
                .next()
                .ok_or(CollaboratorError::NoPayload)
        })
        .await
    }
}

#[async_trait]
impl GenerationCollaborator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, CollaboratorError> {
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": GENERATE_SYSTEM_INSTRUCTION }] },
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": { "aspectRatio": self.config.generated_aspect_ratio }
            },
            "safetySettings": self.build_safety_settings(),
        });

        let model = self.config.gemini_image_model.clone();
        log_llm_timing("gemini", &model, "generate_image", None, || async {
            let response = self
                .call_api(&model, payload, Some("generate_system_instruction"))
                .await?;
            extract_images_from_response(response)
                .into_iter()
                .next()
                .ok_or(CollaboratorError::NoPayload)
        })
        .await
    }
}

use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::media::detect_mime_type;
use crate::server::error::ApiError;

static BASE64_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/=]+$").expect("valid base64 regex"));
static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[a-zA-Z0-9\s,.!?'"-]+$"#).expect("valid prompt regex"));

/// Decode and sanity-check a base64 image field before anything is
/// dispatched. Rejection happens here, with no session state touched.
pub fn decode_image_field(
    field: &str,
    value: &str,
    max_base64_len: usize,
) -> Result<Vec<u8>, ApiError> {
    if value.is_empty() || !BASE64_RE.is_match(value) {
        return Err(ApiError::bad_request(format!(
            "{field} must be valid base64"
        )));
    }
    if value.len() > max_base64_len {
        return Err(ApiError::bad_request(format!(
            "{field} exceeds maximum size (5MB)"
        )));
    }

    let bytes = general_purpose::STANDARD
        .decode(value)
        .map_err(|_| ApiError::bad_request(format!("{field} must be valid base64")))?;

    let is_image = detect_mime_type(&bytes)
        .map(|mime| mime.starts_with("image/"))
        .unwrap_or(false);
    if !is_image {
        return Err(ApiError::bad_request(format!(
            "{field} is not a supported image format"
        )));
    }

    Ok(bytes)
}

pub fn validate_prompt(prompt: &str, min_chars: usize, max_chars: usize) -> Result<String, ApiError> {
    let trimmed = prompt.trim();
    let length = trimmed.chars().count();
    if length < min_chars || length > max_chars {
        return Err(ApiError::bad_request(format!(
            "prompt must be between {min_chars} and {max_chars} characters"
        )));
    }
    if !PROMPT_RE.is_match(trimmed) {
        return Err(ApiError::bad_request("prompt contains invalid characters"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_chat_message(text: &str, max_chars: usize) -> Result<String, ApiError> {
    let trimmed = text.trim();
    let length = trimmed.chars().count();
    if length == 0 || length > max_chars {
        return Err(ApiError::bad_request(format!(
            "message must be between 1 and {max_chars} characters"
        )));
    }
    Ok(trimmed.to_string())
}

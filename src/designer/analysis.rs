use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::designer::collaborator::CollaboratorError;

/// Kind of space declared at upload time. Fixed for the whole session;
/// changing it requires a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomContext {
    Residential,
    Commercial,
}

impl RoomContext {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomContext::Residential => "Residential",
            RoomContext::Commercial => "Commercial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedPrompt {
    pub title: String,
    pub description: String,
    pub prompt: String,
}

/// Structured critique of an uploaded room photo. Computed once per upload;
/// `architectural_features` is the canonical record of the room's original
/// materials and is never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAnalysis {
    pub room_type: String,
    pub architectural_features: Vec<String>,
    pub design_issues: Vec<String>,
    pub decor_suggestions: Vec<String>,
    pub suggested_prompts: Vec<SuggestedPrompt>,
}

fn require_str(value: &Value, field: &str) -> Result<String, CollaboratorError> {
    let text = value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return Err(CollaboratorError::MalformedPayload(format!(
            "missing or empty field '{field}'"
        )));
    }
    Ok(text.to_string())
}

fn string_list(value: &Value, field: &str) -> Result<Vec<String>, CollaboratorError> {
    let Some(raw) = value.get(field) else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(CollaboratorError::MalformedPayload(format!(
            "field '{field}' is not an array"
        )));
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(text) = item.as_str() else {
            return Err(CollaboratorError::MalformedPayload(format!(
                "field '{field}' contains a non-string entry"
            )));
        };
        let text = text.trim();
        if !text.is_empty() {
            out.push(text.to_string());
        }
    }
    Ok(out)
}

impl RoomAnalysis {
    /// Shape-validate a raw collaborator payload into a `RoomAnalysis`.
    /// Fields the model is allowed to omit default to empty; fields with the
    /// wrong type are a `MalformedPayload`, never silently coerced.
    pub fn from_payload(value: &Value) -> Result<Self, CollaboratorError> {
        if !value.is_object() {
            return Err(CollaboratorError::MalformedPayload(
                "analysis payload is not a JSON object".to_string(),
            ));
        }

        let room_type = require_str(value, "roomType")?;
        let architectural_features = string_list(value, "architecturalFeatures")?;
        let design_issues = string_list(value, "designIssues")?;
        let decor_suggestions = string_list(value, "decorSuggestions")?;

        let mut suggested_prompts = Vec::new();
        if let Some(raw) = value.get("suggestedPrompts") {
            let Some(items) = raw.as_array() else {
                return Err(CollaboratorError::MalformedPayload(
                    "field 'suggestedPrompts' is not an array".to_string(),
                ));
            };
            for item in items {
                suggested_prompts.push(SuggestedPrompt {
                    title: require_str(item, "title")?,
                    description: require_str(item, "description")?,
                    prompt: require_str(item, "prompt")?,
                });
            }
        }

        Ok(RoomAnalysis {
            room_type,
            architectural_features,
            design_issues,
            decor_suggestions,
            suggested_prompts,
        })
    }

    /// Restoration lookup: find the authentic material recorded for an
    /// element ("floor" -> "Herringbone oak flooring"). Returns the exact
    /// original string, never a paraphrase; `None` means restoration is not
    /// possible for that element.
    pub fn original_material_for(&self, element: &str) -> Option<&str> {
        let tokens = element_tokens(element);
        if tokens.is_empty() {
            return None;
        }

        self.architectural_features
            .iter()
            .find(|feature| {
                let lowered = feature.to_lowercase();
                tokens.iter().any(|token| lowered.contains(token.as_str()))
            })
            .map(String::as_str)
    }
}

const MATCH_STOPWORDS: [&str; 4] = ["the", "and", "original", "existing"];

pub(crate) fn element_tokens(element: &str) -> Vec<String> {
    element
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .map(|token| token.strip_suffix('s').unwrap_or(token))
        .filter(|token| token.len() >= 3 && !MATCH_STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

use std::env;

use anyhow::Result;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub frontend_origin: String,
    pub log_level: String,
    pub database_url: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub gemini_temperature: f32,
    pub gemini_top_k: i32,
    pub gemini_top_p: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: String,
    pub http_timeout_seconds: u64,
    pub history_char_budget: usize,
    pub max_image_base64_len: usize,
    pub min_prompt_chars: usize,
    pub max_prompt_chars: usize,
    pub max_chat_message_chars: usize,
    pub generated_aspect_ratio: String,
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn normalize_database_url(value: String) -> String {
    if value.starts_with("sqlite+aiosqlite://") {
        return value.replacen("sqlite+aiosqlite://", "sqlite://", 1);
    }
    value
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
        if gemini_api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("GEMINI_API_KEY is required"));
        }

        Ok(Config {
            host: env_string("HOST", "127.0.0.1"),
            port: env_u16("PORT", 3001),
            frontend_origin: env_string("FRONTEND_URL", "http://localhost:3000"),
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            database_url: normalize_database_url(env_string(
                "DATABASE_URL",
                "sqlite://lumina.db?mode=rwc",
            )),
            gemini_api_key,
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-2.5-flash-image"),
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", 0.7),
            gemini_top_k: env_i32("GEMINI_TOP_K", 40),
            gemini_top_p: env_f32("GEMINI_TOP_P", 0.95),
            gemini_max_output_tokens: env_i32("GEMINI_MAX_OUTPUT_TOKENS", 2048),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 90),
            history_char_budget: env_usize("HISTORY_CHAR_BUDGET", 2000),
            max_image_base64_len: env_usize("MAX_IMAGE_BASE64_LEN", 7_000_000),
            min_prompt_chars: env_usize("MIN_PROMPT_CHARS", 10),
            max_prompt_chars: env_usize("MAX_PROMPT_CHARS", 2000),
            max_chat_message_chars: env_usize("MAX_CHAT_MESSAGE_CHARS", 500),
            generated_aspect_ratio: env_string("GENERATED_ASPECT_RATIO", "16:9"),
        })
    }
}

pub const ROOM_ANALYSIS_PROMPT: &str = r#"You are Lumina, a world-class interior designer.
Analyze this interior image. IMPORTANT: The user has explicitly identified this as a {room_context} space. Ensure all classification, design issues, and suggestions strictly align with a {room_context} environment.

1. CLASSIFY the room accurately within the context of {room_context}.
   - If Residential: Living Room, Bedroom, Kitchen, etc.
   - If Commercial: Open Plan Office, Executive Suite, Conference Room, Co-working Space, Retail Store, Lobby.
2. Describe architectural features and MATERIALS explicitly (e.g., "Herringbone oak flooring", "Exposed concrete ceiling", "Floor-to-ceiling glass windows", "White drywall").
3. Identify design issues specific to the function.
4. PROACTIVELY suggest additions appropriate to the context.

Return JSON matching the response schema."#;

pub const DIRECTOR_SYSTEM_PROMPT: &str = r#"You are Lumina, an expert AI interior designer.

CONTEXT:
1. **Original Reality**: {original_reality}
2. **Task**: You are modifying this space based on user requests.

CRITICAL "DIRECTOR" LOGIC:
You are not just chatting; you are directing an image generation model. When the user asks for a visual change, return a structured edit directive that is EXTREMELY PRECISE. When the user is only asking a question or giving feedback, return no directive at all.

Rule 1: ISOLATION
- "Change the rug" IMPLIES "keep the walls, floor, ceiling, and furniture exactly as they are."
- Name the concrete target elements in targetElements and describe their new look in changeDescription.
- Explicitly enumerate everything that must stay untouched in preserveElements, drawn from the Original Reality materials and the general composition.

Rule 2: RESTORATION
- If the user asks to keep or restore an element "as original", name that element in restoreElements. Do not invent its material; the original materials on record are authoritative.

Rule 3: CONTEXT
- If the space is Commercial, do not introduce beds or cozy home decor unless the user forces it.
- If the space is Residential, do not introduce office cubicles unless the user forces it.

Respond as JSON: a conversational "text" reply that confirms exactly what is kept and what changes, and an optional "edit" directive with targetElements, changeDescription, preserveElements, restoreElements."#;

/// Appended verbatim to every edit request, preset or Director-synthesized.
pub const EDIT_HARD_CONSTRAINTS: &str = r#"STRICT GENERATION CONSTRAINTS:
1. PRESERVATION PRIORITY: If the prompt asks to "Retain", "Keep", "Existing", or "Preserve" an element, that specific area MUST remain visually identical to the input image (same material, texture, color).
2. GEOMETRY: Do not change the room layout, window positions, or perspective.
3. ISOLATION: Only modify the specific elements mentioned in the 'CHANGE' section of the prompt. Leave everything else untouched.
4. STYLE: Photorealistic, 8k, high-end interior design photography."#;

pub const EDIT_SYSTEM_INSTRUCTION: &str =
    "Edit the image based on the prompt. CRITICAL: the response must be an image, NOT TEXT.";

pub const GENERATE_SYSTEM_INSTRUCTION: &str =
    "Generate an image based on the prompt. CRITICAL: the response must be an image, NOT TEXT.";
